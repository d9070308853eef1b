// 硬件绑定：红外 RMT、RDM6300 串口读卡、状态灯/振动/蜂鸣、按键
#[cfg(target_os = "espidf")]
mod button_task;
#[cfg(target_os = "espidf")]
mod ir_rmt;
#[cfg(target_os = "espidf")]
mod rfid_uart;
#[cfg(target_os = "espidf")]
mod smart_led;

#[cfg(target_os = "espidf")]
fn main() {
    use std::sync::mpsc;
    use std::time::Duration;

    use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, IOPin, OutputPin};
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::uart;
    use esp_idf_svc::timer::EspTaskTimerService;

    use laser_tag::feedback::{spawn_effect_player, EffectQueue};
    use laser_tag::hud::SerialHud;
    use laser_tag::model::GameSettings;
    use laser_tag::session::{SessionChannels, SessionController, SessionIo};
    use laser_tag::tag_reader::TagReader;

    // ESP-IDF 运行时初始化（链接补丁 & 日志）
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("LaserTag arena booting (ESP-IDF)...");

    let settings = GameSettings::from_env();
    match serde_json::to_string(&settings) {
        Ok(json) => log::info!("Settings {}", json),
        Err(err) => log::warn!("Settings not printable: {}", err),
    }

    // 外设初始化：RMT + UART + GPIO
    let peripherals = Peripherals::take().unwrap();
    let pins = peripherals.pins;
    let rmt = peripherals.rmt;

    let infrared = ir_rmt::RmtIrTransceiver::new(
        rmt.channel0,
        pins.gpio4,
        rmt.channel4,
        pins.gpio5,
        pins.gpio6.downgrade(),
        pins.gpio7.downgrade(),
    )
    .unwrap();

    let uart_config = uart::config::Config::new().baudrate(Hertz(9_600));
    let uart = uart::UartDriver::new(
        peripherals.uart1,
        pins.gpio17,
        pins.gpio18,
        AnyInputPin::none(),
        AnyOutputPin::none(),
        &uart_config,
    )
    .unwrap();
    let (_uart_tx, uart_rx) = uart.into_split();
    let scanner = rfid_uart::UartRfidScanner::spawn(
        uart_rx,
        pins.gpio8.downgrade_output(),
        settings.rfid_repeat_window,
    )
    .unwrap();

    // 提示效果在独立线程播放，主循环只投递
    let led = smart_led::StatusLed::new(rmt.channel1, pins.gpio48).unwrap();
    let outputs = smart_led::FeedbackOutputs::new(
        led,
        pins.gpio9.downgrade_output(),
        pins.gpio10.downgrade_output(),
    )
    .unwrap();
    let (effect_tx, effect_rx) = mpsc::channel();
    let _effect_handle = spawn_effect_player(outputs, effect_rx);

    let SessionChannels {
        input_tx,
        input_rx,
        tick_tx,
        tick_rx,
    } = SessionChannels::new();
    let _button_handle = button_task::spawn_button_task(
        [
            pins.gpio11.downgrade(),
            pins.gpio12.downgrade(),
            pins.gpio13.downgrade(),
            pins.gpio14.downgrade(),
        ],
        input_tx,
    )
    .unwrap();

    // 秒定时器：游戏计时
    let timer_service = EspTaskTimerService::new().unwrap();
    let timer = timer_service
        .timer(move || {
            let _ = tick_tx.send(());
        })
        .unwrap();
    timer.every(Duration::from_secs(1)).unwrap();

    let io = SessionIo {
        infrared: Box::new(infrared),
        reader: TagReader::new(Box::new(scanner)),
        feedback: Box::new(EffectQueue::new(effect_tx)),
        renderer: Box::new(SerialHud::new()),
        input_rx,
        tick_rx,
    };
    let mut session = SessionController::new(settings, io);
    if let Err(err) = session.run() {
        log::error!("Session aborted: {:?}", err);
    }
    drop(timer);
    log::info!("LaserTag arena stopped");
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("LaserTag-arena targets ESP-IDF; build with the espidf toolchain.");
}
