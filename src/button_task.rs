use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::gpio::{AnyIOPin, Input, PinDriver, Pull};
use esp_idf_hal::sys::EspError;

use laser_tag::buttons::ButtonScanner;
use laser_tag::model::InputEvent;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 启动按键轮询任务；引脚顺序为 OK、BACK、UP、DOWN，低电平为按下。
pub fn spawn_button_task(
    pins: [AnyIOPin; 4],
    input_tx: Sender<InputEvent>,
) -> Result<thread::JoinHandle<()>, EspError> {
    let mut drivers = Vec::with_capacity(4);
    for pin in pins {
        let mut driver: PinDriver<'static, AnyIOPin, Input> = PinDriver::input(pin)?;
        driver.set_pull(Pull::Up)?;
        drivers.push(driver);
    }

    Ok(thread::spawn(move || {
        let mut scanner = ButtonScanner::default();
        loop {
            let mut pressed = [false; 4];
            for (slot, driver) in pressed.iter_mut().zip(drivers.iter()) {
                *slot = driver.is_low();
            }
            for event in scanner.scan(pressed, Instant::now()) {
                log::debug!("Input {}", event);
                if input_tx.send(event).is_err() {
                    // 会话已结束
                    return;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }))
}
