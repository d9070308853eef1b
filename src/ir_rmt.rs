use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::{AnyIOPin, Input, InputPin, Output, OutputPin, PinDriver, Pull};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::rmt::config::{CarrierConfig, DutyPercent, ReceiveConfig, TransmitConfig};
use esp_idf_hal::rmt::{
    PinState, Pulse, Receive, RmtChannel, RxRmtDriver, TxRmtDriver, VariableLengthSignal,
};
use esp_idf_hal::sys::EspError;

use laser_tag::infrared::{HitSink, IrError, IrPath, IrTransceiver};
use laser_tag::ir_codec::{decode_nec, IrPulse, IrSignal};

// 80 MHz APB / 80 = 1 tick 1 微秒。
const RMT_CLOCK_DIVIDER: u8 = 80;
// 超过 12 ms 无跳变视为一帧结束。
const RX_IDLE_THRESHOLD_US: u16 = 12_000;
const RX_RING_BUFFER: usize = 1000;
const RX_POLL_MS: u64 = 20;

struct Listener {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// RMT 红外收发器：TX 带 38 kHz 载波，RX 接一体化接收头；外接板通过检测脚与路由脚切换。
pub struct RmtIrTransceiver {
    tx: TxRmtDriver<'static>,
    rx: Arc<Mutex<RxRmtDriver<'static>>>,
    board_detect: PinDriver<'static, AnyIOPin, Input>,
    route_select: PinDriver<'static, AnyIOPin, Output>,
    listener: Option<Listener>,
}

impl RmtIrTransceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new<TC, TP, RC, RP>(
        tx_channel: impl Peripheral<P = TC> + 'static,
        tx_pin: impl Peripheral<P = TP> + 'static,
        rx_channel: impl Peripheral<P = RC> + 'static,
        rx_pin: impl Peripheral<P = RP> + 'static,
        board_detect: AnyIOPin,
        route_select: AnyIOPin,
    ) -> Result<Self, EspError>
    where
        TC: RmtChannel,
        TP: OutputPin,
        RC: RmtChannel,
        RP: InputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(38.kHz().into())
            .duty_percent(DutyPercent::new(33)?);
        let tx_config = TransmitConfig::new()
            .clock_divider(RMT_CLOCK_DIVIDER)
            .carrier(Some(carrier));
        let tx = TxRmtDriver::new(tx_channel, tx_pin, &tx_config)?;

        let rx_config = ReceiveConfig::new()
            .clock_divider(RMT_CLOCK_DIVIDER)
            .idle_threshold(RX_IDLE_THRESHOLD_US)
            .filter_ticks_thresh(100);
        let rx = RxRmtDriver::new(rx_channel, rx_pin, &rx_config, RX_RING_BUFFER)?;

        let mut board_detect = PinDriver::input(board_detect)?;
        board_detect.set_pull(Pull::Up)?;
        let route_select = PinDriver::output(route_select)?;

        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            board_detect,
            route_select,
            listener: None,
        })
    }

    /// 将 NEC 时序转换为 RMT 波形。
    fn render_signal(&self, signal: &IrSignal) -> Result<VariableLengthSignal, EspError> {
        let ticks_hz = self.tx.counter_clock()?;
        let mut rmt = VariableLengthSignal::new();
        for pulse in signal.pulses() {
            let level = if pulse.mark {
                PinState::High
            } else {
                PinState::Low
            };
            let duration = Duration::from_micros(pulse.micros as u64);
            rmt.push([&Pulse::new_with_duration(ticks_hz, level, &duration)?])?;
        }
        Ok(rmt)
    }
}

impl IrTransceiver for RmtIrTransceiver {
    fn transmit(&mut self, signal: &IrSignal) -> Result<(), IrError> {
        let rmt = self.render_signal(signal).map_err(driver_error("render"))?;
        self.tx.start_blocking(&rmt).map_err(driver_error("transmit"))
    }

    fn start_rx(&mut self, sink: HitSink) -> Result<(), IrError> {
        if self.listener.is_some() {
            return Ok(());
        }
        if let Ok(rx) = self.rx.lock() {
            rx.start().map_err(driver_error("rx_start"))?;
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let rx = self.rx.clone();
        let handle = thread::Builder::new()
            .stack_size(4096)
            .spawn(move || rx_loop(rx, flag, sink))
            .map_err(|_| IrError::Driver {
                op: "rx_spawn",
                code: -1,
            })?;
        self.listener = Some(Listener { running, handle });
        Ok(())
    }

    fn stop_rx(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        listener.running.store(false, Ordering::Release);
        let _ = listener.handle.join();
        if let Ok(rx) = self.rx.lock() {
            if let Err(err) = rx.stop() {
                log::warn!("IR RX stop failed: {:?}", err);
            }
        }
    }

    fn external_board_present(&mut self) -> bool {
        // 外接板插入时将检测脚拉低
        self.board_detect.is_low()
    }

    fn route_to(&mut self, path: IrPath) -> Result<(), IrError> {
        let result = match path {
            IrPath::Internal => self.route_select.set_low(),
            IrPath::External => self.route_select.set_high(),
        };
        result.map_err(driver_error("route"))
    }
}

impl Drop for RmtIrTransceiver {
    fn drop(&mut self) {
        self.stop_rx();
    }
}

/// 接收线程：读取 RMT 电平段，解码后写入命中通道。
fn rx_loop(rx: Arc<Mutex<RxRmtDriver<'static>>>, running: Arc<AtomicBool>, sink: HitSink) {
    let mut buf = [(Pulse::zero(), Pulse::zero()); 64];
    let wait = TickType::new_millis(RX_POLL_MS).ticks();
    while running.load(Ordering::Acquire) {
        let received = match rx.lock() {
            Ok(mut rx) => rx.receive(&mut buf, wait),
            Err(_) => break,
        };
        match received {
            Ok(Receive::Read(len)) => {
                let pulses = to_ir_pulses(&buf[..len]);
                match decode_nec(&pulses) {
                    Ok(frame) => {
                        sink.offer(frame);
                    }
                    Err(err) => log::debug!("IR frame rejected: {:?}", err),
                }
            }
            Ok(Receive::Overflow(_)) => log::debug!("IR RX buffer overflow"),
            Ok(Receive::Timeout) => {}
            Err(err) => {
                log::warn!("IR RX error: {:?}", err);
                thread::sleep(Duration::from_millis(RX_POLL_MS));
            }
        }
    }
}

/// 接收头输出低电平有效：低电平段即载波段。
fn to_ir_pulses(pairs: &[(Pulse, Pulse)]) -> Vec<IrPulse> {
    pairs
        .iter()
        .flat_map(|(first, second)| [*first, *second])
        .filter(|pulse| pulse.ticks.ticks() > 0)
        .map(|pulse| IrPulse {
            mark: pulse.pin_state == PinState::Low,
            micros: pulse.ticks.ticks() as u32,
        })
        .collect()
}

fn driver_error(op: &'static str) -> impl Fn(EspError) -> IrError {
    move |err| IrError::Driver {
        op,
        code: err.code(),
    }
}
