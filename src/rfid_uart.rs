use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::delay;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_hal::sys::EspError;
use esp_idf_hal::uart::UartRxDriver;

use laser_tag::rdm6300::{Rdm6300Reader, RepeatFilter};
use laser_tag::tag_reader::{RfidError, RfidScanner, TagSink, TagTechnology};

/// 读卡线程与扫描器之间共享的投递目标。
#[derive(Default)]
struct Shared {
    sink: Mutex<Option<TagSink>>,
    fresh: AtomicBool,
}

/// RDM6300 串口读卡模块：后台线程常驻解帧，开始扫描时才投递并给模块上电。
pub struct UartRfidScanner {
    shared: Arc<Shared>,
    enable: PinDriver<'static, AnyOutputPin, Output>,
}

impl UartRfidScanner {
    pub fn spawn(
        rx: UartRxDriver<'static>,
        enable: AnyOutputPin,
        repeat_window: Duration,
    ) -> Result<Self, EspError> {
        let mut enable = PinDriver::output(enable)?;
        enable.set_low()?;
        let shared = Arc::new(Shared::default());
        let worker = shared.clone();
        thread::spawn(move || read_loop(rx, worker, repeat_window));
        Ok(Self { shared, enable })
    }
}

impl RfidScanner for UartRfidScanner {
    fn start(&mut self, sink: TagSink) -> Result<(), RfidError> {
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = Some(sink);
        }
        self.shared.fresh.store(true, Ordering::Release);
        self.enable.set_high().map_err(|err| RfidError::Driver {
            op: "enable",
            code: err.code(),
        })
    }

    fn stop(&mut self) {
        if let Err(err) = self.enable.set_low() {
            log::warn!("RFID power off failed: {:?}", err);
        }
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = None;
        }
    }
}

fn read_loop(rx: UartRxDriver<'static>, shared: Arc<Shared>, repeat_window: Duration) {
    let mut reader = Rdm6300Reader::new();
    let mut repeats = RepeatFilter::new(repeat_window);
    let mut buf = [0u8; 64];
    loop {
        match rx.read(&mut buf, delay::BLOCK) {
            Ok(count) if count > 0 => {
                if shared.fresh.swap(false, Ordering::AcqRel) {
                    repeats.reset();
                }
                for &byte in &buf[..count] {
                    match reader.push(byte) {
                        Some(Ok(tag)) => {
                            if !repeats.allow(&tag, Instant::now()) {
                                continue;
                            }
                            log_tag(&tag);
                            let sink = shared.sink.lock().ok().and_then(|slot| slot.clone());
                            if let Some(sink) = sink {
                                sink.deliver(TagTechnology::Em4100, &tag);
                            }
                        }
                        Some(Err(err)) => log::warn!("RFID frame dropped: {:?}", err),
                        None => {}
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("RFID UART error: {:?}", err);
            }
        }
    }
}

fn log_tag(tag: &[u8]) {
    let mut line = String::with_capacity(tag.len() * 2);
    for byte in tag {
        let _ = write!(line, "{:02X}", byte);
    }
    log::info!("RFID tag {}", line);
}
