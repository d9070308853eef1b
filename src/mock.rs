//! 测试替身：可脚本化的红外收发器、读卡器，以及记录型提示/显示实现。

use std::sync::{Arc, Mutex};

use crate::feedback::Feedback;
use crate::hud::Renderer;
use crate::infrared::{HitSink, IrError, IrPath, IrTransceiver};
use crate::ir_codec::{IrFrame, IrSignal, IR_ADDRESS, IR_COMMAND_SHOOT};
use crate::model::{Effect, Screen};
use crate::tag_reader::{RfidError, RfidScanner, TagSink, TagTechnology};

#[derive(Default)]
struct IrState {
    sink: Option<HitSink>,
    sent: Vec<IrFrame>,
    board_present: bool,
    route: Option<IrPath>,
    fail_start: bool,
    fail_route: bool,
    starts: u32,
}

pub struct MockTransceiver {
    state: Arc<Mutex<IrState>>,
}

/// 测试侧句柄：注入命中、模拟插拔、检查发射记录。
#[derive(Clone)]
pub struct MockIrHandle {
    state: Arc<Mutex<IrState>>,
}

pub fn mock_transceiver() -> (Box<dyn IrTransceiver>, MockIrHandle) {
    let state = Arc::new(Mutex::new(IrState::default()));
    (
        Box::new(MockTransceiver {
            state: state.clone(),
        }),
        MockIrHandle { state },
    )
}

impl IrTransceiver for MockTransceiver {
    fn transmit(&mut self, signal: &IrSignal) -> Result<(), IrError> {
        self.state.lock().unwrap().sent.push(signal.frame());
        Ok(())
    }

    fn start_rx(&mut self, sink: HitSink) -> Result<(), IrError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(IrError::Driver {
                op: "start_rx",
                code: -1,
            });
        }
        state.sink = Some(sink);
        state.starts += 1;
        Ok(())
    }

    fn stop_rx(&mut self) {
        self.state.lock().unwrap().sink = None;
    }

    fn external_board_present(&mut self) -> bool {
        self.state.lock().unwrap().board_present
    }

    fn route_to(&mut self, path: IrPath) -> Result<(), IrError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_route {
            return Err(IrError::Driver {
                op: "route",
                code: -1,
            });
        }
        state.route = Some(path);
        Ok(())
    }
}

impl MockIrHandle {
    /// 模拟收到一发射击信号；监听未运行或被丢弃时返回 false。
    pub fn shoot(&self) -> bool {
        self.deliver(IrFrame {
            address: IR_ADDRESS,
            command: IR_COMMAND_SHOOT,
        })
    }

    pub fn deliver(&self, frame: IrFrame) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        match sink {
            Some(sink) => sink.offer(frame),
            None => false,
        }
    }

    pub fn set_board(&self, present: bool) {
        self.state.lock().unwrap().board_present = present;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn fail_route(&self, fail: bool) {
        self.state.lock().unwrap().fail_route = fail;
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().unwrap().starts
    }

    pub fn route(&self) -> Option<IrPath> {
        self.state.lock().unwrap().route
    }

    pub fn sent(&self) -> Vec<IrFrame> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[derive(Default)]
struct ScannerState {
    sink: Option<TagSink>,
    on_start: Vec<Vec<u8>>,
    fail_start: bool,
    starts: u32,
}

pub struct MockScanner {
    state: Arc<Mutex<ScannerState>>,
}

/// 测试侧句柄：在扫描期间出示标签。
#[derive(Clone)]
pub struct MockScannerHandle {
    state: Arc<Mutex<ScannerState>>,
}

pub fn mock_scanner() -> (Box<dyn RfidScanner>, MockScannerHandle) {
    let state = Arc::new(Mutex::new(ScannerState::default()));
    (
        Box::new(MockScanner {
            state: state.clone(),
        }),
        MockScannerHandle { state },
    )
}

impl RfidScanner for MockScanner {
    fn start(&mut self, sink: TagSink) -> Result<(), RfidError> {
        let queued = {
            let mut state = self.state.lock().unwrap();
            if state.fail_start {
                return Err(RfidError::Driver {
                    op: "start",
                    code: -1,
                });
            }
            state.sink = Some(sink.clone());
            state.starts += 1;
            std::mem::take(&mut state.on_start)
        };
        for data in queued {
            sink.deliver(TagTechnology::Em4100, &data);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().sink = None;
    }
}

impl MockScannerHandle {
    /// 出示标签；读卡器未扫描或载荷被拒时返回 false。
    pub fn present(&self, data: &[u8]) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        match sink {
            Some(sink) => sink.deliver(TagTechnology::Em4100, data),
            None => false,
        }
    }

    /// 下一次开始扫描时立即读到的标签。
    pub fn queue_on_start(&self, data: &[u8]) {
        self.state.lock().unwrap().on_start.push(data.to_vec());
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().unwrap().starts
    }
}

/// 记录播放过的提示效果。
#[derive(Clone, Default)]
pub struct EffectLog {
    effects: Arc<Mutex<Vec<Effect>>>,
}

impl EffectLog {
    pub fn all(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn count(&self, effect: Effect) -> usize {
        self.effects
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == effect)
            .count()
    }

    pub fn last(&self) -> Option<Effect> {
        self.effects.lock().unwrap().last().copied()
    }
}

impl Feedback for EffectLog {
    fn play(&mut self, effect: Effect) {
        self.effects.lock().unwrap().push(effect);
    }
}

/// 记录渲染过的画面。
#[derive(Clone, Default)]
pub struct ScreenLog {
    screens: Arc<Mutex<Vec<Screen>>>,
}

impl ScreenLog {
    pub fn len(&self) -> usize {
        self.screens.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Screen> {
        self.screens.lock().unwrap().last().copied()
    }
}

impl Renderer for ScreenLog {
    fn render(&mut self, screen: &Screen) {
        self.screens.lock().unwrap().push(*screen);
    }
}
