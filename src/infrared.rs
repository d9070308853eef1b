use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ir_codec::{IrFrame, IrSignal, IR_COMMAND_SHOOT};
use crate::model::GameSettings;

/// 红外收发路径（内置收发器/外接扩展板）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrPath {
    Internal,
    External,
}

impl IrPath {
    pub fn from_board(attached: bool) -> Self {
        if attached {
            IrPath::External
        } else {
            IrPath::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IrPath::Internal => "internal",
            IrPath::External => "external",
        }
    }
}

/// 红外子系统错误类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrError {
    /// 底层驱动返回错误码。
    Driver { op: &'static str, code: i32 },
    /// 接收监听已永久失效（不自动重试）。
    Disabled,
}

/// 红外收发硬件接口（RMT 驱动或测试替身）。
pub trait IrTransceiver: Send {
    /// 发射一次完整波形，不等待应答。
    fn transmit(&mut self, signal: &IrSignal) -> Result<(), IrError>;
    /// 启动后台接收，解码出的帧交给 sink。
    fn start_rx(&mut self, sink: HitSink) -> Result<(), IrError>;
    /// 停止后台接收；返回后不再调用 sink。
    fn stop_rx(&mut self);
    /// 外接板检测脚状态。
    fn external_board_present(&mut self) -> bool;
    /// 切换收发路径。
    fn route_to(&mut self, path: IrPath) -> Result<(), IrError>;
}

struct HitSlot {
    pending: Option<Instant>,
    last_sent: Option<Instant>,
    echo_guard: Duration,
}

/// 容量为 1 的命中通道：满时丢弃新到的命中，本机发射后的回波窗口内的命中直接丢弃。
#[derive(Clone)]
pub struct HitSink {
    slot: Arc<Mutex<HitSlot>>,
}

impl HitSink {
    pub fn new(echo_guard: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(HitSlot {
                pending: None,
                last_sent: None,
                echo_guard,
            })),
        }
    }

    /// 接收线程调用：过滤命令字节并写入命中槽，写入成功返回 true。
    pub fn offer(&self, frame: IrFrame) -> bool {
        if frame.command != IR_COMMAND_SHOOT {
            log::debug!(
                "IR frame ignored: addr={:02X} cmd={:02X}",
                frame.address,
                frame.command
            );
            return false;
        }
        let now = Instant::now();
        let Ok(mut slot) = self.slot.lock() else {
            return false;
        };
        if let Some(sent) = slot.last_sent {
            if now.saturating_duration_since(sent) < slot.echo_guard {
                log::debug!("IR echo of own shot discarded");
                return false;
            }
        }
        if slot.pending.is_some() {
            log::debug!("IR hit dropped, previous hit not consumed yet");
            return false;
        }
        slot.pending = Some(now);
        true
    }

    fn mark_sent(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.last_sent = Some(Instant::now());
        }
    }

    fn take(&self) -> bool {
        self.slot
            .lock()
            .map(|mut slot| slot.pending.take().is_some())
            .unwrap_or(false)
    }

    fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.pending.is_some())
            .unwrap_or(false)
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.pending = None;
        }
    }
}

/// 红外控制器：一次性发射 + 非阻塞命中查询，透明处理外接板热插拔。
pub struct InfraredController {
    port: Box<dyn IrTransceiver>,
    signal: IrSignal,
    hits: HitSink,
    receive_active: bool,
    paused: bool,
    failed: bool,
    external_board_attached: bool,
    settle_polls: u8,
    settle_remaining: Option<u8>,
}

impl InfraredController {
    /// 打开控制器：按检测脚选择路径并启动接收，失败即视为分配失败。
    pub fn open(mut port: Box<dyn IrTransceiver>, settings: &GameSettings) -> Result<Self, IrError> {
        let attached = port.external_board_present();
        port.route_to(IrPath::from_board(attached))?;
        let hits = HitSink::new(settings.self_echo_guard);
        port.start_rx(hits.clone())?;
        log::info!(
            "IR controller ready on {} path",
            IrPath::from_board(attached).as_str()
        );
        Ok(Self {
            port,
            signal: IrSignal::shoot(),
            hits,
            receive_active: true,
            paused: false,
            failed: false,
            external_board_attached: attached,
            settle_polls: settings.board_settle_polls,
            settle_remaining: None,
        })
    }

    /// 发射射击信号（不限速，不确认）。
    pub fn send(&mut self) -> Result<(), IrError> {
        self.hits.mark_sent();
        self.port.transmit(&self.signal)
    }

    /// 边沿触发：每个命中只返回一次 true。
    pub fn receive(&mut self) -> bool {
        self.hits.take()
    }

    /// 是否有已解码但尚未处理的命中。
    pub fn is_processing_hit(&self) -> bool {
        self.hits.is_pending()
    }

    /// 暂停接收（幂等），暂停期间的命中全部丢弃。
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.stop_listener();
        self.hits.clear();
        log::debug!("IR receiver paused");
    }

    /// 恢复接收（幂等）；监听启动失败时控制器永久降级为只发不收。
    pub fn resume(&mut self) -> Result<(), IrError> {
        if !self.paused {
            return Ok(());
        }
        self.paused = false;
        if self.failed {
            return Err(IrError::Disabled);
        }
        if self.settle_remaining.is_some() {
            // 外接板切换未稳定，稳定后再启动
            return Ok(());
        }
        log::debug!("IR receiver resumed");
        self.start_listener()
    }

    /// 每个 tick 调用：检测外接板插拔并切换路径。
    pub fn update_board_status(&mut self) -> Result<(), IrError> {
        let present = self.port.external_board_present();
        if present != self.external_board_attached {
            self.external_board_attached = present;
            let path = IrPath::from_board(present);
            log::info!("IR board change detected, switching to {} path", path.as_str());
            self.stop_listener();
            if let Err(err) = self.port.route_to(path) {
                self.failed = true;
                self.settle_remaining = None;
                log::error!("IR route switch failed: {:?}", err);
                return Err(err);
            }
            self.settle_remaining = Some(self.settle_polls);
        }

        match self.settle_remaining {
            Some(remaining) if remaining > 0 => {
                self.settle_remaining = Some(remaining - 1);
                Ok(())
            }
            Some(_) => {
                self.settle_remaining = None;
                if self.paused || self.failed {
                    return Ok(());
                }
                self.start_listener()
            }
            None => Ok(()),
        }
    }

    pub fn is_receive_active(&self) -> bool {
        self.receive_active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_external_board_attached(&self) -> bool {
        self.external_board_attached
    }

    /// 接收功能是否仍可用。
    pub fn is_available(&self) -> bool {
        !self.failed
    }

    /// 释放控制器：停止监听并交还硬件，供下一局重新打开。
    pub fn shutdown(mut self) -> Box<dyn IrTransceiver> {
        self.stop_listener();
        self.hits.clear();
        log::info!("IR controller released");
        self.port
    }

    fn start_listener(&mut self) -> Result<(), IrError> {
        if self.receive_active {
            return Ok(());
        }
        match self.port.start_rx(self.hits.clone()) {
            Ok(()) => {
                self.receive_active = true;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                log::error!("IR listener start failed, hit detection disabled: {:?}", err);
                Err(err)
            }
        }
    }

    fn stop_listener(&mut self) {
        if self.receive_active {
            self.port.stop_rx();
            self.receive_active = false;
        }
    }
}
