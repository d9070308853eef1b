use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;

use crate::feedback::Feedback;
use crate::game_state::GameState;
use crate::hud::Renderer;
use crate::infrared::{InfraredController, IrError, IrTransceiver};
use crate::model::{Effect, GameSettings, InputEvent, InputKey, Screen, SessionPhase, INITIAL_AMMO};
use crate::power_up;
use crate::tag_reader::{TagReader, TagTechnology};

/// 会话错误类型（只有开局分配失败会终止会话）。
#[derive(Debug)]
pub enum SessionError {
    Infrared(IrError),
    NoTransceiver,
}

impl From<IrError> for SessionError {
    fn from(err: IrError) -> Self {
        SessionError::Infrared(err)
    }
}

/// 单次循环后的走向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// 主循环的输入通道集合（按键、秒定时器）。
pub struct SessionChannels {
    pub input_tx: Sender<InputEvent>,
    pub input_rx: Receiver<InputEvent>,
    pub tick_tx: Sender<()>,
    pub tick_rx: Receiver<()>,
}

impl SessionChannels {
    pub fn new() -> Self {
        let (input_tx, input_rx) = mpsc::channel();
        let (tick_tx, tick_rx) = mpsc::channel();
        Self {
            input_tx,
            input_rx,
            tick_tx,
            tick_rx,
        }
    }
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话依赖的外设与协作者。
pub struct SessionIo {
    pub infrared: Box<dyn IrTransceiver>,
    pub reader: TagReader,
    pub feedback: Box<dyn Feedback>,
    pub renderer: Box<dyn Renderer>,
    pub input_rx: Receiver<InputEvent>,
    pub tick_rx: Receiver<()>,
}

/// 游戏会话：主轮询循环，驱动红外控制器与读卡器并维护游戏状态。
pub struct SessionController {
    settings: GameSettings,
    phase: SessionPhase,
    state: GameState,
    ir_port: Option<Box<dyn IrTransceiver>>,
    ir: Option<InfraredController>,
    reader: TagReader,
    tag_rx: Receiver<Vec<u8>>,
    input_rx: Receiver<InputEvent>,
    tick_rx: Receiver<()>,
    feedback: Box<dyn Feedback>,
    renderer: Box<dyn Renderer>,
    need_redraw: bool,
}

impl SessionController {
    pub fn new(settings: GameSettings, io: SessionIo) -> Self {
        let SessionIo {
            infrared,
            mut reader,
            feedback,
            renderer,
            input_rx,
            tick_rx,
        } = io;
        // 扫描线程只投递载荷，状态修改留在主循环
        let (tag_tx, tag_rx) = mpsc::channel();
        reader.register_callback(TagTechnology::Em4100, move |data| {
            if tag_tx.send(data.to_vec()).is_err() {
                log::debug!("Session gone, tag dropped");
            }
        });
        log::info!("Initial state set to Splash");
        Self {
            settings,
            phase: SessionPhase::Splash,
            state: GameState::new(),
            ir_port: Some(infrared),
            ir: None,
            reader,
            tag_rx,
            input_rx,
            tick_rx,
            feedback,
            renderer,
            need_redraw: true,
        }
    }

    /// 运行主循环直到退出；返回前释放红外与读卡器。
    pub fn run(&mut self) -> Result<(), SessionError> {
        log::info!("Laser tag session starting");
        let result = loop {
            match self.tick() {
                Ok(Flow::Continue) => thread::sleep(self.settings.tick_interval),
                Ok(Flow::Exit) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.teardown();
        log::info!("Laser tag session exiting");
        result
    }

    /// 执行一次循环：热插拔检测、按键、定时器、命中、重绘。
    pub fn tick(&mut self) -> Result<Flow, SessionError> {
        // 开始画面没有控制器，外接板状态在开局 open 时读取
        if let Some(ir) = self.ir.as_mut() {
            if let Err(err) = ir.update_board_status() {
                log::warn!("IR board switch failed, hit detection disabled: {:?}", err);
            }
        }

        match self.input_rx.recv_timeout(self.settings.input_timeout) {
            Ok(event) => {
                if self.dispatch(event)? == Flow::Exit {
                    return Ok(Flow::Exit);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Input source closed, exiting");
                return Ok(Flow::Exit);
            }
        }

        let ticks = self.tick_rx.try_iter().count() as u32;
        if ticks > 0 {
            if self.phase == SessionPhase::Active {
                self.state.update_time(ticks);
            }
            self.need_redraw = true;
        }

        if self.phase == SessionPhase::Active {
            let hit = self.ir.as_mut().map_or(false, |ir| ir.receive());
            if hit {
                self.handle_hit();
            }
            if self.state.is_game_over() {
                self.enter_game_over();
            }
        }

        if self.need_redraw {
            let screen = self.screen();
            self.renderer.render(&screen);
            self.need_redraw = false;
        }
        Ok(Flow::Continue)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn infrared(&self) -> Option<&InfraredController> {
        self.ir.as_ref()
    }

    /// 当前画面（渲染契约）。
    pub fn screen(&self) -> Screen {
        match self.phase {
            SessionPhase::Splash => Screen::Splash,
            SessionPhase::Active => Screen::Game(self.state.snapshot()),
            SessionPhase::GameOver => Screen::GameOver(self.state.snapshot()),
        }
    }

    fn dispatch(&mut self, event: InputEvent) -> Result<Flow, SessionError> {
        if !event.is_actionable() {
            return Ok(Flow::Continue);
        }
        log::debug!("Input event received: {}", event);
        match self.phase {
            SessionPhase::Splash => match event.key {
                InputKey::Ok => {
                    log::info!("Ok pressed, starting");
                    self.enter_game()?;
                }
                InputKey::Back => {
                    log::info!("Back key pressed, exiting");
                    return Ok(Flow::Exit);
                }
                _ => {}
            },
            SessionPhase::Active => match event.key {
                InputKey::Back => {
                    log::info!("Back key pressed, exiting");
                    return Ok(Flow::Exit);
                }
                InputKey::Ok => self.fire(),
                InputKey::Down => self.reload(),
                InputKey::Up => self.scan_for_power_up(),
            },
            SessionPhase::GameOver => {
                if event.key == InputKey::Ok {
                    log::info!("OK key pressed, restarting game");
                    self.restart();
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// 进入对局：重置状态并重新打开红外控制器（旧实例先完全释放）。
    fn enter_game(&mut self) -> Result<(), SessionError> {
        self.state.reset();
        let port = match self.ir.take() {
            Some(old) => old.shutdown(),
            None => self.ir_port.take().ok_or(SessionError::NoTransceiver)?,
        };
        match InfraredController::open(port, &self.settings) {
            Ok(ir) => self.ir = Some(ir),
            Err(err) => {
                log::error!("Failed to allocate IR controller: {:?}", err);
                return Err(err.into());
            }
        }
        self.phase = SessionPhase::Active;
        self.need_redraw = true;
        Ok(())
    }

    /// 结束画面返回开始画面，红外控制器随之释放。
    fn restart(&mut self) {
        self.state.reset();
        if let Some(ir) = self.ir.take() {
            self.ir_port = Some(ir.shutdown());
        }
        self.phase = SessionPhase::Splash;
        self.need_redraw = true;
    }

    fn fire(&mut self) {
        let Some(ir) = self.ir.as_mut() else {
            return;
        };
        if ir.is_processing_hit() {
            log::warn!("Cannot fire, hit is being processed");
            return;
        }
        if self.settings.fire_requires_ammo && self.state.ammo() == 0 {
            log::info!("Cannot fire, out of ammo");
            self.feedback.play(Effect::Failure);
            return;
        }
        if let Err(err) = ir.send() {
            log::warn!("IR send failed: {:?}", err);
        }
        self.state.decrease_ammo(1);
        log::debug!("Laser fired, ammo left {}", self.state.ammo());
        self.feedback.play(Effect::ShortBeep);
        self.feedback.play(Effect::Blink);
        self.need_redraw = true;
    }

    /// 弹药打空时瞬间装满；有余弹时不可补满。
    fn reload(&mut self) {
        if self.state.ammo() != 0 {
            return;
        }
        log::info!("Down key pressed, reloading ammo");
        self.state.increase_ammo(INITIAL_AMMO);
        self.need_redraw = true;
    }

    /// 扫描道具：暂停红外接收，在限定窗口内等待弹药变化，结束后恢复。
    fn scan_for_power_up(&mut self) {
        log::info!("Up key pressed, scanning for ammo");
        self.feedback.play(Effect::ShortBeep);
        let before = self.state.ammo();
        if let Some(ir) = self.ir.as_mut() {
            ir.pause();
        }
        // 丢弃上一个窗口残留的标签
        self.tag_rx.try_iter().for_each(drop);

        match self.reader.start() {
            Ok(()) => {
                for _ in 0..self.settings.scan_attempts {
                    thread::sleep(self.settings.scan_poll_interval);
                    self.drain_tags();
                    if self.state.ammo() != before {
                        break;
                    }
                }
                self.reader.stop();
                self.drain_tags();
            }
            Err(err) => log::warn!("RFID reader unavailable: {:?}", err),
        }

        if let Some(ir) = self.ir.as_mut() {
            if let Err(err) = ir.resume() {
                log::warn!("IR receive unavailable after scan: {:?}", err);
            }
        }
        if self.state.ammo() != before {
            self.feedback.play(Effect::Success);
        } else {
            self.feedback.play(Effect::Failure);
        }
        self.need_redraw = true;
    }

    fn drain_tags(&mut self) {
        while let Ok(data) = self.tag_rx.try_recv() {
            power_up::apply_payload(&data, &mut self.state);
        }
    }

    fn handle_hit(&mut self) {
        log::debug!("Handling hit, decreasing health by {}", self.settings.hit_damage);
        self.state.decrease_health(self.settings.hit_damage);
        self.feedback.play(Effect::Vibrate);
        self.need_redraw = true;
        if self.state.is_game_over() {
            self.enter_game_over();
        }
    }

    /// 每次进入结束状态只播放一次失败提示。
    fn enter_game_over(&mut self) {
        if self.phase != SessionPhase::Active {
            return;
        }
        log::info!("Game over, switching to Game Over screen");
        self.feedback.play(Effect::Failure);
        self.phase = SessionPhase::GameOver;
        self.need_redraw = true;
    }

    fn teardown(&mut self) {
        self.reader.stop();
        if let Some(ir) = self.ir.take() {
            self.ir_port = Some(ir.shutdown());
        }
    }

    #[cfg(test)]
    fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        mock_scanner, mock_transceiver, EffectLog, MockIrHandle, MockScannerHandle, ScreenLog,
    };
    use crate::model::INITIAL_HEALTH;
    use std::time::Duration;

    const REFILL_10: [u8; 5] = [0x13, 0x37, 0x00, 0xFD, 0x0A];

    struct Harness {
        session: SessionController,
        channels_tx: (Sender<InputEvent>, Sender<()>),
        ir: MockIrHandle,
        rfid: MockScannerHandle,
        effects: EffectLog,
        screens: ScreenLog,
    }

    fn fast_settings() -> GameSettings {
        GameSettings {
            tick_interval: Duration::ZERO,
            input_timeout: Duration::from_millis(1),
            scan_attempts: 5,
            scan_poll_interval: Duration::from_millis(1),
            board_settle_polls: 0,
            self_echo_guard: Duration::ZERO,
            ..GameSettings::default()
        }
    }

    fn harness_with(settings: GameSettings) -> Harness {
        let (infrared, ir) = mock_transceiver();
        let (scanner, rfid) = mock_scanner();
        let effects = EffectLog::default();
        let screens = ScreenLog::default();
        let channels = SessionChannels::new();
        let session = SessionController::new(
            settings,
            SessionIo {
                infrared,
                reader: TagReader::new(scanner),
                feedback: Box::new(effects.clone()),
                renderer: Box::new(screens.clone()),
                input_rx: channels.input_rx,
                tick_rx: channels.tick_rx,
            },
        );
        Harness {
            session,
            channels_tx: (channels.input_tx, channels.tick_tx),
            ir,
            rfid,
            effects,
            screens,
        }
    }

    fn harness() -> Harness {
        harness_with(fast_settings())
    }

    impl Harness {
        fn send(&mut self, event: InputEvent) -> Flow {
            self.channels_tx.0.send(event).unwrap();
            self.session.tick().unwrap()
        }

        fn press(&mut self, key: InputKey) -> Flow {
            self.send(InputEvent::press(key))
        }

        fn idle(&mut self) -> Flow {
            self.session.tick().unwrap()
        }

        fn second(&mut self) {
            self.channels_tx.1.send(()).unwrap();
        }

        fn start_game(&mut self) {
            assert_eq!(self.press(InputKey::Ok), Flow::Continue);
            assert_eq!(self.session.phase(), SessionPhase::Active);
        }

        fn hit(&mut self) {
            assert!(self.ir.shoot());
            self.idle();
        }
    }

    #[test]
    fn splash_ok_starts_game_with_fresh_state() {
        let mut h = harness();
        h.start_game();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        assert!(h.ir.is_listening());
        assert!(matches!(h.screens.last(), Some(Screen::Game(_))));
    }

    #[test]
    fn back_exits_from_splash_and_game() {
        let mut h = harness();
        assert_eq!(h.press(InputKey::Back), Flow::Exit);

        let mut h = harness();
        h.start_game();
        assert_eq!(h.press(InputKey::Back), Flow::Exit);
    }

    #[test]
    fn run_releases_infrared_on_exit() {
        let mut h = harness();
        h.start_game();
        h.channels_tx.0.send(InputEvent::press(InputKey::Back)).unwrap();
        h.session.run().unwrap();
        assert!(!h.ir.is_listening());
        assert!(h.session.infrared().is_none());
    }

    #[test]
    fn release_events_are_ignored() {
        let mut h = harness();
        h.send(InputEvent::release(InputKey::Ok));
        assert_eq!(h.session.phase(), SessionPhase::Splash);
        h.send(InputEvent::repeat(InputKey::Ok));
        assert_eq!(h.session.phase(), SessionPhase::Active);
    }

    #[test]
    fn fire_transmits_and_spends_ammo() {
        let mut h = harness();
        h.start_game();
        for _ in 0..3 {
            h.press(InputKey::Ok);
        }
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO - 3);
        assert_eq!(h.ir.sent().len(), 3);
        assert_eq!(h.effects.count(Effect::ShortBeep), 3);
        assert_eq!(h.effects.count(Effect::Blink), 3);
    }

    #[test]
    fn fire_at_zero_ammo_still_transmits() {
        let mut h = harness();
        h.start_game();
        h.session.state_mut().decrease_ammo(INITIAL_AMMO);
        h.press(InputKey::Ok);
        assert_eq!(h.session.state().ammo(), 0);
        assert_eq!(h.ir.sent().len(), 1);
    }

    #[test]
    fn fire_gated_on_empty_when_configured() {
        let mut settings = fast_settings();
        settings.fire_requires_ammo = true;
        let mut h = harness_with(settings);
        h.start_game();
        h.session.state_mut().decrease_ammo(INITIAL_AMMO);
        h.press(InputKey::Ok);
        assert!(h.ir.sent().is_empty());
        assert_eq!(h.effects.last(), Some(Effect::Failure));
        assert_eq!(h.session.phase(), SessionPhase::Active);
    }

    #[test]
    fn fire_rejected_while_hit_pending() {
        let mut h = harness();
        h.start_game();
        assert!(h.ir.shoot());
        h.press(InputKey::Ok);
        assert!(h.ir.sent().is_empty());
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        // 同一次循环内命中被处理
        assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10);
        h.press(InputKey::Ok);
        assert_eq!(h.ir.sent().len(), 1);
    }

    #[test]
    fn down_reloads_only_when_empty() {
        let mut h = harness();
        h.start_game();
        h.session.state_mut().decrease_ammo(INITIAL_AMMO - 1);
        h.press(InputKey::Down);
        assert_eq!(h.session.state().ammo(), 1);
        h.press(InputKey::Ok);
        assert_eq!(h.session.state().ammo(), 0);
        h.press(InputKey::Down);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
    }

    #[test]
    fn hit_costs_health_and_vibrates() {
        let mut h = harness();
        h.start_game();
        h.hit();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10);
        assert_eq!(h.effects.count(Effect::Vibrate), 1);
        // 边沿触发：无新命中时不再扣血
        h.idle();
        h.idle();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10);
    }

    #[test]
    fn hits_ignored_outside_game() {
        let mut h = harness();
        assert!(!h.ir.shoot());
        h.idle();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH);
    }

    #[test]
    fn scan_applies_refill_and_resumes_infrared() {
        let mut h = harness();
        h.start_game();
        h.session.state_mut().decrease_ammo(3);
        h.rfid.queue_on_start(&REFILL_10);
        h.press(InputKey::Up);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        assert_eq!(h.effects.all().first(), Some(&Effect::ShortBeep));
        assert_eq!(h.effects.last(), Some(Effect::Success));
        assert!(!h.rfid.is_running());
        assert!(h.ir.is_listening());
        assert_eq!(h.ir.starts(), 2);
    }

    #[test]
    fn scan_stops_once_ammo_changes() {
        let mut h = harness_with(GameSettings {
            scan_attempts: 200,
            scan_poll_interval: Duration::from_millis(10),
            ..fast_settings()
        });
        h.start_game();
        h.session.state_mut().decrease_ammo(3);
        h.rfid.queue_on_start(&REFILL_10);
        let started = std::time::Instant::now();
        h.press(InputKey::Up);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        assert_eq!(h.effects.last(), Some(Effect::Success));
    }

    #[test]
    fn scan_at_full_ammo_reports_failure() {
        let mut h = harness();
        h.start_game();
        h.rfid.queue_on_start(&REFILL_10);
        h.press(InputKey::Up);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        assert_eq!(h.effects.last(), Some(Effect::Failure));
    }

    #[test]
    fn scan_ignores_foreign_tags() {
        let mut h = harness();
        h.start_game();
        h.session.state_mut().decrease_ammo(50);
        h.rfid.queue_on_start(&[0xDE, 0xAD, 0x00, 0xFD, 0x0A]);
        h.rfid.queue_on_start(&REFILL_10[..4]);
        h.rfid.queue_on_start(&[0x13, 0x37, 0x00, 0x01, 0x0A]);
        h.press(InputKey::Up);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO - 50);
        assert_eq!(h.effects.last(), Some(Effect::Failure));
        assert!(h.ir.is_listening());
    }

    #[test]
    fn scan_without_reader_still_resumes_infrared() {
        let mut h = harness();
        h.start_game();
        h.rfid.fail_start(true);
        h.press(InputKey::Up);
        assert_eq!(h.effects.last(), Some(Effect::Failure));
        assert!(h.ir.is_listening());
    }

    #[test]
    fn pending_hit_lost_when_scan_starts() {
        let mut h = harness();
        h.start_game();
        assert!(h.ir.shoot());
        h.press(InputKey::Up);
        assert_eq!(h.session.state().health(), INITIAL_HEALTH);
    }

    #[test]
    fn infrared_failure_after_scan_keeps_session_alive() {
        let mut h = harness();
        h.start_game();
        h.ir.fail_start(true);
        h.press(InputKey::Up);
        assert_eq!(h.session.phase(), SessionPhase::Active);
        assert!(h.session.infrared().is_some_and(|ir| !ir.is_available()));
        assert!(!h.ir.shoot());
        h.idle();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH);
        h.press(InputKey::Ok);
        assert_eq!(h.ir.sent().len(), 1);
    }

    #[test]
    fn start_fails_when_listener_cannot_start() {
        let mut h = harness();
        h.ir.fail_start(true);
        h.channels_tx.0.send(InputEvent::press(InputKey::Ok)).unwrap();
        assert!(matches!(
            h.session.tick(),
            Err(SessionError::Infrared(IrError::Driver { .. }))
        ));
    }

    #[test]
    fn board_hot_plug_reroutes_during_play() {
        let mut h = harness();
        h.start_game();
        h.ir.set_board(true);
        h.idle();
        assert!(h.session.infrared().is_some_and(|ir| ir.is_external_board_attached()));
        assert!(h.ir.is_listening());
        h.hit();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10);
    }

    #[test]
    fn timer_advances_only_during_play() {
        let mut h = harness();
        h.second();
        h.idle();
        assert_eq!(h.session.state().elapsed_time(), 0);
        h.start_game();
        h.second();
        h.second();
        h.idle();
        assert_eq!(h.session.state().elapsed_time(), 2);
        match h.screens.last() {
            Some(Screen::Game(hud)) => assert_eq!(hud.elapsed_time, 2),
            other => panic!("unexpected screen {:?}", other),
        }
    }

    #[test]
    fn redraw_only_when_dirty() {
        let mut h = harness();
        h.idle();
        assert_eq!(h.screens.len(), 1);
        h.idle();
        h.idle();
        assert_eq!(h.screens.len(), 1);
        h.press(InputKey::Up);
        assert_eq!(h.screens.len(), 1);
        h.start_game();
        assert_eq!(h.screens.len(), 2);
    }

    #[test]
    fn full_round_and_restart() {
        let mut h = harness();
        h.start_game();
        for _ in 0..5 {
            h.press(InputKey::Ok);
        }
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO - 5);

        for i in 1..=10u16 {
            assert!(!h.session.state().is_game_over());
            h.hit();
            assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10 * i);
        }
        assert!(h.session.state().is_game_over());
        assert_eq!(h.session.phase(), SessionPhase::GameOver);
        assert_eq!(h.effects.count(Effect::Failure), 1);
        assert!(matches!(h.screens.last(), Some(Screen::GameOver(_))));

        // 结束状态下的后续循环与无关按键不再触发失败提示
        h.idle();
        h.press(InputKey::Back);
        h.press(InputKey::Up);
        assert_eq!(h.session.phase(), SessionPhase::GameOver);
        assert_eq!(h.effects.count(Effect::Failure), 1);

        h.press(InputKey::Ok);
        assert_eq!(h.session.phase(), SessionPhase::Splash);
        assert_eq!(h.session.state().health(), INITIAL_HEALTH);
        assert_eq!(h.session.state().ammo(), INITIAL_AMMO);
        assert!(h.session.infrared().is_none());
        assert!(!h.ir.is_listening());

        h.start_game();
        assert!(h.ir.is_listening());
        assert_eq!(h.session.state().elapsed_time(), 0);
        h.hit();
        assert_eq!(h.session.state().health(), INITIAL_HEALTH - 10);
    }
}
