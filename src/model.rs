use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// 满血值。
pub const INITIAL_HEALTH: u16 = 100;
/// 弹匣容量（开局与装填后的弹药数）。
pub const INITIAL_AMMO: u16 = 100;
/// 默认每次命中扣除的血量。
pub const DEFAULT_HIT_DAMAGE: u16 = 10;

/// 物理按键（确认/返回/上/下）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputKey {
    Ok,
    Back,
    Up,
    Down,
}

impl InputKey {
    pub const ALL: [InputKey; 4] = [InputKey::Ok, InputKey::Back, InputKey::Up, InputKey::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKey::Ok => "ok",
            InputKey::Back => "back",
            InputKey::Up => "up",
            InputKey::Down => "down",
        }
    }
}

/// 按键事件类型（按下/连发/松开）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    Press,
    Repeat,
    Release,
}

/// 按键事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    pub key: InputKey,
    pub kind: InputType,
}

impl InputEvent {
    pub fn press(key: InputKey) -> Self {
        Self {
            key,
            kind: InputType::Press,
        }
    }

    pub fn repeat(key: InputKey) -> Self {
        Self {
            key,
            kind: InputType::Repeat,
        }
    }

    pub fn release(key: InputKey) -> Self {
        Self {
            key,
            kind: InputType::Release,
        }
    }

    /// 只有按下与连发会触发游戏动作。
    pub fn is_actionable(&self) -> bool {
        matches!(self.kind, InputType::Press | InputType::Repeat)
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.key.as_str(), self.kind)
    }
}

/// 提示效果（蜂鸣/振动/闪灯/成功/失败），具体播放由外部实现。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    ShortBeep,
    Vibrate,
    Blink,
    Success,
    Failure,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::ShortBeep => "short_beep",
            Effect::Vibrate => "vibrate",
            Effect::Blink => "blink",
            Effect::Success => "success",
            Effect::Failure => "failure",
        }
    }
}

/// 会话阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Splash,
    Active,
    GameOver,
}

/// 供显示层读取的状态快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HudSnapshot {
    pub health: u16,
    pub ammo: u16,
    pub max_ammo: u16,
    pub elapsed_time: u32,
}

/// 当前需要渲染的画面。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Splash,
    Game(HudSnapshot),
    GameOver(HudSnapshot),
}

/// 游戏运行参数（可配置项）。
#[derive(Clone, Debug, Serialize)]
pub struct GameSettings {
    pub hit_damage: u16,
    pub tick_interval: Duration,
    pub input_timeout: Duration,
    pub scan_attempts: u32,
    pub scan_poll_interval: Duration,
    pub board_settle_polls: u8,
    pub self_echo_guard: Duration,
    pub fire_requires_ammo: bool,
    pub rfid_repeat_window: Duration,
}

impl GameSettings {
    /// 读取编译期覆盖项（来自 .env 白名单）。
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(damage) = option_env!("HIT_DAMAGE").and_then(|v| v.parse::<u16>().ok()) {
            settings.hit_damage = damage;
        }
        if let Some(window_ms) = option_env!("SCAN_WINDOW_MS").and_then(|v| v.parse::<u64>().ok()) {
            settings.set_scan_window(Duration::from_millis(window_ms));
        }
        if let Some(flag) = option_env!("FIRE_REQUIRES_AMMO").and_then(|v| v.parse::<bool>().ok()) {
            settings.fire_requires_ammo = flag;
        }
        settings
    }

    /// 扫描窗口总时长。
    pub fn scan_window(&self) -> Duration {
        self.scan_poll_interval * self.scan_attempts
    }

    /// 按轮询间隔换算扫描次数（至少一次）。
    pub fn set_scan_window(&mut self, window: Duration) {
        let step = self.scan_poll_interval.as_millis().max(1);
        let attempts = (window.as_millis() / step).max(1);
        self.scan_attempts = attempts.min(u32::MAX as u128) as u32;
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            hit_damage: DEFAULT_HIT_DAMAGE,
            tick_interval: Duration::from_millis(10),
            input_timeout: Duration::from_millis(100),
            scan_attempts: 30,
            scan_poll_interval: Duration::from_millis(100),
            board_settle_polls: 5,
            self_echo_guard: Duration::from_millis(150),
            fire_requires_ammo: false,
            rfid_repeat_window: Duration::from_secs(1),
        }
    }
}
