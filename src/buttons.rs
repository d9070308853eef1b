use std::time::{Duration, Instant};

use crate::model::{InputEvent, InputKey};

/// 长按后开始连发的时间。
pub const LONG_PRESS: Duration = Duration::from_millis(300);
/// 连发间隔。
pub const REPEAT_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Clone, Copy, Default)]
struct KeyState {
    pressed_at: Option<Instant>,
    last_repeat: Option<Instant>,
}

/// 按键扫描器：根据电平变化生成按下/连发/松开事件。
pub struct ButtonScanner {
    long_press: Duration,
    repeat_interval: Duration,
    keys: [KeyState; 4],
}

impl ButtonScanner {
    pub fn new(long_press: Duration, repeat_interval: Duration) -> Self {
        Self {
            long_press,
            repeat_interval,
            keys: [KeyState::default(); 4],
        }
    }

    /// 输入各键当前是否按下（顺序同 InputKey::ALL），返回本次产生的事件。
    pub fn scan(&mut self, pressed: [bool; 4], now: Instant) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for (idx, key) in InputKey::ALL.iter().enumerate() {
            let state = &mut self.keys[idx];
            match (state.pressed_at, pressed[idx]) {
                (None, true) => {
                    state.pressed_at = Some(now);
                    state.last_repeat = None;
                    events.push(InputEvent::press(*key));
                }
                (Some(since), true) => {
                    if now.saturating_duration_since(since) < self.long_press {
                        continue;
                    }
                    let due = match state.last_repeat {
                        Some(last) => now.saturating_duration_since(last) >= self.repeat_interval,
                        None => true,
                    };
                    if due {
                        state.last_repeat = Some(now);
                        events.push(InputEvent::repeat(*key));
                    }
                }
                (Some(_), false) => {
                    *state = KeyState::default();
                    events.push(InputEvent::release(*key));
                }
                (None, false) => {}
            }
        }
        events
    }
}

impl Default for ButtonScanner {
    fn default() -> Self {
        Self::new(LONG_PRESS, REPEAT_INTERVAL)
    }
}
