use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::model::Effect;

/// 提示效果播放接口（蜂鸣/振动/灯光由设备实现）。
pub trait Feedback {
    fn play(&mut self, effect: Effect);
}

/// RGB 颜色。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
    pub const GREEN: Rgb = Rgb { r: 0, g: 255, b: 0 };
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
}

/// 效果序列中的一步。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Led(Rgb),
    Vibro(bool),
    Buzzer(bool),
    DelayMs(u16),
}

const SHORT_BEEP: &[Step] = &[Step::Buzzer(true), Step::DelayMs(50), Step::Buzzer(false)];
const VIBRATE: &[Step] = &[Step::Vibro(true), Step::DelayMs(100), Step::Vibro(false)];
const BLINK: &[Step] = &[Step::Led(Rgb::WHITE), Step::DelayMs(100), Step::Led(Rgb::OFF)];
const SUCCESS: &[Step] = &[
    Step::Led(Rgb::GREEN),
    Step::Buzzer(true),
    Step::DelayMs(50),
    Step::Buzzer(false),
    Step::DelayMs(50),
    Step::Buzzer(true),
    Step::DelayMs(50),
    Step::Buzzer(false),
    Step::DelayMs(200),
    Step::Led(Rgb::OFF),
];
const FAILURE: &[Step] = &[
    Step::Led(Rgb::RED),
    Step::Vibro(true),
    Step::Buzzer(true),
    Step::DelayMs(400),
    Step::Buzzer(false),
    Step::Vibro(false),
    Step::DelayMs(200),
    Step::Led(Rgb::OFF),
];

/// 效果对应的步骤序列。
pub fn sequence(effect: Effect) -> &'static [Step] {
    match effect {
        Effect::ShortBeep => SHORT_BEEP,
        Effect::Vibrate => VIBRATE,
        Effect::Blink => BLINK,
        Effect::Success => SUCCESS,
        Effect::Failure => FAILURE,
    }
}

/// 执行步骤的输出设备。
pub trait StepSink {
    fn apply(&mut self, step: Step);
}

/// 通过通道把效果交给后台线程播放，主循环不被阻塞。
pub struct EffectQueue {
    tx: Sender<Effect>,
}

impl EffectQueue {
    pub fn new(tx: Sender<Effect>) -> Self {
        Self { tx }
    }
}

impl Feedback for EffectQueue {
    fn play(&mut self, effect: Effect) {
        if self.tx.send(effect).is_err() {
            log::warn!("Feedback player gone, dropped {}", effect.as_str());
        }
    }
}

/// 启动效果播放线程：逐个效果按顺序执行。
pub fn spawn_effect_player<S>(mut sink: S, effect_rx: Receiver<Effect>) -> thread::JoinHandle<()>
where
    S: StepSink + Send + 'static,
{
    thread::spawn(move || {
        while let Ok(effect) = effect_rx.recv() {
            log::debug!("Playing {}", effect.as_str());
            play_sequence(&mut sink, sequence(effect));
        }
    })
}

/// 按顺序执行序列，延时步骤阻塞当前线程。
pub fn play_sequence<S: StepSink>(sink: &mut S, steps: &[Step]) {
    for step in steps {
        match *step {
            Step::DelayMs(ms) => thread::sleep(Duration::from_millis(ms as u64)),
            other => sink.apply(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        steps: Arc<Mutex<Vec<Step>>>,
    }

    impl StepSink for Recorder {
        fn apply(&mut self, step: Step) {
            self.steps.lock().unwrap().push(step);
        }
    }

    const ALL: [Effect; 5] = [
        Effect::ShortBeep,
        Effect::Vibrate,
        Effect::Blink,
        Effect::Success,
        Effect::Failure,
    ];

    #[test]
    fn every_sequence_ends_quiet() {
        for effect in ALL {
            let mut led = Rgb::OFF;
            let mut vibro = false;
            let mut buzzer = false;
            for step in sequence(effect) {
                match *step {
                    Step::Led(color) => led = color,
                    Step::Vibro(on) => vibro = on,
                    Step::Buzzer(on) => buzzer = on,
                    Step::DelayMs(_) => {}
                }
            }
            assert_eq!(led, Rgb::OFF, "{:?}", effect);
            assert!(!vibro, "{:?}", effect);
            assert!(!buzzer, "{:?}", effect);
        }
    }

    #[test]
    fn player_skips_delays_in_sink() {
        let recorder = Recorder::default();
        let steps = recorder.steps.clone();
        let (tx, rx) = mpsc::channel();
        let handle = spawn_effect_player(recorder, rx);
        let mut queue = EffectQueue::new(tx);
        queue.play(Effect::Blink);
        drop(queue);
        handle.join().unwrap();
        assert_eq!(
            *steps.lock().unwrap(),
            vec![Step::Led(Rgb::WHITE), Step::Led(Rgb::OFF)]
        );
    }
}
