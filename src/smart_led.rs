use std::time::Duration;

use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::{FixedLengthSignal, PinState, Pulse, RmtChannel, TxRmtDriver};
use esp_idf_hal::sys::EspError;
use smart_leds::{SmartLedsWrite, RGB8};

use laser_tag::feedback::{Rgb, Step, StepSink};

// 亮度缩放（约 30%）。
const BRIGHTNESS_SCALE: u16 = 77;

/// WS2812 位时序：(0 高, 0 低, 1 高, 1 低)。
struct BitPulses {
    zero: (Pulse, Pulse),
    one: (Pulse, Pulse),
}

/// 单颗 WS2812 状态灯（通过 RMT 发送）。
pub struct StatusLed {
    tx: TxRmtDriver<'static>,
    bits: BitPulses,
}

impl StatusLed {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> Result<Self, EspError>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let tx = TxRmtDriver::new(channel, pin, &TransmitConfig::new().clock_divider(1))?;
        let hz = tx.counter_clock()?;
        let pulse = |state, nanos| Pulse::new_with_duration(hz, state, &Duration::from_nanos(nanos));
        let bits = BitPulses {
            zero: (pulse(PinState::High, 350)?, pulse(PinState::Low, 800)?),
            one: (pulse(PinState::High, 700)?, pulse(PinState::Low, 600)?),
        };
        Ok(Self { tx, bits })
    }

    fn frame(&self, color: RGB8) -> Result<FixedLengthSignal<24>, EspError> {
        let scale = |v: u8| ((v as u16 * BRIGHTNESS_SCALE) / 255) as u8;
        let grb = [scale(color.g), scale(color.r), scale(color.b)];
        let mut signal = FixedLengthSignal::<24>::new();
        for (index, bit) in grb
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |i| byte & (1 << i) != 0))
            .enumerate()
        {
            let pair = if bit { &self.bits.one } else { &self.bits.zero };
            signal.set(index, pair)?;
        }
        Ok(signal)
    }
}

impl SmartLedsWrite for StatusLed {
    type Color = RGB8;
    type Error = EspError;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let color = iterator.into_iter().next().map(Into::into).unwrap_or_default();
        let signal = self.frame(color)?;
        self.tx.start_blocking(&signal)
    }
}

/// 提示输出：状态灯、振动马达、蜂鸣器。
pub struct FeedbackOutputs {
    led: StatusLed,
    vibro: PinDriver<'static, AnyOutputPin, Output>,
    buzzer: PinDriver<'static, AnyOutputPin, Output>,
}

impl FeedbackOutputs {
    pub fn new(led: StatusLed, vibro: AnyOutputPin, buzzer: AnyOutputPin) -> Result<Self, EspError> {
        let mut vibro = PinDriver::output(vibro)?;
        let mut buzzer = PinDriver::output(buzzer)?;
        vibro.set_low()?;
        buzzer.set_low()?;
        let mut outputs = Self { led, vibro, buzzer };
        outputs.apply(Step::Led(Rgb::OFF));
        Ok(outputs)
    }
}

impl StepSink for FeedbackOutputs {
    fn apply(&mut self, step: Step) {
        let result = match step {
            Step::Led(rgb) => self.led.write([RGB8::new(rgb.r, rgb.g, rgb.b)]),
            Step::Vibro(on) => self.vibro.set_level(on.into()),
            Step::Buzzer(on) => self.buzzer.set_level(on.into()),
            Step::DelayMs(_) => Ok(()),
        };
        if let Err(err) = result {
            log::warn!("Feedback output {:?} failed: {:?}", step, err);
        }
    }
}
