// 红外 NEC 帧编解码（引导码 + 32 位数据 + 结束脉冲）。

/// 射击指令（唯一在用的命令字节）。
pub const IR_COMMAND_SHOOT: u8 = 0xA1;
/// 发射端地址，接收端不校验来源。
pub const IR_ADDRESS: u8 = 0x00;

/// NEC 时序（微秒）。
const LEADER_MARK_US: u32 = 9000;
const LEADER_SPACE_US: u32 = 4500;
const REPEAT_SPACE_US: u32 = 2250;
const BIT_MARK_US: u32 = 562;
const ZERO_SPACE_US: u32 = 562;
const ONE_SPACE_US: u32 = 1687;
const FRAME_BITS: usize = 32;

/// 单个电平段：mark 为载波发射（接收端低电平），space 为静默。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IrPulse {
    pub mark: bool,
    pub micros: u32,
}

impl IrPulse {
    pub fn mark(micros: u32) -> Self {
        Self { mark: true, micros }
    }

    pub fn space(micros: u32) -> Self {
        Self {
            mark: false,
            micros,
        }
    }
}

/// 解码后的红外帧。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IrFrame {
    pub address: u8,
    pub command: u8,
}

/// 解码错误类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NecError {
    TooShort,
    BadLeader,
    Repeat,
    BadBit(usize),
    BadChecksum,
}

/// 预先编码好的发射波形，每次开火复用。
#[derive(Clone, Debug)]
pub struct IrSignal {
    frame: IrFrame,
    pulses: Vec<IrPulse>,
}

impl IrSignal {
    pub fn nec(address: u8, command: u8) -> Self {
        let frame = IrFrame { address, command };
        Self {
            frame,
            pulses: encode_nec(&frame),
        }
    }

    /// 射击信号。
    pub fn shoot() -> Self {
        Self::nec(IR_ADDRESS, IR_COMMAND_SHOOT)
    }

    pub fn frame(&self) -> IrFrame {
        self.frame
    }

    pub fn pulses(&self) -> &[IrPulse] {
        &self.pulses
    }
}

/// 编码 NEC 帧（地址、地址反码、命令、命令反码，低位先发）。
pub fn encode_nec(frame: &IrFrame) -> Vec<IrPulse> {
    let mut out = Vec::with_capacity(2 + FRAME_BITS * 2 + 1);
    out.push(IrPulse::mark(LEADER_MARK_US));
    out.push(IrPulse::space(LEADER_SPACE_US));
    for byte in [frame.address, !frame.address, frame.command, !frame.command] {
        for bit in 0..8 {
            let space = if byte & (1 << bit) != 0 {
                ONE_SPACE_US
            } else {
                ZERO_SPACE_US
            };
            out.push(IrPulse::mark(BIT_MARK_US));
            out.push(IrPulse::space(space));
        }
    }
    out.push(IrPulse::mark(BIT_MARK_US));
    out
}

/// 解码 NEC 帧，容差 ±25%；结束脉冲可缺失（接收端空闲超时截断）。
pub fn decode_nec(pulses: &[IrPulse]) -> Result<IrFrame, NecError> {
    let pulses = skip_leading_space(pulses);
    if pulses.len() < 2 {
        return Err(NecError::TooShort);
    }
    if !is_mark(&pulses[0], LEADER_MARK_US) {
        return Err(NecError::BadLeader);
    }
    if is_space(&pulses[1], REPEAT_SPACE_US) {
        return Err(NecError::Repeat);
    }
    if !is_space(&pulses[1], LEADER_SPACE_US) {
        return Err(NecError::BadLeader);
    }
    if pulses.len() < 2 + FRAME_BITS * 2 {
        return Err(NecError::TooShort);
    }

    let mut bytes = [0u8; 4];
    for bit in 0..FRAME_BITS {
        let mark = &pulses[2 + bit * 2];
        let space = &pulses[3 + bit * 2];
        if !is_mark(mark, BIT_MARK_US) {
            return Err(NecError::BadBit(bit));
        }
        if is_space(space, ONE_SPACE_US) {
            bytes[bit / 8] |= 1 << (bit % 8);
        } else if !is_space(space, ZERO_SPACE_US) {
            return Err(NecError::BadBit(bit));
        }
    }

    if bytes[0] ^ bytes[1] != 0xFF || bytes[2] ^ bytes[3] != 0xFF {
        return Err(NecError::BadChecksum);
    }
    Ok(IrFrame {
        address: bytes[0],
        command: bytes[2],
    })
}

fn skip_leading_space(pulses: &[IrPulse]) -> &[IrPulse] {
    let start = pulses.iter().position(|p| p.mark).unwrap_or(pulses.len());
    &pulses[start..]
}

fn is_mark(pulse: &IrPulse, expected_us: u32) -> bool {
    pulse.mark && within_tolerance(pulse.micros, expected_us)
}

fn is_space(pulse: &IrPulse, expected_us: u32) -> bool {
    !pulse.mark && within_tolerance(pulse.micros, expected_us)
}

fn within_tolerance(actual: u32, expected: u32) -> bool {
    actual.abs_diff(expected) <= expected / 4
}
