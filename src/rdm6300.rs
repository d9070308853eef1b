use std::time::{Duration, Instant};

/// RDM6300 串口帧：STX + 10 位 ASCII 十六进制数据 + 2 位校验 + ETX。
pub const FRAME_STX: u8 = 0x02;
pub const FRAME_ETX: u8 = 0x03;
pub const FRAME_LEN: usize = 14;
/// 数据字节数（EM4100：版本/客户码 + 4 字节 ID）。
pub const TAG_DATA_LEN: usize = 5;

/// 解码错误类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    BadHex,
    BadChecksum,
    MissingEtx,
}

/// 帧读取器：逐字节组装完整帧，出错后等待下一个 STX 重新同步。
pub struct Rdm6300Reader {
    buffer: Vec<u8>,
}

impl Rdm6300Reader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// 推入一个字节，若解析完成则返回标签数据或错误。
    pub fn push(&mut self, byte: u8) -> Option<Result<[u8; TAG_DATA_LEN], FrameError>> {
        if self.buffer.is_empty() && byte != FRAME_STX {
            return None;
        }
        if byte == FRAME_STX && !self.buffer.is_empty() {
            // 帧中途出现 STX，丢弃残帧重新开始
            self.buffer.clear();
        }
        self.buffer.push(byte);

        if self.buffer.len() < FRAME_LEN {
            return None;
        }
        let result = decode_frame(&self.buffer);
        self.buffer.clear();
        Some(result)
    }
}

impl Default for Rdm6300Reader {
    fn default() -> Self {
        Self::new()
    }
}

/// 解码完整 14 字节帧。
pub fn decode_frame(frame: &[u8]) -> Result<[u8; TAG_DATA_LEN], FrameError> {
    if frame.len() != FRAME_LEN || frame[FRAME_LEN - 1] != FRAME_ETX {
        return Err(FrameError::MissingEtx);
    }
    let mut data = [0u8; TAG_DATA_LEN];
    for (i, pair) in frame[1..11].chunks(2).enumerate() {
        data[i] = hex_pair(pair[0], pair[1]).ok_or(FrameError::BadHex)?;
    }
    let checksum = hex_pair(frame[11], frame[12]).ok_or(FrameError::BadHex)?;
    let computed = data.iter().fold(0u8, |acc, b| acc ^ b);
    if checksum != computed {
        return Err(FrameError::BadChecksum);
    }
    Ok(data)
}

/// 编码为串口帧（用于测试与模拟器）。
pub fn encode_frame(data: &[u8; TAG_DATA_LEN]) -> [u8; FRAME_LEN] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = [0u8; FRAME_LEN];
    out[0] = FRAME_STX;
    for (i, byte) in data.iter().enumerate() {
        out[1 + i * 2] = DIGITS[(byte >> 4) as usize];
        out[2 + i * 2] = DIGITS[(byte & 0x0F) as usize];
    }
    let checksum = data.iter().fold(0u8, |acc, b| acc ^ b);
    out[11] = DIGITS[(checksum >> 4) as usize];
    out[12] = DIGITS[(checksum & 0x0F) as usize];
    out[13] = FRAME_ETX;
    out
}

/// 标签停留在天线上时模块会连续上报，窗口内相同标签只保留一次。
pub struct RepeatFilter {
    window: Duration,
    last: Option<([u8; TAG_DATA_LEN], Instant)>,
}

impl RepeatFilter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn allow(&mut self, data: &[u8; TAG_DATA_LEN], now: Instant) -> bool {
        if let Some((last, seen)) = self.last.as_mut() {
            if last == data && now.saturating_duration_since(*seen) <= self.window {
                *seen = now;
                return false;
            }
        }
        self.last = Some((*data, now));
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_val(hi)? << 4) | hex_val(lo)?)
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
