use std::fmt;

use crate::game_state::GameState;

/// 道具标签载荷长度。
pub const POWER_UP_LEN: usize = 5;
/// 载荷魔数。
pub const POWER_UP_MAGIC: [u8; 2] = [0x13, 0x37];
/// 动作码：补充弹药。
pub const ACTION_AMMO_REFILL: u8 = 0xFD;

/// 道具动作。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerUpAction {
    AmmoRefill(u8),
    Unknown { code: u8, amount: u8 },
}

/// 道具标签（0x13 0x37 保留位 动作码 数量）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerUpTag {
    pub reserved: u8,
    pub action_code: u8,
    pub amount: u8,
}

/// 标签解析错误类型。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PowerUpError {
    BadLength(usize),
    BadMagic([u8; 2]),
}

/// 应用道具后的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerUpOutcome {
    /// 实际增加的弹药（可能为 0）。
    Refilled(u16),
    Ignored,
}

impl PowerUpTag {
    /// 解析原始载荷，校验长度与魔数。
    pub fn parse(data: &[u8]) -> Result<Self, PowerUpError> {
        if data.len() != POWER_UP_LEN {
            return Err(PowerUpError::BadLength(data.len()));
        }
        if data[0..2] != POWER_UP_MAGIC {
            return Err(PowerUpError::BadMagic([data[0], data[1]]));
        }
        Ok(Self {
            reserved: data[2],
            action_code: data[3],
            amount: data[4],
        })
    }

    pub fn action(&self) -> PowerUpAction {
        match self.action_code {
            ACTION_AMMO_REFILL => PowerUpAction::AmmoRefill(self.amount),
            code => PowerUpAction::Unknown {
                code,
                amount: self.amount,
            },
        }
    }

    /// 作用到游戏状态：补弹量不超过弹匣剩余空间。
    pub fn apply(&self, state: &mut GameState) -> PowerUpOutcome {
        match self.action() {
            PowerUpAction::AmmoRefill(amount) => {
                let delta = (amount as u16).min(state.headroom());
                state.increase_ammo(delta);
                log::debug!("Increased ammo by: {}", delta);
                PowerUpOutcome::Refilled(delta)
            }
            PowerUpAction::Unknown { code, amount } => {
                log::warn!("Tag action unknown: {:02x} {:02x}", code, amount);
                PowerUpOutcome::Ignored
            }
        }
    }
}

impl fmt::Display for PowerUpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x} {:02x}",
            POWER_UP_MAGIC[0], POWER_UP_MAGIC[1], self.reserved, self.action_code, self.amount
        )
    }
}

/// 解析并应用载荷；格式不符的标签静默忽略。
pub fn apply_payload(data: &[u8], state: &mut GameState) -> PowerUpOutcome {
    match PowerUpTag::parse(data) {
        Ok(tag) => tag.apply(state),
        Err(err) => {
            log::debug!("Tag is not for game: {:?} data={:02x?}", err, data);
            PowerUpOutcome::Ignored
        }
    }
}
