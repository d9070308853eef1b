use crate::model::{HudSnapshot, INITIAL_AMMO, INITIAL_HEALTH};

/// 单局游戏状态（血量/弹药/计时），只在主循环中访问。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    health: u16,
    ammo: u16,
    elapsed_time: u32,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            health: INITIAL_HEALTH,
            ammo: INITIAL_AMMO,
            elapsed_time: 0,
        }
    }

    /// 所有字段恢复到开局值。
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn decrease_health(&mut self, amount: u16) {
        self.health = self.health.saturating_sub(amount);
    }

    pub fn decrease_ammo(&mut self, amount: u16) {
        self.ammo = self.ammo.saturating_sub(amount);
    }

    /// 增加弹药，上限为弹匣容量。
    pub fn increase_ammo(&mut self, amount: u16) {
        self.ammo = self.ammo.saturating_add(amount).min(INITIAL_AMMO);
    }

    pub fn ammo(&self) -> u16 {
        self.ammo
    }

    pub fn health(&self) -> u16 {
        self.health
    }

    pub fn elapsed_time(&self) -> u32 {
        self.elapsed_time
    }

    /// 距离满弹匣还差多少。
    pub fn headroom(&self) -> u16 {
        INITIAL_AMMO - self.ammo
    }

    pub fn update_time(&mut self, delta_secs: u32) {
        self.elapsed_time = self.elapsed_time.saturating_add(delta_secs);
    }

    pub fn is_game_over(&self) -> bool {
        self.health == 0
    }

    pub fn snapshot(&self) -> HudSnapshot {
        HudSnapshot {
            health: self.health,
            ammo: self.ammo,
            max_ammo: INITIAL_AMMO,
            elapsed_time: self.elapsed_time,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
