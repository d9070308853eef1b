// 模块划分：游戏状态、红外、道具标签、会话主循环，以及提示/显示/按键等外围
pub mod buttons;
pub mod feedback;
pub mod game_state;
pub mod hud;
pub mod infrared;
pub mod ir_codec;
pub mod model;
pub mod power_up;
pub mod rdm6300;
pub mod session;
pub mod tag_reader;

#[cfg(test)]
mod mock;
