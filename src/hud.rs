use crate::model::Screen;

/// 显示接口：会话只在状态变化时调用。
pub trait Renderer {
    fn render(&mut self, screen: &Screen);
}

/// 串口 HUD：无屏幕时把每次画面变化输出为一行 JSON 日志。
#[derive(Default)]
pub struct SerialHud {
    last: Option<Screen>,
}

impl SerialHud {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl Renderer for SerialHud {
    fn render(&mut self, screen: &Screen) {
        if self.last.as_ref() == Some(screen) {
            return;
        }
        self.last = Some(*screen);
        log::info!("HUD {}", screen_json(screen));
    }
}

/// 画面序列化为 JSON 字符串。
pub fn screen_json(screen: &Screen) -> String {
    let value = match screen {
        Screen::Splash => serde_json::json!({ "screen": "splash", "title": "Laser Tag: Free4All!" }),
        Screen::Game(hud) => serde_json::json!({ "screen": "game", "hud": hud }),
        Screen::GameOver(hud) => serde_json::json!({
            "screen": "game_over",
            "hud": hud,
            "hint": "Press OK to Restart",
        }),
    };
    value.to_string()
}
