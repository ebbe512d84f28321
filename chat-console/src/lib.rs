//! 终端聊天客户端
//!
//! 读取标准输入的命令驱动 [`unimarket_chat::ChatClient`]，并把通知打印到终端。

mod app;
mod command;
mod view;

pub use app::{ConsoleSettings, run};
pub use command::{ConsoleCommand, HELP};
pub use view::ConsoleView;
