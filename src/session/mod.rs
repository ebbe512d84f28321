//! 会话层
//!
//! - [`ConversationSession`]：纯状态机（选择会话、入站对账、乐观发送、重新同步）
//! - [`ChatClient`]：单写者驱动任务，串行执行状态机给出的动作

mod driver;
mod inbox;
mod state;


pub use driver::{ChatClient, ClientOptions, Command, Notice, SessionSnapshot};
pub use inbox::Inbox;
pub use state::{
    ConversationSession, HistoryOutcome, HistoryTicket, InboundOutcome, PendingSend,
    ResyncOutcome, SelectPlan, SendOutcome, SessionPhase,
};
