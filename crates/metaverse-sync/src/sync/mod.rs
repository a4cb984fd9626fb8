//! 本地优先同步模块
//!
//! 职责：
//! - 状态容器的存储契约（SyncAdapter）：本地同步写入 + 远端尽力镜像
//! - 防抖与单飞调度（SyncScheduler）
//! - 同步状态（SyncState）与调度相位
//!
//! 不做冲突解决（后写覆盖），不做自动重试循环。

pub mod adapter;
pub mod scheduler;
pub mod state;

pub use adapter::SyncAdapter;
pub use scheduler::{PushReport, PushTask, SkipReason, SyncOutcome, SyncScheduler};
pub use state::SyncState;
