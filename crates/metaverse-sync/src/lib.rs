//! Metaverse Sync - 本地优先的持久化与云同步引擎
//!
//! 本库为头像、世界等用户数据提供：
//! - 💾 本地优先：写入同步落到本地存储，读写一致
//! - ☁️ 云同步：防抖推送 + 单飞保证，失败只记录不自动重试
//! - 📡 在线/离线模式：离线期间只写本地，恢复网络后补一次同步
//! - 🚚 一次性迁移：把仅存在于本地的数据搬到远端，带备份与确认清理
//! - ⚙️ 事件系统：同步进度通过广播通道通知 UI 层
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use metaverse_sync::{
//!     DataDomain, HttpGatewayConfig, HttpRemoteGateway, MigrationService,
//!     SledLocalStore, StaticUserContext, SyncAdapter, SyncConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .store_name("metaverse")
//!         .debounce_ms(2000)
//!         .build();
//!
//!     let local = Arc::new(SledLocalStore::open(Path::new("/path/to/data")).await?);
//!     let remote = Arc::new(HttpRemoteGateway::new(&HttpGatewayConfig {
//!         base_url: "https://api.example.com/v1".to_string(),
//!         ..Default::default()
//!     })?);
//!     let user = Arc::new(StaticUserContext::signed_in("user123"));
//!
//!     // 登录后先迁移本地数据，再创建适配器推送；适配器的镜像记录会计入远端数量
//!     let migration = MigrationService::new(&config, local.clone(), remote.clone(), user.clone())?;
//!     migration.run_for_current_user().await;
//!
//!     // 写入即落本地，2 秒后推送到云端
//!     let avatars = SyncAdapter::new(config, DataDomain::Avatars, local, remote, user)?;
//!     avatars.set_item("current", serde_json::json!({"hair": "long"}))?;
//!     avatars.manual_sync().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod migration;
pub mod network;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod user_context;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpGatewayConfig, SyncConfig, SyncConfigBuilder};
pub use error::{Result, SyncSdkError};
pub use events::{EventStats, SyncEvent, SyncEventBus};
pub use migration::{MigrationRecordError, MigrationReport, MigrationService, MigrationStatus};
pub use network::{
    ModeTransition, NetworkModeMonitor, NetworkStatus, NetworkStatusEvent, NetworkStatusListener,
};
pub use remote::{
    DataDomain, HttpRemoteGateway, InMemoryRemoteGateway, RemoteDataGateway, RemoteRecord,
};
pub use storage::{BackupSnapshot, BackupStore, LocalStore, MemoryLocalStore, SledLocalStore};
pub use sync::{SkipReason, SyncAdapter, SyncOutcome, SyncState};
pub use user_context::{StaticUserContext, UserContext};
pub use version::SDK_VERSION;

/// 测试日志，输出交给 libtest 捕获
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
