//! 同步事件 - 供 UI 层观察同步进度
//!
//! 事件只是通知，不参与同步决策；无订阅者时发送失败属正常场景。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::remote::DataDomain;

/// 同步事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 已安排一次防抖推送
    SyncScheduled { store: String, delay_ms: u64 },
    /// 推送开始
    SyncStarted { store: String, manual: bool },
    /// 推送成功
    SyncSucceeded { store: String, pushed: usize, timestamp: i64 },
    /// 推送失败（已记入 pending_errors）
    SyncFailed { store: String, error: String },
    /// 在线/离线模式切换
    ModeChanged { store: String, offline: bool },
    /// 迁移结束（可能部分成功）
    MigrationCompleted { domain: DataDomain, migrated: usize, failed: usize },
    /// 写入了一份备份快照
    BackupCreated { domain: DataDomain, key: String },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::SyncScheduled { .. } => "sync_scheduled",
            SyncEvent::SyncStarted { .. } => "sync_started",
            SyncEvent::SyncSucceeded { .. } => "sync_succeeded",
            SyncEvent::SyncFailed { .. } => "sync_failed",
            SyncEvent::ModeChanged { .. } => "mode_changed",
            SyncEvent::MigrationCompleted { .. } => "migration_completed",
            SyncEvent::BackupCreated { .. } => "backup_created",
        }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<&'static str, u64>,
}

/// 事件总线
#[derive(Debug)]
pub struct SyncEventBus {
    sender: broadcast::Sender<SyncEvent>,
    stats: RwLock<EventStats>,
}

impl SyncEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件（同步调用，不会阻塞写路径）
    pub fn emit(&self, event: SyncEvent) {
        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type()).or_insert(0) += 1;
        }

        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast sync event (no active receivers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
