//! 同步调度器 - 防抖 + 单飞
//!
//! 把一连串本地写入折叠成最多一个进行中的远端推送：
//! - 写入（re）启动防抖定时器，定时器触发时才读取当时的最新值推送
//! - 已有推送进行中时拒绝再启动，不排队
//! - 推送失败只记录，不自动重试；下一次写入或手动同步自然重试
//!
//! 相位与状态都在同一把锁内，在多线程 runtime 上也成立。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::{SyncPhase, SyncState, TimerDecision, TimerSlot};
use crate::events::{SyncEvent, SyncEventBus};

/// 跳过推送的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// 已有推送进行中
    AlreadySyncing,
    /// 离线模式
    Offline,
    /// 云同步未启用
    Disabled,
    /// 没有已认证用户
    NoUser,
    /// 没有待推送的数据
    NothingToSync,
}

/// 一次同步尝试的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    Pushed { records: usize },
    Skipped(SkipReason),
    /// 推送失败（错误已记入 pending_errors）
    Failed { error: String },
}

/// 一次推送的汇总
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub pushed: usize,
    pub errors: Vec<String>,
}

/// 由适配器实现的推送任务
#[async_trait]
pub trait PushTask: Send + Sync {
    /// 推送前检查，返回 Some 表示本次无需推送
    fn skip_reason(&self) -> Option<SkipReason>;

    /// 执行推送，读取触发时刻的本地最新值
    async fn push(&self) -> PushReport;
}

#[derive(Debug, Default)]
struct SchedulerInner {
    phase: SyncPhase,
    state: SyncState,
    offline: bool,
    next_generation: u64,
}

/// 同步调度器
pub struct SyncScheduler {
    store: String,
    debounce: Duration,
    enabled: bool,
    max_pending_errors: usize,
    inner: Mutex<SchedulerInner>,
    task: Arc<dyn PushTask>,
    events: Arc<SyncEventBus>,
}

impl SyncScheduler {
    pub fn new(
        store: String,
        debounce: Duration,
        enabled: bool,
        max_pending_errors: usize,
        task: Arc<dyn PushTask>,
        events: Arc<SyncEventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            debounce,
            enabled,
            max_pending_errors,
            inner: Mutex::new(SchedulerInner::default()),
            task,
            events,
        })
    }

    /// 安排一次防抖推送，返回是否已安排
    pub fn schedule(self: &Arc<Self>) -> bool {
        if !self.enabled {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("⚠️ [{}] 没有可用的 tokio runtime，本次写入仅保存在本地", self.store);
                return false;
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.offline {
                return false;
            }

            inner.next_generation += 1;
            let generation = inner.next_generation;
            let weak: Weak<Self> = Arc::downgrade(self);
            let debounce = self.debounce;
            // 持锁 spawn：定时器触发时必须能看到自己的 slot
            let handle = runtime.spawn(async move {
                tokio::time::sleep(debounce).await;
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.fire(generation).await;
                }
            });
            inner.phase.on_write(TimerSlot {
                generation,
                handle: handle.abort_handle(),
            });
            debug!(
                "[{}] 已安排防抖推送 gen={} phase={}",
                self.store,
                generation,
                inner.phase.label()
            );
        }

        self.events.emit(SyncEvent::SyncScheduled {
            store: self.store.clone(),
            delay_ms: self.debounce.as_millis() as u64,
        });
        true
    }

    async fn fire(&self, generation: u64) {
        let decision = {
            let mut inner = self.inner.lock();
            let decision = inner.phase.on_timer(generation);
            if decision == TimerDecision::Start {
                inner.state.is_syncing = true;
            }
            decision
        };

        match decision {
            TimerDecision::Start => {
                self.run_push(false).await;
            }
            TimerDecision::Refused => {
                debug!("[{}] 定时器触发时已有推送进行中，放弃本次 (gen={})", self.store, generation);
            }
            TimerDecision::Stale => {}
        }
    }

    /// 绕过防抖立即推送；已有推送进行中时直接返回，不排队
    pub async fn manual_sync(&self) -> SyncOutcome {
        if !self.enabled {
            return SyncOutcome::Skipped(SkipReason::Disabled);
        }

        {
            let mut inner = self.inner.lock();
            if inner.offline {
                return SyncOutcome::Skipped(SkipReason::Offline);
            }
            if !inner.phase.try_start_manual() {
                debug!("[{}] 手动同步被忽略：已有推送进行中", self.store);
                return SyncOutcome::Skipped(SkipReason::AlreadySyncing);
            }
            inner.state.is_syncing = true;
        }

        self.run_push(true).await
    }

    /// 调用方已把相位切到 InFlight
    async fn run_push(&self, manual: bool) -> SyncOutcome {
        if let Some(reason) = self.task.skip_reason() {
            debug!("[{}] 跳过推送: {:?}", self.store, reason);
            self.finish(|_| {});
            return SyncOutcome::Skipped(reason);
        }

        self.events.emit(SyncEvent::SyncStarted {
            store: self.store.clone(),
            manual,
        });

        let report = self.task.push().await;
        let now = chrono::Utc::now().timestamp_millis();
        let capacity = self.max_pending_errors;

        if report.errors.is_empty() {
            self.finish(|state| {
                if report.pushed > 0 {
                    state.record_success(now);
                }
            });
            info!("☁️ [{}] 推送完成: {} 条", self.store, report.pushed);
            self.events.emit(SyncEvent::SyncSucceeded {
                store: self.store.clone(),
                pushed: report.pushed,
                timestamp: now,
            });
            SyncOutcome::Pushed {
                records: report.pushed,
            }
        } else {
            let error = report.errors.join("; ");
            self.finish(|state| {
                if report.pushed > 0 {
                    state.has_remote_copy = true;
                }
                for message in &report.errors {
                    state.record_error(message.clone(), capacity);
                }
            });
            warn!(
                "⚠️ [{}] 推送失败（成功 {} 条，失败 {} 条）: {}",
                self.store,
                report.pushed,
                report.errors.len(),
                error
            );
            self.events.emit(SyncEvent::SyncFailed {
                store: self.store.clone(),
                error: error.clone(),
            });
            SyncOutcome::Failed { error }
        }
    }

    fn finish<F>(&self, update: F)
    where
        F: FnOnce(&mut SyncState),
    {
        let mut inner = self.inner.lock();
        update(&mut inner.state);
        inner.state.is_syncing = false;
        inner.phase.on_complete();
    }

    /// 切换离线模式，返回模式是否发生变化
    pub fn set_offline(&self, offline: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.offline == offline {
            return false;
        }
        inner.offline = offline;
        if offline {
            inner.phase.cancel_timers();
        }
        true
    }

    pub fn is_offline(&self) -> bool {
        self.inner.lock().offline
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.lock().phase.is_in_flight()
    }

    /// 是否有尚未触发的防抖定时器
    pub fn has_pending_timer(&self) -> bool {
        self.inner.lock().phase.has_timer()
    }

    pub fn state(&self) -> SyncState {
        self.inner.lock().state.clone()
    }

    pub fn clear_errors(&self) {
        self.inner.lock().state.pending_errors.clear();
    }

    /// 取消定时器并清空错误；进行中的推送不受影响
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.phase.cancel_timers();
        inner.state.pending_errors.clear();
    }
}
