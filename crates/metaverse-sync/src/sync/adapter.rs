//! 同步存储适配器 - 状态容器使用的存储契约
//!
//! `set_item` 同步写本地后立即返回；云同步开启且在线时，由调度器在防抖窗口
//! 结束后把各脏键的最新值推送到远端。远端只是尽力而为的镜像。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::scheduler::{PushReport, PushTask, SkipReason, SyncOutcome, SyncScheduler};
use super::state::SyncState;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::{SyncEvent, SyncEventBus};
use crate::remote::{DataDomain, RemoteDataGateway};
use crate::storage::{self, LocalStore};
use crate::user_context::UserContext;

/// 推送任务的实际执行者：持有本地存储、远端网关与脏键集合
struct AdapterCore {
    store_name: String,
    domain: DataDomain,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteDataGateway>,
    user: Arc<dyn UserContext>,
    dirty: Mutex<BTreeSet<String>>,
}

impl AdapterCore {
    fn namespaced(&self, key: &str) -> String {
        storage::namespaced_key(&self.store_name, key)
    }

    fn remote_id(&self, namespaced: &str) -> Result<Option<String>> {
        self.local.get(&storage::sync_meta_key(namespaced))
    }

    fn mark_dirty(&self, key: &str) {
        self.dirty.lock().insert(key.to_string());
    }

    /// 推送单个键，返回是否实际推送
    async fn push_key(&self, user_id: &str, key: &str) -> Result<bool> {
        let namespaced = self.namespaced(key);
        let value: Value = match storage::get_json(self.local.as_ref(), &namespaced)? {
            Some(value) => value,
            // 推送前已被删除
            None => return Ok(false),
        };

        let payload = json!({
            "user_id": user_id,
            "store": self.store_name,
            "key": key,
            "data": value,
        });

        match self.remote_id(&namespaced)? {
            Some(id) => {
                match self.remote.update_record(self.domain, &id, payload.clone()).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        // 远端记录已不存在，重新创建
                        warn!("远端记录 {} 已不存在，重新创建 ({})", id, namespaced);
                        let record = self.remote.create_record(self.domain, payload).await?;
                        self.local.set(&storage::sync_meta_key(&namespaced), &record.id)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                let record = self.remote.create_record(self.domain, payload).await?;
                self.local.set(&storage::sync_meta_key(&namespaced), &record.id)?;
                debug!("已建立远端关联 {} -> {}", namespaced, record.id);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl PushTask for AdapterCore {
    fn skip_reason(&self) -> Option<SkipReason> {
        if self.user.current_user_id().is_none() {
            return Some(SkipReason::NoUser);
        }
        if self.dirty.lock().is_empty() {
            return Some(SkipReason::NothingToSync);
        }
        None
    }

    async fn push(&self) -> PushReport {
        let mut report = PushReport::default();
        let user_id = match self.user.current_user_id() {
            Some(user_id) => user_id,
            None => return report,
        };

        // 只取触发时刻的脏键；推送期间的新写入留给下一个窗口
        let keys: Vec<String> = std::mem::take(&mut *self.dirty.lock()).into_iter().collect();

        for key in keys {
            match self.push_key(&user_id, &key).await {
                Ok(true) => report.pushed += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors.push(format!("{}: {}", key, e));
                    // 保持脏标记，下次写入或手动同步时重试
                    self.mark_dirty(&key);
                }
            }
        }
        report
    }
}

/// 同步存储适配器
pub struct SyncAdapter {
    core: Arc<AdapterCore>,
    scheduler: Arc<SyncScheduler>,
    events: Arc<SyncEventBus>,
    config: SyncConfig,
}

impl SyncAdapter {
    pub fn new(
        config: SyncConfig,
        domain: DataDomain,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteDataGateway>,
        user: Arc<dyn UserContext>,
    ) -> Result<Self> {
        Self::with_event_bus(config, domain, local, remote, user, Arc::new(SyncEventBus::default()))
    }

    pub fn with_event_bus(
        config: SyncConfig,
        domain: DataDomain,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteDataGateway>,
        user: Arc<dyn UserContext>,
        events: Arc<SyncEventBus>,
    ) -> Result<Self> {
        config.validate()?;

        let core = Arc::new(AdapterCore {
            store_name: config.store_name.clone(),
            domain,
            local,
            remote,
            user,
            dirty: Mutex::new(BTreeSet::new()),
        });
        let scheduler = SyncScheduler::new(
            config.store_name.clone(),
            config.debounce(),
            config.cloud_sync_enabled,
            config.max_pending_errors,
            core.clone(),
            events.clone(),
        );

        info!(
            "✅ 同步适配器已创建: store={} domain={} cloud_sync={}",
            config.store_name, domain, config.cloud_sync_enabled
        );

        Ok(Self {
            core,
            scheduler,
            events,
            config,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.config.store_name
    }

    pub fn domain(&self) -> DataDomain {
        self.core.domain
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<SyncEventBus> {
        self.events.clone()
    }

    /// 读取本地副本
    pub fn get_item(&self, key: &str) -> Result<Option<Value>> {
        storage::get_json(self.core.local.as_ref(), &self.core.namespaced(key))
    }

    /// 同步写入本地，并（在线且启用云同步时）安排防抖推送
    pub fn set_item(&self, key: &str, value: Value) -> Result<()> {
        let namespaced = self.core.namespaced(key);
        if let Err(e) = storage::set_json(self.core.local.as_ref(), &namespaced, &value) {
            error!("❌ 本地写入失败 {}: {}", namespaced, e);
            return Err(e);
        }

        if self.scheduler.is_enabled() {
            self.core.mark_dirty(key);
            self.scheduler.schedule();
        }
        Ok(())
    }

    /// 删除本地副本与远端关联；远端记录保留
    pub fn remove_item(&self, key: &str) -> Result<()> {
        let namespaced = self.core.namespaced(key);
        self.core.local.remove(&namespaced)?;
        self.core.local.remove(&storage::sync_meta_key(&namespaced))?;
        self.core.dirty.lock().remove(key);
        Ok(())
    }

    pub fn get_typed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_item(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_typed<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.set_item(key, serde_json::to_value(value)?)
    }

    /// 立即推送（单飞：已有推送时直接返回）
    pub async fn manual_sync(&self) -> SyncOutcome {
        self.scheduler.manual_sync().await
    }

    /// 切换离线模式；从离线回到在线时立即做一次手动同步
    pub async fn set_offline_mode(&self, offline: bool) -> Option<SyncOutcome> {
        if !self.scheduler.set_offline(offline) {
            return None;
        }

        info!(
            "🔌 [{}] 切换到{}模式",
            self.config.store_name,
            if offline { "离线" } else { "在线" }
        );
        self.events.emit(SyncEvent::ModeChanged {
            store: self.config.store_name.clone(),
            offline,
        });

        if offline {
            None
        } else {
            Some(self.manual_sync().await)
        }
    }

    pub fn is_offline(&self) -> bool {
        self.scheduler.is_offline()
    }

    pub fn sync_state(&self) -> SyncState {
        self.scheduler.state()
    }

    /// 尚未推送的键
    pub fn dirty_keys(&self) -> Vec<String> {
        self.core.dirty.lock().iter().cloned().collect()
    }

    pub fn clear_errors(&self) {
        self.scheduler.clear_errors();
    }

    /// 取消未触发的定时器、清空脏键和错误；本地数据保留
    pub fn reset(&self) {
        self.scheduler.reset();
        self.core.dirty.lock().clear();
        debug!("[{}] 同步状态已重置", self.config.store_name);
    }
}
