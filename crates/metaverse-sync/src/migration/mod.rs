//! 一次性迁移服务 - 把仅存在于本地的数据搬到远端
//!
//! 流程：`check_migration_status` → `migrate` → 写备份快照 → （用户确认后）`cleanup`
//!
//! 状态判断是保守的：远端只要有任意一条记录就视为已迁移，即使数量对不上。
//! 这样重复执行不会造成重复插入，代价是之前部分失败的迁移会被掩盖。
//!
//! 适配器推送的镜像记录与迁移记录位于同一个数据域集合，同样计入 `remote_count`。
//! 因此登录后必须先执行 `run_for_current_user`（或 `migrate_all_if_needed`），
//! 再让 `SyncAdapter` 推送；否则一次镜像推送就会让本地数据永远被判定为已迁移。
//!
//! 迁移尽力而为：单条记录失败只记录，不中断整批。
//! 清理是破坏性操作，前置条件不满足时返回 false，不抛错。

pub mod transform;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncSdkError};
use crate::events::{SyncEvent, SyncEventBus};
use crate::remote::{DataDomain, RemoteDataGateway, RemoteRecord};
use crate::storage::{self, BackupStore, LocalStore};
use crate::user_context::UserContext;

/// 某个数据域的迁移状态（按需计算，不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub needs_migration: bool,
    pub local_count: usize,
    pub remote_count: usize,
}

impl MigrationStatus {
    pub fn new(local_count: usize, remote_count: usize) -> Self {
        Self {
            needs_migration: local_count > 0 && remote_count == 0,
            local_count,
            remote_count,
        }
    }
}

/// 单条记录的迁移失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecordError {
    pub local_id: Option<String>,
    pub message: String,
}

/// 一次迁移的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub domain: DataDomain,
    pub migrated_records: Vec<RemoteRecord>,
    pub errors: Vec<MigrationRecordError>,
    /// 至少一条成功时写入的备份键
    pub backup_key: Option<String>,
}

impl MigrationReport {
    fn empty(domain: DataDomain) -> Self {
        Self {
            domain,
            migrated_records: Vec::new(),
            errors: Vec::new(),
            backup_key: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 迁移服务
pub struct MigrationService {
    store_name: String,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteDataGateway>,
    user: Arc<dyn UserContext>,
    backups: BackupStore,
    events: Arc<SyncEventBus>,
}

impl MigrationService {
    pub fn new(
        config: &SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteDataGateway>,
        user: Arc<dyn UserContext>,
    ) -> Result<Self> {
        Self::with_event_bus(config, local, remote, user, Arc::new(SyncEventBus::default()))
    }

    pub fn with_event_bus(
        config: &SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteDataGateway>,
        user: Arc<dyn UserContext>,
        events: Arc<SyncEventBus>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store_name: config.store_name.clone(),
            backups: BackupStore::new(local.clone()),
            local,
            remote,
            user,
            events,
        })
    }

    /// 数据域的本地键 `{store_name}-{domain}`
    pub fn local_key(&self, domain: DataDomain) -> String {
        storage::namespaced_key(&self.store_name, domain.as_str())
    }

    fn local_payload(&self, domain: DataDomain) -> Result<Option<String>> {
        self.local.get(&self.local_key(domain))
    }

    fn parse_records(domain: DataDomain, raw: &str) -> Result<Vec<Value>> {
        let payload: Value = serde_json::from_str(raw).map_err(|e| {
            SyncSdkError::Serialization(format!("本地 {} 数据无法解析: {}", domain, e))
        })?;
        Ok(transform::extract_records(domain, &payload))
    }

    /// 本地记录
    pub fn local_records(&self, domain: DataDomain) -> Result<Vec<Value>> {
        match self.local_payload(domain)? {
            Some(raw) => Self::parse_records(domain, &raw),
            None => Ok(Vec::new()),
        }
    }

    /// 统计本地与远端记录数
    pub async fn check_migration_status(
        &self,
        domain: DataDomain,
        user_id: &str,
    ) -> Result<MigrationStatus> {
        let local_count = self.local_records(domain)?.len();
        let remote_count = self.remote.list_records(domain, user_id).await?.len();
        let status = MigrationStatus::new(local_count, remote_count);
        info!(
            "🔍 迁移状态 {}: local={} remote={} needs_migration={}",
            domain, status.local_count, status.remote_count, status.needs_migration
        );
        Ok(status)
    }

    /// 逐条迁移本地记录；单条失败不影响其余记录
    pub async fn migrate(&self, domain: DataDomain, user_id: &str) -> Result<MigrationReport> {
        let mut report = MigrationReport::empty(domain);
        let raw = match self.local_payload(domain)? {
            Some(raw) => raw,
            None => {
                info!("没有需要迁移的本地 {} 数据", domain);
                return Ok(report);
            }
        };
        let records = Self::parse_records(domain, &raw)?;
        info!("🚚 开始迁移 {}: {} 条本地记录", domain, records.len());

        for record in &records {
            let local_id = transform::local_record_id(record);
            let result = match transform::to_remote_payload(domain, user_id, record) {
                Ok(payload) => self.remote.create_record(domain, payload).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(created) => report.migrated_records.push(created),
                Err(e) => {
                    warn!("⚠️ 迁移 {} 记录 {:?} 失败: {}", domain, local_id, e);
                    report.errors.push(MigrationRecordError {
                        local_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        if !report.migrated_records.is_empty() {
            // 备份的是未转换的原始本地数据
            match self.backups.create(domain, &raw) {
                Ok(key) => {
                    self.events.emit(SyncEvent::BackupCreated {
                        domain,
                        key: key.clone(),
                    });
                    report.backup_key = Some(key);
                }
                Err(e) => {
                    error!("❌ 迁移后写备份失败 ({}): {}", domain, e);
                    report.errors.push(MigrationRecordError {
                        local_id: None,
                        message: format!("backup failed: {}", e),
                    });
                }
            }
        }

        info!(
            "✅ 迁移 {} 结束: 成功 {} 条，失败 {} 条",
            domain,
            report.migrated_records.len(),
            report.errors.len()
        );
        self.events.emit(SyncEvent::MigrationCompleted {
            domain,
            migrated: report.migrated_records.len(),
            failed: report.errors.len(),
        });
        Ok(report)
    }

    /// 对每个数据域：需要迁移时执行迁移。用于首次认证后的启动流程
    pub async fn migrate_all_if_needed(&self, user_id: &str) -> Vec<MigrationReport> {
        let mut reports = Vec::new();
        for &domain in DataDomain::ALL {
            match self.check_migration_status(domain, user_id).await {
                Ok(status) if status.needs_migration => match self.migrate(domain, user_id).await {
                    Ok(report) => reports.push(report),
                    Err(e) => warn!("⚠️ 迁移 {} 未能执行: {}", domain, e),
                },
                Ok(_) => {}
                Err(e) => warn!("⚠️ 无法确定 {} 的迁移状态，本次跳过: {}", domain, e),
            }
        }
        reports
    }

    /// 以注入的当前用户执行 `migrate_all_if_needed`；未登录时不做任何事
    ///
    /// 登录后应在任何 `SyncAdapter` 推送之前调用。
    pub async fn run_for_current_user(&self) -> Vec<MigrationReport> {
        match self.user.current_user_id() {
            Some(user_id) => self.migrate_all_if_needed(&user_id).await,
            None => {
                info!("未登录，跳过迁移检查");
                Vec::new()
            }
        }
    }

    /// 清理单个数据域的本地副本
    ///
    /// 仅当 `confirmed` 且重新检查确认远端已有数据时才删除；删除前再写一份备份。
    pub async fn cleanup_domain(&self, domain: DataDomain, user_id: &str, confirmed: bool) -> bool {
        if !confirmed {
            info!("清理 {} 未确认，跳过", domain);
            return false;
        }
        let raw = match self.verified_local_payload(domain, user_id).await {
            Some(raw) => raw,
            None => return false,
        };
        self.backup_and_remove(domain, &raw)
    }

    /// 清理全部数据域的本地副本
    ///
    /// 所有持有本地数据的数据域都必须通过检查，否则不做任何删除。
    pub async fn cleanup(&self, user_id: &str, confirmed: bool) -> bool {
        if !confirmed {
            info!("清理未确认，跳过");
            return false;
        }

        let mut verified = Vec::new();
        for &domain in DataDomain::ALL {
            match self.local_payload(domain) {
                Ok(None) => continue,
                Ok(Some(_)) => {}
                Err(e) => {
                    warn!("⚠️ 读取本地 {} 失败，放弃清理: {}", domain, e);
                    return false;
                }
            }
            match self.verified_local_payload(domain, user_id).await {
                Some(raw) => verified.push((domain, raw)),
                None => return false,
            }
        }

        if verified.is_empty() {
            info!("没有可清理的本地数据");
            return false;
        }

        verified
            .iter()
            .fold(true, |ok, (domain, raw)| self.backup_and_remove(*domain, raw) && ok)
    }

    /// 本地有数据且远端已有记录时返回本地原始数据
    async fn verified_local_payload(&self, domain: DataDomain, user_id: &str) -> Option<String> {
        let raw = match self.local_payload(domain) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠️ 读取本地 {} 失败，放弃清理: {}", domain, e);
                return None;
            }
        };
        match self.check_migration_status(domain, user_id).await {
            Ok(status) if status.remote_count > 0 => Some(raw),
            Ok(_) => {
                warn!("⚠️ 远端没有 {} 数据，拒绝清理本地副本", domain);
                None
            }
            Err(e) => {
                warn!("⚠️ 无法确认远端 {} 数据，拒绝清理: {}", domain, e);
                None
            }
        }
    }

    fn backup_and_remove(&self, domain: DataDomain, raw: &str) -> bool {
        let key = match self.backups.create(domain, raw) {
            Ok(key) => key,
            Err(e) => {
                error!("❌ 清理前写备份失败 ({})，不删除本地数据: {}", domain, e);
                return false;
            }
        };
        self.events.emit(SyncEvent::BackupCreated { domain, key });

        match self.local.remove(&self.local_key(domain)) {
            Ok(()) => {
                info!("🧹 已清理本地 {} 数据", domain);
                true
            }
            Err(e) => {
                error!("❌ 删除本地 {} 数据失败: {}", domain, e);
                false
            }
        }
    }

    /// 某数据域的全部备份键
    pub fn list_backups(&self, domain: DataDomain) -> Result<Vec<String>> {
        self.backups.list(domain)
    }

    /// 把备份写回数据域的本地键；当前本地数据（若有）先备份，快照本身保留
    pub fn restore_backup(&self, key: &str) -> Result<DataDomain> {
        let snapshot = self.backups.get(key)?;
        let local_key = self.local_key(snapshot.domain);

        if let Some(current) = self.local.get(&local_key)? {
            if current != snapshot.payload {
                let saved = self.backups.create(snapshot.domain, &current)?;
                info!("恢复前已备份当前 {} 数据: {}", snapshot.domain, saved);
            }
        }

        self.local.set(&local_key, &snapshot.payload)?;
        info!("♻️ 已从 {} 恢复本地 {} 数据", key, snapshot.domain);
        Ok(snapshot.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemoteGateway;
    use crate::storage::MemoryLocalStore;
    use crate::user_context::StaticUserContext;
    use serde_json::json;

    struct Fixture {
        local: Arc<MemoryLocalStore>,
        remote: Arc<InMemoryRemoteGateway>,
        service: MigrationService,
    }

    fn fixture() -> Fixture {
        crate::init_test_tracing();
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemoteGateway::new());
        let service = MigrationService::new(
            &SyncConfig::default(),
            local.clone(),
            remote.clone(),
            Arc::new(StaticUserContext::signed_in("u1")),
        )
        .unwrap();
        Fixture {
            local,
            remote,
            service,
        }
    }

    fn save_local_avatars(local: &MemoryLocalStore, ids: &[&str]) {
        let avatars: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "name": format!("avatar {}", id), "config": {"skin": "tan"}}))
            .collect();
        let envelope = json!({"state": {"savedAvatars": avatars}, "version": 0});
        local.set("metaverse-avatars", &envelope.to_string()).unwrap();
    }

    fn backup_count(local: &MemoryLocalStore, domain: DataDomain) -> usize {
        local
            .keys_with_prefix(&format!("backup_{}_", domain.as_str()))
            .unwrap()
            .len()
    }

    #[test]
    fn status_table() {
        assert!(MigrationStatus::new(3, 0).needs_migration);
        assert!(!MigrationStatus::new(3, 1).needs_migration);
        assert!(!MigrationStatus::new(0, 0).needs_migration);
    }

    #[tokio::test]
    async fn check_status_counts_local_and_remote() {
        let f = fixture();
        save_local_avatars(&f.local, &["a", "b", "c"]);
        let status = f.service.check_migration_status(DataDomain::Avatars, "u1").await.unwrap();
        assert_eq!(status, MigrationStatus { needs_migration: true, local_count: 3, remote_count: 0 });

        // 任意一条远端记录即视为已迁移
        f.remote.seed(DataDomain::Avatars, "u1", json!({"name": "x"}));
        let status = f.service.check_migration_status(DataDomain::Avatars, "u1").await.unwrap();
        assert_eq!(status, MigrationStatus { needs_migration: false, local_count: 3, remote_count: 1 });

        let status = f.service.check_migration_status(DataDomain::Worlds, "u1").await.unwrap();
        assert_eq!(status, MigrationStatus { needs_migration: false, local_count: 0, remote_count: 0 });
    }

    #[tokio::test]
    async fn partial_failure_keeps_going_and_backs_up_once() {
        let f = fixture();
        save_local_avatars(&f.local, &["a", "b", "c"]);
        f.remote.fail_writes_when(|payload| payload["local_id"] == "b");

        let report = f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();
        assert_eq!(report.migrated_records.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].local_id.as_deref(), Some("b"));
        assert_eq!(backup_count(&f.local, DataDomain::Avatars), 1);

        let backup = f.local.get(report.backup_key.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(backup, f.local.get("metaverse-avatars").unwrap().unwrap());
    }

    #[tokio::test]
    async fn partially_failed_migration_is_masked_on_rerun() {
        let f = fixture();
        save_local_avatars(&f.local, &["a", "b"]);
        f.remote.fail_writes_when(|payload| payload["local_id"] == "b");
        f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();

        let status = f.service.check_migration_status(DataDomain::Avatars, "u1").await.unwrap();
        assert!(!status.needs_migration);
        assert_eq!((status.local_count, status.remote_count), (2, 1));
        assert!(f.service.migrate_all_if_needed("u1").await.is_empty());
    }

    #[tokio::test]
    async fn total_failure_writes_no_backup() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);
        f.remote.set_unreachable(true);

        let report = f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();
        assert!(report.migrated_records.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.backup_key.is_none());
        assert_eq!(backup_count(&f.local, DataDomain::Avatars), 0);
    }

    #[tokio::test]
    async fn malformed_record_is_collected_not_fatal() {
        let f = fixture();
        f.local
            .set("metaverse-worlds", &json!([{"id": "w1"}, {"name": "no id"}]).to_string())
            .unwrap();
        let report = f.service.migrate(DataDomain::Worlds, "u1").await.unwrap();
        assert_eq!(report.migrated_records.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].local_id.is_none());
    }

    #[tokio::test]
    async fn end_to_end_avatar_migration() {
        let f = fixture();
        save_local_avatars(&f.local, &["a", "b"]);

        let status = f.service.check_migration_status(DataDomain::Avatars, "u1").await.unwrap();
        assert_eq!(status, MigrationStatus { needs_migration: true, local_count: 2, remote_count: 0 });

        let report = f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();
        let local_ids: Vec<Option<&str>> = report
            .migrated_records
            .iter()
            .map(|r| r.data["local_id"].as_str())
            .collect();
        assert_eq!(local_ids, vec![Some("a"), Some("b")]);
        assert!(report.errors.is_empty());
        assert!(report.backup_key.as_deref().unwrap().starts_with("backup_avatars_"));
        assert_eq!(backup_count(&f.local, DataDomain::Avatars), 1);

        let status = f.service.check_migration_status(DataDomain::Avatars, "u1").await.unwrap();
        assert!(!status.needs_migration);
        assert_eq!(status.remote_count, 2);
    }

    #[tokio::test]
    async fn cleanup_requires_confirmation() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);
        f.remote.seed(DataDomain::Avatars, "u1", json!({}));
        let before = f.local.len();

        assert!(!f.service.cleanup("u1", false).await);
        assert!(!f.service.cleanup_domain(DataDomain::Avatars, "u1", false).await);
        assert_eq!(f.local.len(), before);
        assert_eq!(f.remote.list_calls(), 0);
    }

    #[tokio::test]
    async fn cleanup_refuses_when_remote_is_empty() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);

        assert!(!f.service.cleanup("u1", true).await);
        assert!(f.local.get("metaverse-avatars").unwrap().is_some());
        assert_eq!(backup_count(&f.local, DataDomain::Avatars), 0);
    }

    #[tokio::test]
    async fn cleanup_refuses_if_any_domain_unverified() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);
        f.local.set("metaverse-worlds", &json!([{"id": "w"}]).to_string()).unwrap();
        f.remote.seed(DataDomain::Avatars, "u1", json!({}));

        assert!(!f.service.cleanup("u1", true).await);
        assert!(f.local.get("metaverse-avatars").unwrap().is_some());
        assert!(f.local.get("metaverse-worlds").unwrap().is_some());
    }

    #[tokio::test]
    async fn confirmed_cleanup_backs_up_then_deletes() {
        let f = fixture();
        save_local_avatars(&f.local, &["a", "b"]);
        let report = f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();
        assert!(report.is_complete());

        assert!(f.service.cleanup("u1", true).await);
        assert!(f.local.get("metaverse-avatars").unwrap().is_none());
        // 迁移一份 + 清理前一份
        assert_eq!(f.service.list_backups(DataDomain::Avatars).unwrap().len(), 2);

        // 没有本地数据时不再清理
        assert!(!f.service.cleanup("u1", true).await);
    }

    #[tokio::test]
    async fn restore_backup_brings_data_back() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);
        let original = f.local.get("metaverse-avatars").unwrap().unwrap();
        f.service.migrate(DataDomain::Avatars, "u1").await.unwrap();
        assert!(f.service.cleanup_domain(DataDomain::Avatars, "u1", true).await);

        let key = f.service.list_backups(DataDomain::Avatars).unwrap().remove(0);
        assert_eq!(f.service.restore_backup(&key).unwrap(), DataDomain::Avatars);
        assert_eq!(f.local.get("metaverse-avatars").unwrap().unwrap(), original);
        assert_eq!(f.service.local_records(DataDomain::Avatars).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn adapter_push_before_migration_masks_local_data() {
        use crate::sync::SyncAdapter;

        let f = fixture();
        save_local_avatars(&f.local, &["a", "b"]);
        let adapter = SyncAdapter::new(
            SyncConfig::default(),
            DataDomain::Avatars,
            f.local.clone(),
            f.remote.clone(),
            Arc::new(StaticUserContext::signed_in("u1")),
        )
        .unwrap();
        adapter.set_item("prefs", json!({"theme": "dark"})).unwrap();
        adapter.manual_sync().await;

        // 镜像记录已计入远端，迁移被跳过
        assert!(f.service.run_for_current_user().await.is_empty());
        assert_eq!(f.remote.records(DataDomain::Avatars).len(), 1);
    }

    #[tokio::test]
    async fn migration_first_then_adapter_push() {
        use crate::sync::SyncAdapter;

        let f = fixture();
        save_local_avatars(&f.local, &["a", "b"]);
        let reports = f.service.run_for_current_user().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].migrated_records.len(), 2);

        let adapter = SyncAdapter::new(
            SyncConfig::default(),
            DataDomain::Avatars,
            f.local.clone(),
            f.remote.clone(),
            Arc::new(StaticUserContext::signed_in("u1")),
        )
        .unwrap();
        adapter.set_item("prefs", json!({"theme": "dark"})).unwrap();
        adapter.manual_sync().await;
        assert_eq!(f.remote.records(DataDomain::Avatars).len(), 3);
    }

    #[tokio::test]
    async fn run_for_current_user_migrates_needed_domains() {
        let f = fixture();
        save_local_avatars(&f.local, &["a"]);
        f.local.set("metaverse-worlds", &json!([{"id": "w1"}]).to_string()).unwrap();
        f.remote.seed(DataDomain::Worlds, "u1", json!({}));

        let reports = f.service.run_for_current_user().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].domain, DataDomain::Avatars);
        assert_eq!(f.remote.create_calls(), 1);
    }
}
