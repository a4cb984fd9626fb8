//! 备份快照 - 迁移/清理前的本地原始数据
//!
//! 快照一旦写入不再修改，也不会被自动删除。

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::info;

use super::LocalStore;
use crate::error::{Result, SyncSdkError};
use crate::remote::DataDomain;

pub const BACKUP_PREFIX: &str = "backup_";

/// 一份备份快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub key: String,
    pub domain: DataDomain,
    /// 未经转换的原始本地数据
    pub payload: String,
}

/// 备份快照存储
#[derive(Clone)]
pub struct BackupStore {
    local: Arc<dyn LocalStore>,
}

impl BackupStore {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self { local }
    }

    /// `backup_{domain}_{ISO8601}`，时间戳中的 `:` 和 `.` 替换为 `-`
    pub fn backup_key(domain: DataDomain, at: DateTime<Utc>) -> String {
        let timestamp = at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}{}_{}", BACKUP_PREFIX, domain.as_str(), timestamp)
    }

    fn domain_prefix(domain: DataDomain) -> String {
        format!("{}{}_", BACKUP_PREFIX, domain.as_str())
    }

    /// 写入一份快照并返回键
    pub fn create(&self, domain: DataDomain, payload: &str) -> Result<String> {
        self.create_at(domain, payload, Utc::now())
    }

    pub(crate) fn create_at(
        &self,
        domain: DataDomain,
        payload: &str,
        at: DateTime<Utc>,
    ) -> Result<String> {
        let base = Self::backup_key(domain, at);
        let mut key = base.clone();
        // 同一毫秒内的多次备份追加序号，已有快照不覆盖
        let mut suffix = 1u32;
        while self.local.contains(&key)? {
            key = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        self.local.set(&key, payload)?;
        info!("💾 已写入备份快照: {} ({} bytes)", key, payload.len());
        Ok(key)
    }

    /// 列出某个数据域的全部快照（按时间升序，同一毫秒内按序号升序）
    pub fn list(&self, domain: DataDomain) -> Result<Vec<String>> {
        let mut keys = self.local.keys_with_prefix(&Self::domain_prefix(domain))?;
        keys.sort_by(|a, b| Self::order_key(a).cmp(&Self::order_key(b)));
        Ok(keys)
    }

    /// `(时间戳部分, 冲突序号)`；时间戳定长，可直接按字典序比较
    fn order_key(key: &str) -> (&str, u32) {
        match key.rfind('Z') {
            Some(idx) => {
                let (stamp, rest) = key.split_at(idx + 1);
                let suffix = rest
                    .strip_prefix('-')
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                (stamp, suffix)
            }
            None => (key, 0),
        }
    }

    pub fn get(&self, key: &str) -> Result<BackupSnapshot> {
        let domain = DataDomain::ALL
            .iter()
            .copied()
            .find(|d| key.starts_with(&Self::domain_prefix(*d)))
            .ok_or_else(|| SyncSdkError::InvalidData(format!("不是备份键: {}", key)))?;
        let payload = self
            .local
            .get(key)?
            .ok_or_else(|| SyncSdkError::NotFound(format!("备份不存在: {}", key)))?;
        Ok(BackupSnapshot {
            key: key.to_string(),
            domain,
            payload,
        })
    }
}
