use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::LocalStore;
use crate::error::{Result, SyncSdkError};

/// 内存中的 LocalStore，可选字节配额（模拟浏览器 localStorage 的 quota）
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带配额的存储；超过配额的写入返回 LocalStore 错误
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let projected = Self::used_bytes(&entries) - existing + key.len() + value.len();
            if projected > quota {
                return Err(SyncSdkError::LocalStore(format!(
                    "quota exceeded: {} > {} bytes (key: {})",
                    projected, quota, key
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
