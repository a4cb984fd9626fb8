//! 本地存储模块 - 同步引擎的本地优先持久化层
//!
//! 采用分层设计：
//! - LocalStore: 同步的字符串键值原语（由宿主提供，或使用内置实现）
//! - MemoryLocalStore / SledLocalStore: 内置实现
//! - BackupStore: 迁移前后的不可变备份快照
//!
//! 键格式：
//! - 业务数据：`{store_name}-{name}`
//! - 远端关联元数据：`sync_meta:{store_name}-{name}`
//! - 备份：`backup_{domain}_{timestamp}`

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SyncSdkError};

pub mod backup;
pub mod kv;
pub mod memory;

pub use backup::{BackupSnapshot, BackupStore, BACKUP_PREFIX};
pub use kv::SledLocalStore;
pub use memory::MemoryLocalStore;

/// 远端关联元数据键前缀
pub const SYNC_META_PREFIX: &str = "sync_meta";

/// 同步的字符串键值存储
///
/// 所有方法都不会挂起：`set` 返回即代表本地已落盘（或已写入内存）。
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// 列出指定前缀的全部键（按字典序）
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// 生成命名空间键 `{store_name}-{name}`
pub fn namespaced_key(store_name: &str, name: &str) -> String {
    format!("{}-{}", store_name, name)
}

/// 远端关联元数据键 `sync_meta:{namespaced_key}`
pub fn sync_meta_key(namespaced: &str) -> String {
    format!("{}:{}", SYNC_META_PREFIX, namespaced)
}

/// 读取并反序列化 JSON 值
pub fn get_json<T>(store: &dyn LocalStore, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw).map_err(|e| {
                SyncSdkError::Serialization(format!("反序列化本地值失败 ({}): {}", key, e))
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// 序列化并写入 JSON 值
pub fn set_json<T>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)
        .map_err(|e| SyncSdkError::Serialization(format!("序列化本地值失败 ({}): {}", key, e)))?;
    store.set(key, &raw)
}
