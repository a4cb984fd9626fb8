//! KV 存储模块 - 基于 sled 的持久化 LocalStore
//!
//! 本模块提供：
//! - 同步的键值读写（sled 本身是同步 API，写入后立即可读）
//! - 按前缀扫描
//! - 后台 flush

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sled::{Db, Tree};

use super::LocalStore;
use crate::error::{Result, SyncSdkError};

const DEFAULT_TREE: &str = "local_store";

/// 文件锁被占用时的重试间隔：300ms 起每次翻倍，共 8 次尝试
const LOCK_BACKOFF_MS: [u64; 7] = [300, 600, 1200, 2400, 4800, 9600, 19200];

/// 同一路径的上一个 sled 实例可能尚未释放文件锁
fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock => true,
        other => {
            let msg = other.to_string();
            msg.contains("could not acquire lock") || msg.contains("Resource temporarily unavailable")
        }
    }
}

async fn open_db_with_backoff(path: &Path) -> Result<Db> {
    let mut delays = LOCK_BACKOFF_MS.iter();
    loop {
        let err = match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(err) => err,
        };
        match delays.next() {
            Some(&delay_ms) if is_lock_contention(&err) => {
                tracing::debug!("sled 文件锁被占用，{}ms 后重试: {}", delay_ms, path.display());
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            _ => {
                return Err(SyncSdkError::LocalStore(format!(
                    "打开 sled 数据库失败 ({}): {}",
                    path.display(),
                    err
                )))
            }
        }
    }
}

/// 基于 sled 的 LocalStore
#[derive(Debug, Clone)]
pub struct SledLocalStore {
    base_path: PathBuf,
    db: Arc<Db>,
    tree: Tree,
}

impl SledLocalStore {
    /// 打开（或创建）`{base_path}/kv` 下的 sled 数据库
    pub async fn open(base_path: &Path) -> Result<Self> {
        Self::open_tree(base_path, DEFAULT_TREE).await
    }

    /// 打开指定名称的 Tree，不同 Tree 之间的键互不可见
    pub async fn open_tree(base_path: &Path, tree_name: &str) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| SyncSdkError::Io(format!("创建 KV 存储目录失败: {}", e)))?;

        let db = open_db_with_backoff(&kv_path).await?;

        let tree = db
            .open_tree(tree_name)
            .map_err(|e| SyncSdkError::LocalStore(format!("打开 Tree 失败: {}", e)))?;

        tracing::info!("本地 KV 存储已打开: {} (tree: {})", kv_path.display(), tree_name);

        Ok(Self {
            base_path,
            db: Arc::new(db),
            tree,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 键数量
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// 将缓冲写入刷到磁盘
    pub async fn flush(&self) -> Result<usize> {
        self.db
            .flush_async()
            .await
            .map_err(|e| SyncSdkError::LocalStore(format!("flush 失败: {}", e)))
    }
}

impl LocalStore for SledLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .tree
            .get(key)
            .map_err(|e| SyncSdkError::LocalStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec())
                    .map_err(|e| SyncSdkError::Serialization(format!("值不是合法 UTF-8: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree
            .insert(key, value.as_bytes())
            .map_err(|e| SyncSdkError::LocalStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.tree
            .remove(key)
            .map_err(|e| SyncSdkError::LocalStore(format!("删除键值对失败: {}", e)))?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for result in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) =
                result.map_err(|e| SyncSdkError::LocalStore(format!("扫描前缀失败: {}", e)))?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.tree
            .contains_key(key)
            .map_err(|e| SyncSdkError::LocalStore(format!("检查键存在失败: {}", e)))
    }
}
