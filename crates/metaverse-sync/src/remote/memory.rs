use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

use super::{DataDomain, RemoteDataGateway, RemoteRecord};
use crate::error::{Result, SyncSdkError};

type FailPredicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// 进程内远端网关
///
/// 用于离线开发与测试：记录调用次数，支持失败注入和暂停（模拟挂起的网络请求）。
pub struct InMemoryRemoteGateway {
    records: Mutex<HashMap<DataDomain, Vec<RemoteRecord>>>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_next: AtomicUsize,
    fail_when: Mutex<Option<FailPredicate>>,
    unreachable: Mutex<bool>,
    gate: watch::Sender<bool>,
}

impl InMemoryRemoteGateway {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            records: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            fail_when: Mutex::new(None),
            unreachable: Mutex::new(false),
            gate,
        }
    }

    /// 预置远端记录（不计入调用次数）
    pub fn seed(&self, domain: DataDomain, user_id: &str, data: Value) -> RemoteRecord {
        let record = Self::new_record(Some(user_id.to_string()), data);
        self.records.lock().entry(domain).or_default().push(record.clone());
        record
    }

    pub fn records(&self, domain: DataDomain) -> Vec<RemoteRecord> {
        self.records.lock().get(&domain).cloned().unwrap_or_default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// create/update 调用总数
    pub fn write_calls(&self) -> usize {
        self.create_calls() + self.update_calls()
    }

    /// 接下来 n 次写调用失败
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// payload 满足条件的 create/update 失败
    pub fn fail_writes_when<F>(&self, predicate: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// 所有调用失败（模拟服务不可达）
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    /// 暂停：之后的写调用挂起直到 `resume`
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    fn new_record(user_id: Option<String>, data: Value) -> RemoteRecord {
        let now = Utc::now().to_rfc3339();
        RemoteRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            data,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if *self.unreachable.lock() {
            return Err(SyncSdkError::Remote("service unreachable".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self, payload: &Value) -> Result<()> {
        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(SyncSdkError::Remote("gateway closed".to_string()));
        }

        self.check_reachable()?;

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncSdkError::Remote("injected failure".to_string()));
        }
        if let Some(predicate) = self.fail_when.lock().as_ref() {
            if predicate(payload) {
                return Err(SyncSdkError::Remote("rejected by service".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryRemoteGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataGateway for InMemoryRemoteGateway {
    async fn create_record(&self, domain: DataDomain, payload: Value) -> Result<RemoteRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.before_write(&payload).await?;

        let user_id = payload
            .get("user_id")
            .and_then(Value::as_str)
            .map(String::from);
        let record = Self::new_record(user_id, payload);
        debug!("in-memory create {} -> {}", domain, record.id);
        self.records.lock().entry(domain).or_default().push(record.clone());
        Ok(record)
    }

    async fn list_records(&self, domain: DataDomain, user_id: &str) -> Result<Vec<RemoteRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        Ok(self
            .records(domain)
            .into_iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .collect())
    }

    async fn update_record(
        &self,
        domain: DataDomain,
        id: &str,
        payload: Value,
    ) -> Result<RemoteRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.before_write(&payload).await?;

        let mut records = self.records.lock();
        let record = records
            .get_mut(&domain)
            .and_then(|list| list.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| SyncSdkError::NotFound(format!("{} record {}", domain, id)))?;
        record.data = payload;
        record.updated_at = Some(Utc::now().to_rfc3339());
        Ok(record.clone())
    }

    async fn delete_record(&self, domain: DataDomain, id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let mut records = self.records.lock();
        if let Some(list) = records.get_mut(&domain) {
            list.retain(|r| r.id != id);
        }
        Ok(())
    }
}
