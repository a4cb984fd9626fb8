use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sync::SyncAdapter;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 连接中
    Connecting,
    /// 网络受限
    Limited,
}

impl NetworkStatus {
    /// Some(true) 在线，Some(false) 离线，None 不改变模式
    fn online(self) -> Option<bool> {
        match self {
            NetworkStatus::Online | NetworkStatus::Limited => Some(true),
            NetworkStatus::Offline => Some(false),
            NetworkStatus::Connecting => None,
        }
    }
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

/// 网络状态监听器trait（由平台层实现，如浏览器 online/offline 事件）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 一次状态处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// 切到在线，附带处理的适配器数
    WentOnline(usize),
    /// 切到离线，附带处理的适配器数
    WentOffline(usize),
    /// 模式未变化
    Unchanged,
}

/// 网络模式监控：把连接状态变化同步到所有已注册的适配器
pub struct NetworkModeMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    adapters: Mutex<Vec<Weak<SyncAdapter>>>,
    current_status: Mutex<NetworkStatus>,
    /// 最近一次生效的模式；None 表示还没有收到过状态
    online: Mutex<Option<bool>>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkModeMonitor {
    pub fn new(listener: Arc<dyn NetworkStatusListener>) -> Arc<Self> {
        let (status_sender, _) = broadcast::channel(100);

        Arc::new(Self {
            listener,
            adapters: Mutex::new(Vec::new()),
            current_status: Mutex::new(NetworkStatus::Offline),
            online: Mutex::new(None),
            status_sender,
            task: Mutex::new(None),
        })
    }

    /// 注册适配器（弱引用，适配器被释放后自动移除）
    pub fn register(&self, adapter: &Arc<SyncAdapter>) {
        let mut adapters = self.adapters.lock();
        adapters.retain(|a| a.strong_count() > 0);
        adapters.push(Arc::downgrade(adapter));
        info!("✅ 适配器已注册到网络监控: {} (共 {} 个)", adapter.store_name(), adapters.len());
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters
            .lock()
            .iter()
            .filter(|a| a.strong_count() > 0)
            .count()
    }

    fn live_adapters(&self) -> Vec<Arc<SyncAdapter>> {
        let mut adapters = self.adapters.lock();
        adapters.retain(|a| a.strong_count() > 0);
        adapters.iter().filter_map(Weak::upgrade).collect()
    }

    /// 启动网络监控：先应用当前状态，再在后台处理后续变化
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut receiver = self.listener.start_monitoring().await?;

        let initial = self.listener.get_current_status().await;
        self.handle_status(initial).await;

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Some(monitor) = weak.upgrade() else { break };
                        monitor.handle_status(event.new_status).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 网络状态事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("网络监控任务退出");
        });

        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
        Ok(())
    }

    /// 停止网络监控
    pub async fn stop(&self) {
        self.listener.stop_monitoring().await;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// 应用一次网络状态
    ///
    /// - 切到在线：每个适配器 `set_offline_mode(false)`；从离线恢复的适配器在其中完成对账同步，
    ///   本来就在线的适配器再做一次 `manual_sync()`
    /// - 切到离线：每个适配器 `set_offline_mode(true)`
    pub async fn handle_status(&self, new_status: NetworkStatus) -> ModeTransition {
        let old_status = std::mem::replace(&mut *self.current_status.lock(), new_status);
        let _ = self.status_sender.send(NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });

        let Some(online) = new_status.online() else {
            return ModeTransition::Unchanged;
        };
        {
            let mut current = self.online.lock();
            if *current == Some(online) {
                return ModeTransition::Unchanged;
            }
            *current = Some(online);
        }

        let adapters = self.live_adapters();
        if online {
            info!("🌐 网络恢复，{} 个适配器切回在线并同步", adapters.len());
            join_all(adapters.iter().map(|adapter| async move {
                if adapter.set_offline_mode(false).await.is_none() {
                    adapter.manual_sync().await;
                }
            }))
            .await;
            ModeTransition::WentOnline(adapters.len())
        } else {
            info!("📴 网络断开，{} 个适配器切到离线模式", adapters.len());
            for adapter in &adapters {
                adapter.set_offline_mode(true).await;
            }
            ModeTransition::WentOffline(adapters.len())
        }
    }

    /// 获取当前网络状态
    pub fn get_status(&self) -> NetworkStatus {
        *self.current_status.lock()
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }

    /// 检查网络连接（通过网络状态判断）
    pub fn check_connection(&self) -> bool {
        matches!(self.get_status(), NetworkStatus::Online | NetworkStatus::Limited)
    }
}


#[cfg(test)]
mod tests {
    use super::test_helpers::DummyNetworkStatusListener;
    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{DataDomain, InMemoryRemoteGateway};
    use crate::storage::MemoryLocalStore;
    use crate::user_context::StaticUserContext;
    use serde_json::json;
    use std::time::Duration;

    fn adapter(store: &str, remote: Arc<InMemoryRemoteGateway>) -> Arc<SyncAdapter> {
        Arc::new(
            SyncAdapter::new(
                SyncConfig::builder().store_name(store).build(),
                DataDomain::Worlds,
                Arc::new(MemoryLocalStore::new()),
                remote,
                Arc::new(StaticUserContext::signed_in("u1")),
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn offline_then_online_reconciles_each_adapter_once() {
        let remote = Arc::new(InMemoryRemoteGateway::new());
        let a = adapter("world-a", remote.clone());
        let b = adapter("world-b", remote.clone());

        let monitor = NetworkModeMonitor::new(Arc::new(DummyNetworkStatusListener::new(
            NetworkStatus::Online,
        )));
        monitor.register(&a);
        monitor.register(&b);
        assert_eq!(monitor.handle_status(NetworkStatus::Online).await, ModeTransition::WentOnline(2));

        assert_eq!(monitor.handle_status(NetworkStatus::Offline).await, ModeTransition::WentOffline(2));
        assert!(a.is_offline() && b.is_offline());

        a.set_item("scene", json!({"objects": 3})).unwrap();
        b.set_item("scene", json!({"objects": 5})).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(remote.write_calls(), 0);

        assert_eq!(monitor.handle_status(NetworkStatus::Online).await, ModeTransition::WentOnline(2));
        assert!(!a.is_offline() && !b.is_offline());
        assert_eq!(remote.create_calls(), 2);
        assert!(monitor.check_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_and_connecting_statuses_do_not_toggle() {
        let remote = Arc::new(InMemoryRemoteGateway::new());
        let a = adapter("world-a", remote.clone());
        let monitor = NetworkModeMonitor::new(Arc::new(DummyNetworkStatusListener::new(
            NetworkStatus::Offline,
        )));
        monitor.register(&a);

        assert_eq!(monitor.handle_status(NetworkStatus::Offline).await, ModeTransition::WentOffline(1));
        assert_eq!(monitor.handle_status(NetworkStatus::Offline).await, ModeTransition::Unchanged);
        assert_eq!(monitor.handle_status(NetworkStatus::Connecting).await, ModeTransition::Unchanged);
        assert!(a.is_offline());
        assert_eq!(monitor.get_status(), NetworkStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_events_drive_adapters() {
        let remote = Arc::new(InMemoryRemoteGateway::new());
        let a = adapter("world-a", remote.clone());
        let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Online));
        let monitor = NetworkModeMonitor::new(listener.clone());
        monitor.register(&a);
        monitor.start().await.unwrap();

        listener.emit(NetworkStatus::Offline);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(a.is_offline());

        a.set_item("scene", json!({"objects": 1})).unwrap();
        listener.emit(NetworkStatus::Online);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!a.is_offline());
        assert_eq!(remote.create_calls(), 1);

        monitor.stop().await;
    }

    #[tokio::test]
    async fn dropped_adapters_are_pruned() {
        let remote = Arc::new(InMemoryRemoteGateway::new());
        let monitor = NetworkModeMonitor::new(Arc::new(DummyNetworkStatusListener::new(
            NetworkStatus::Online,
        )));
        let a = adapter("world-a", remote.clone());
        {
            let b = adapter("world-b", remote);
            monitor.register(&a);
            monitor.register(&b);
            assert_eq!(monitor.adapter_count(), 2);
        }
        assert_eq!(monitor.adapter_count(), 1);
        assert_eq!(monitor.handle_status(NetworkStatus::Offline).await, ModeTransition::WentOffline(1));
    }
}
