//! 同步引擎配置
//!
//! - `SyncConfig`：本地命名空间、防抖窗口、云同步开关、错误队列容量
//! - `HttpGatewayConfig`：远端数据网关的地址、超时与鉴权

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SyncSdkError};

/// 默认防抖窗口（毫秒）
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

/// 默认 pending_errors 容量
pub const DEFAULT_MAX_PENDING_ERRORS: usize = 10;

/// 默认本地命名空间
pub const DEFAULT_STORE_NAME: &str = "metaverse";

/// 同步适配器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 本地键命名空间，最终键为 `{store_name}-{key}`
    pub store_name: String,
    /// 防抖窗口（毫秒）
    pub debounce_ms: u64,
    /// 是否启用云同步；关闭时只做本地持久化
    pub cloud_sync_enabled: bool,
    /// pending_errors 最大条数，超出丢弃最旧的
    pub max_pending_errors: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cloud_sync_enabled: true,
            max_pending_errors: DEFAULT_MAX_PENDING_ERRORS,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.store_name.trim().is_empty() {
            return Err(SyncSdkError::Config("store_name 不能为空".to_string()));
        }
        if self.store_name.contains(':') {
            return Err(SyncSdkError::Config(format!(
                "store_name 不能包含 ':'（保留给元数据键）: {}",
                self.store_name
            )));
        }
        if self.max_pending_errors == 0 {
            return Err(SyncSdkError::Config("max_pending_errors 必须大于 0".to_string()));
        }
        Ok(())
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn store_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.store_name = name.into();
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn cloud_sync_enabled(mut self, enabled: bool) -> Self {
        self.config.cloud_sync_enabled = enabled;
        self
    }

    pub fn max_pending_errors(mut self, max: usize) -> Self {
        self.config.max_pending_errors = max;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP 远端网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGatewayConfig {
    /// API 基础 URL，例如 https://api.example.com/v1
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
    /// Bearer token（由认证层注入）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
            bearer_token: None,
        }
    }
}

impl HttpGatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SyncSdkError::Config(format!(
                "base_url 必须以 http:// 或 https:// 开头: {}",
                self.base_url
            )));
        }
        Ok(())
    }
}
