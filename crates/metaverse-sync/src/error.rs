use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncSdkError {
    /// 本地存储写入/读取失败（配额、底层 IO 等）
    #[error("Local store error: {0}")]
    LocalStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 远端网关返回的错误（网络/服务端）
    #[error("Remote gateway error: {0}")]
    Remote(String),
    #[error("HTTP error [{status}]: {message}")]
    Http { status: u16, message: String },
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for SyncSdkError {
    fn from(error: serde_json::Error) -> Self {
        SyncSdkError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SyncSdkError {
    fn from(error: std::io::Error) -> Self {
        SyncSdkError::Io(error.to_string())
    }
}

impl From<sled::Error> for SyncSdkError {
    fn from(error: sled::Error) -> Self {
        SyncSdkError::LocalStore(error.to_string())
    }
}

impl From<reqwest::Error> for SyncSdkError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => SyncSdkError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None => SyncSdkError::Remote(error.to_string()),
        }
    }
}

impl SyncSdkError {
    /// 是否属于远端同步失败（RemoteSyncFailure）
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncSdkError::Remote(_) | SyncSdkError::Http { .. })
    }

    /// 目标记录不存在（包括远端返回 404）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncSdkError::NotFound(_) | SyncSdkError::Http { status: 404, .. }
        )
    }

    /// 是否属于本地写入失败（LocalWriteFailure）
    pub fn is_local_write(&self) -> bool {
        matches!(self, SyncSdkError::LocalStore(_) | SyncSdkError::Serialization(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncSdkError>;
