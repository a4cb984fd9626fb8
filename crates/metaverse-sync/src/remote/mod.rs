//! 远端数据网关 - 云端存储的抽象边界
//!
//! 具体的 HTTP/RPC 实现在边界处注入；同步引擎只依赖 `RemoteDataGateway`。

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::Result;

mod http;
mod memory;

pub use http::HttpRemoteGateway;
pub use memory::InMemoryRemoteGateway;

/// 数据域（受控枚举，新增需与服务端同步升级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    Avatars,
    Worlds,
}

impl DataDomain {
    pub const ALL: &'static [DataDomain] = &[DataDomain::Avatars, DataDomain::Worlds];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatars => "avatars",
            Self::Worlds => "worlds",
        }
    }

    /// 状态容器持久化信封中记录数组所在字段
    pub fn collection_field(self) -> &'static str {
        match self {
            Self::Avatars => "savedAvatars",
            Self::Worlds => "worlds",
        }
    }
}

impl FromStr for DataDomain {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "avatars" => Ok(Self::Avatars),
            "worlds" => Ok(Self::Worlds),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DataDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 远端记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// 字符串或数字主键，统一存为字符串
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn deserialize_record_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!(
            "record id must be a string or number, got {}",
            other
        ))),
    }
}

/// 远端数据网关
///
/// 假定 create 可以容忍重试（不会因重复创建而破坏数据），但本 crate 不强制这一点。
#[async_trait]
pub trait RemoteDataGateway: Send + Sync {
    async fn create_record(&self, domain: DataDomain, payload: Value) -> Result<RemoteRecord>;

    async fn list_records(&self, domain: DataDomain, user_id: &str) -> Result<Vec<RemoteRecord>>;

    async fn update_record(
        &self,
        domain: DataDomain,
        id: &str,
        payload: Value,
    ) -> Result<RemoteRecord>;

    async fn delete_record(&self, domain: DataDomain, id: &str) -> Result<()>;
}
