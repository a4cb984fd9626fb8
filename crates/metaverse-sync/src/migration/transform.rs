//! 本地记录 → 远端结构的转换
//!
//! 本地状态容器里的记录字段不全、命名不一（camelCase / 嵌套配置），
//! 转换时把本地 id 映射为 `local_id`，缺失字段补默认值。

use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SyncSdkError};
use crate::remote::DataDomain;

const DEFAULT_AVATAR_NAME: &str = "Untitled Avatar";
const DEFAULT_WORLD_NAME: &str = "Untitled World";

/// 从本地持久化数据中取出记录数组
///
/// 支持两种形状：裸数组，或状态容器信封 `{"state": {"<collection>": [...]}, "version": n}`。
pub fn extract_records(domain: DataDomain, payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => obj
            .get("state")
            .and_then(|state| state.get(domain.collection_field()))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// 本地记录的 id（字符串或数字）
pub fn local_record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 时间字段统一成 RFC 3339；数字按毫秒时间戳处理
fn normalize_timestamp(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|dt| dt.to_rfc3339()),
        _ => None,
    }
}

/// 同一字段的不同拼写，按优先级排列
const AVATAR_DATA_FIELDS: &[&str] = &["avatar_data", "avatarData", "config", "data"];
const WORLD_DATA_FIELDS: &[&str] = &["world_data", "worldData", "scene", "data"];
const THUMBNAIL_FIELDS: &[&str] = &["thumbnail_url", "thumbnailUrl", "thumbnail"];
const CREATED_AT_FIELDS: &[&str] = &["created_at", "createdAt"];
const IS_PUBLIC_FIELDS: &[&str] = &["is_public", "isPublic"];

/// 按优先级取第一个非 null 的字段
fn first_field<'a>(record: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .find(|value| !value.is_null())
}

fn string_field(record: &Map<String, Value>, names: &[&str]) -> Result<Option<String>> {
    match first_field(record, names) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SyncSdkError::InvalidData(format!(
            "字段 {} 应为字符串: {}",
            names[0], other
        ))),
    }
}

fn bool_field(record: &Map<String, Value>, names: &[&str]) -> Result<Option<bool>> {
    match first_field(record, names) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(SyncSdkError::InvalidData(format!(
            "字段 {} 应为布尔值: {}",
            names[0], other
        ))),
    }
}

fn name_or(record: &Map<String, Value>, default: &str) -> Result<String> {
    Ok(string_field(record, &["name"])?
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default.to_string()))
}

#[derive(Debug, Serialize)]
struct RemoteAvatarPayload {
    user_id: String,
    local_id: String,
    name: String,
    avatar_data: Value,
    thumbnail_url: Option<String>,
    is_primary: bool,
    created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct RemoteWorldPayload {
    user_id: String,
    local_id: String,
    name: String,
    description: String,
    world_data: Value,
    is_public: bool,
    thumbnail_url: Option<String>,
    created_at: Option<String>,
}

/// 去掉 id 后的记录本体，用作缺省的数据字段
fn body_without_id(record: &Map<String, Value>) -> Value {
    let mut body = record.clone();
    body.remove("id");
    Value::Object(body)
}

/// 转换一条本地记录为远端 payload
pub fn to_remote_payload(domain: DataDomain, user_id: &str, record: &Value) -> Result<Value> {
    let obj = record
        .as_object()
        .ok_or_else(|| SyncSdkError::InvalidData("本地记录不是对象".to_string()))?;
    let local_id = local_record_id(record)
        .ok_or_else(|| SyncSdkError::InvalidData("本地记录缺少 id".to_string()))?;
    let invalid = |e: SyncSdkError| {
        SyncSdkError::InvalidData(format!("{} 记录 {} 格式错误: {}", domain, local_id, e))
    };

    let thumbnail_url = string_field(obj, THUMBNAIL_FIELDS).map_err(invalid)?;
    let created_at = normalize_timestamp(first_field(obj, CREATED_AT_FIELDS).cloned());

    let payload = match domain {
        DataDomain::Avatars => serde_json::to_value(RemoteAvatarPayload {
            user_id: user_id.to_string(),
            name: name_or(obj, DEFAULT_AVATAR_NAME).map_err(invalid)?,
            avatar_data: first_field(obj, AVATAR_DATA_FIELDS)
                .cloned()
                .unwrap_or_else(|| body_without_id(obj)),
            thumbnail_url,
            is_primary: false,
            created_at,
            local_id,
        })?,
        DataDomain::Worlds => serde_json::to_value(RemoteWorldPayload {
            user_id: user_id.to_string(),
            name: name_or(obj, DEFAULT_WORLD_NAME).map_err(invalid)?,
            description: string_field(obj, &["description"])
                .map_err(invalid)?
                .unwrap_or_default(),
            world_data: first_field(obj, WORLD_DATA_FIELDS)
                .cloned()
                .unwrap_or_else(|| body_without_id(obj)),
            is_public: bool_field(obj, IS_PUBLIC_FIELDS).map_err(invalid)?.unwrap_or(false),
            thumbnail_url,
            created_at,
            local_id,
        })?,
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_from_array_and_envelope() {
        let bare = json!([{"id": "a"}, {"id": "b"}]);
        assert_eq!(extract_records(DataDomain::Avatars, &bare).len(), 2);

        let envelope = json!({"state": {"savedAvatars": [{"id": "a"}]}, "version": 0});
        assert_eq!(extract_records(DataDomain::Avatars, &envelope).len(), 1);
        // 字段不匹配的数据域取不到
        assert!(extract_records(DataDomain::Worlds, &envelope).is_empty());
        assert!(extract_records(DataDomain::Worlds, &json!("junk")).is_empty());
    }

    #[test]
    fn avatar_defaults_are_filled() {
        let record = json!({"id": 42, "config": {"hair": "long"}, "createdAt": 0});
        let payload = to_remote_payload(DataDomain::Avatars, "u1", &record).unwrap();

        assert_eq!(payload["local_id"], "42");
        assert_eq!(payload["user_id"], "u1");
        assert_eq!(payload["name"], DEFAULT_AVATAR_NAME);
        assert_eq!(payload["avatar_data"], json!({"hair": "long"}));
        assert_eq!(payload["is_primary"], false);
        assert!(payload["thumbnail_url"].is_null());
        assert_eq!(payload["created_at"], "1970-01-01T00:00:00+00:00");
        assert!(payload.get("id").is_none());
    }

    #[test]
    fn world_without_explicit_data_uses_record_body() {
        let record = json!({"id": "w1", "name": "Lobby", "objects": [1, 2], "isPublic": true});
        let payload = to_remote_payload(DataDomain::Worlds, "u1", &record).unwrap();

        assert_eq!(payload["name"], "Lobby");
        assert_eq!(payload["description"], "");
        assert_eq!(payload["is_public"], true);
        assert_eq!(payload["world_data"]["objects"], json!([1, 2]));
        assert!(payload["world_data"].get("id").is_none());
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(to_remote_payload(DataDomain::Avatars, "u1", &json!("a")).is_err());
        assert!(to_remote_payload(DataDomain::Avatars, "u1", &json!({"name": "x"})).is_err());
        assert!(to_remote_payload(DataDomain::Worlds, "u1", &json!({"id": "w", "isPublic": "yes"})).is_err());
        assert!(to_remote_payload(DataDomain::Avatars, "u1", &json!({"id": "a", "name": 7})).is_err());
    }

    #[test]
    fn records_with_several_spellings_use_the_preferred_one() {
        let avatar = json!({
            "id": "a",
            "config": {"hair": "short"},
            "avatarData": {"hair": "long"},
            "thumbnail": "old.png",
            "thumbnailUrl": "new.png",
        });
        let payload = to_remote_payload(DataDomain::Avatars, "u1", &avatar).unwrap();
        assert_eq!(payload["avatar_data"], json!({"hair": "long"}));
        assert_eq!(payload["thumbnail_url"], "new.png");

        let world = json!({
            "id": "w",
            "scene": {"objects": 1},
            "data": {"objects": 2},
            "createdAt": "2024-01-01T00:00:00Z",
            "created_at": "2023-06-01T00:00:00Z",
            "isPublic": true,
            "is_public": null,
        });
        let payload = to_remote_payload(DataDomain::Worlds, "u1", &world).unwrap();
        assert_eq!(payload["world_data"], json!({"objects": 1}));
        assert_eq!(payload["created_at"], "2023-06-01T00:00:00Z");
        assert_eq!(payload["is_public"], true);
    }
}
