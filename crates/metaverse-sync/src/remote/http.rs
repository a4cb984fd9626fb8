//! HTTP 远端网关 - REST 映射
//!
//! - `POST   {base}/{domain}`              创建
//! - `GET    {base}/{domain}?user_id=...`  列表
//! - `PUT    {base}/{domain}/{id}`         更新
//! - `DELETE {base}/{domain}/{id}`         删除

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DataDomain, RemoteDataGateway, RemoteRecord};
use crate::config::HttpGatewayConfig;
use crate::error::{Result, SyncSdkError};
use crate::version;

pub struct HttpRemoteGateway {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpRemoteGateway {
    pub fn new(config: &HttpGatewayConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Client::builder().user_agent(version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| SyncSdkError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!("✅ HTTP 远端网关已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn collection_url(&self, domain: DataDomain) -> String {
        format!("{}/{}", self.base_url, domain.as_str())
    }

    fn record_url(&self, domain: DataDomain, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, domain.as_str(), id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 非 2xx 转换为 Http 错误，携带响应体便于排查
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("远端网关返回 {}: {}", status, body);
        Err(SyncSdkError::Http {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl RemoteDataGateway for HttpRemoteGateway {
    async fn create_record(&self, domain: DataDomain, payload: Value) -> Result<RemoteRecord> {
        let url = self.collection_url(domain);
        debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url).json(&payload))
            .send()
            .await?;
        let record = Self::check_status(response).await?.json().await?;
        Ok(record)
    }

    async fn list_records(&self, domain: DataDomain, user_id: &str) -> Result<Vec<RemoteRecord>> {
        let url = self.collection_url(domain);
        debug!("GET {} (user_id={})", url, user_id);
        let response = self
            .authorize(self.client.get(&url).query(&[("user_id", user_id)]))
            .send()
            .await?;
        let records = Self::check_status(response).await?.json().await?;
        Ok(records)
    }

    async fn update_record(
        &self,
        domain: DataDomain,
        id: &str,
        payload: Value,
    ) -> Result<RemoteRecord> {
        let url = self.record_url(domain, id);
        debug!("PUT {}", url);
        let response = self
            .authorize(self.client.put(&url).json(&payload))
            .send()
            .await?;
        let record = Self::check_status(response).await?.json().await?;
        Ok(record)
    }

    async fn delete_record(&self, domain: DataDomain, id: &str) -> Result<()> {
        let url = self.record_url(domain, id);
        debug!("DELETE {}", url);
        let response = self.authorize(self.client.delete(&url)).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
