//! Consul HTTP API 客户端
//!
//! 只实现 Locker 需要的会话与 KV 接口：
//!
//! - `PUT /v1/session/create`，body `{"Name": .., "LockDelay": ..}`，返回 `{"ID": ..}`
//! - `PUT /v1/session/destroy/{id}`
//! - `PUT /v1/kv/{key}?acquire={id}` / `?release={id}`，返回 JSON 布尔值

use std::time::Duration;

use async_trait::async_trait;
use locker_shared::config::ConsulConfig;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{BackingStore, KvWrite, SessionSpec, WriteMode};
use crate::error::StoreError;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSessionBody<'a> {
    name: &'a str,
    lock_delay: String,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// Consul 后端
#[derive(Clone)]
pub struct ConsulStore {
    client: Client,
    base: Url,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulStore {
    pub fn new(config: &ConsulConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.address)
            .map_err(|e| StoreError::InvalidAddress(format!("{}: {}", config.address, e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidAddress(config.address.clone()));
        }

        let client = Client::builder().timeout(config.timeout()).build()?;

        info!(address = %base, datacenter = ?config.datacenter, "Consul client created");

        Ok(Self {
            client,
            base,
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
        })
    }

    /// 拼接 `/v1/...` 路径，每段单独做百分号编码
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn put_request(&self, url: Url) -> RequestBuilder {
        let mut request = self.client.put(url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StoreError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// 按 `/` 拆分 key
///
/// URL 会把 `.` 和 `..` 段当作相对路径折叠掉，写到另一个 key 上，因此直接拒绝。
fn kv_segments(key: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = key.split('/').collect();
    if segments.iter().any(|s| matches!(*s, "." | "..")) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}

/// Consul 的 duration 字符串，如 "0s"、"1500ms"
fn format_lock_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}

#[async_trait]
impl BackingStore for ConsulStore {
    #[instrument(skip(self), fields(name = %spec.name))]
    async fn create_session(&self, spec: &SessionSpec) -> Result<String, StoreError> {
        let body = CreateSessionBody {
            name: &spec.name,
            lock_delay: format_lock_delay(spec.lock_delay),
        };
        let request = self
            .put_request(self.endpoint(["session", "create"]))
            .json(&body);

        let created: CreateSessionResponse = Self::send(request).await?;
        debug!(session_id = %created.id, "Consul session created");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        let request = self.put_request(self.endpoint(["session", "destroy", session_id]));
        let _: bool = Self::send(request).await?;
        debug!("Consul session destroyed");
        Ok(())
    }

    #[instrument(skip(self, write), fields(key = %write.key))]
    async fn put(&self, write: &KvWrite) -> Result<bool, StoreError> {
        let url = self.endpoint(std::iter::once("kv").chain(kv_segments(&write.key)?));
        let (param, session_id) = match &write.mode {
            WriteMode::Acquire(id) => ("acquire", id),
            WriteMode::Release(id) => ("release", id),
        };

        let request = self
            .put_request(url)
            .query(&[(param, session_id)])
            .body(write.value.clone());

        Self::send(request).await
    }
}
