//! REST gateway over reqwest

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{
    GatewayError, GatewayResult, RecordEnvelope, RemoteGateway, RemoteRecord, OWNER_HEADER,
    RECORD_NOT_FOUND_CODE,
};
use crate::config::{normalize_base_url, EngineConfig};
use crate::error::Result;
use crate::models::{OwnerId, Payload, RemoteId};
use crate::util::compact_text;

/// `RemoteGateway` for `/v1/<resource>` on a Stow-compatible service
pub struct HttpGateway<T> {
    collection_url: String,
    client: reqwest::Client,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpGateway<T> {
    fn clone(&self) -> Self {
        Self {
            collection_url: self.collection_url.clone(),
            client: self.client.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T: Payload> HttpGateway<T> {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                crate::Error::Config(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self::with_client(normalize_base_url(base_url.into())?, client))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.api_base_url.clone(), config.request_timeout)
    }

    /// Share an existing client; `base_url` must already be normalized
    pub fn with_client(base_url: String, client: reqwest::Client) -> Self {
        Self {
            collection_url: format!("{base_url}/v1/{}", T::KIND.resource()),
            client,
            _payload: PhantomData,
        }
    }

    fn item_url(&self, remote_id: &RemoteId) -> String {
        format!(
            "{}/{}",
            self.collection_url,
            urlencoding::encode(remote_id.as_str())
        )
    }
}

#[async_trait]
impl<T: Payload> RemoteGateway<T> for HttpGateway<T> {
    async fn create(&self, owner: &OwnerId, payload: &T) -> GatewayResult<RemoteId> {
        let response = self
            .client
            .post(&self.collection_url)
            .header(OWNER_HEADER, owner.as_str())
            .json(&RecordEnvelope {
                owner: owner.clone(),
                payload,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let created: RemoteRecord<serde_json::Value> = decode(ensure_success(response).await?).await?;
        debug!(kind = %T::KIND, remote_id = %created.remote_id, "remote create accepted");
        Ok(created.remote_id)
    }

    async fn update(
        &self,
        owner: &OwnerId,
        remote_id: &RemoteId,
        payload: &T,
    ) -> GatewayResult<()> {
        let response = self
            .client
            .put(self.item_url(remote_id))
            .header(OWNER_HEADER, owner.as_str())
            .json(&RecordEnvelope {
                owner: owner.clone(),
                payload,
            })
            .send()
            .await
            .map_err(transport_error)?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, owner: &OwnerId, remote_id: &RemoteId) -> GatewayResult<()> {
        let response = self
            .client
            .delete(self.item_url(remote_id))
            .header(OWNER_HEADER, owner.as_str())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_record_not_found(&body) {
            debug!(kind = %T::KIND, %remote_id, "remote record already gone");
            return Ok(());
        }
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }

    async fn list(&self, owner: &OwnerId) -> GatewayResult<Vec<RemoteRecord<T>>> {
        let response = self
            .client
            .get(&self.collection_url)
            .header(OWNER_HEADER, owner.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        decode(ensure_success(response).await?).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    code: Option<String>,
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Unreachable(format!("request timed out: {error}"))
    } else {
        GatewayError::Unreachable(error.to_string())
    }
}

async fn ensure_success(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

async fn decode<R: serde::de::DeserializeOwned>(response: Response) -> GatewayResult<R> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|error| GatewayError::Rejected {
        status: status.as_u16(),
        message: format!("invalid response body: {error}"),
    })
}

fn is_record_not_found(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .is_ok_and(|payload| payload.code.as_deref() == Some(RECORD_NOT_FOUND_CODE))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}
