//! HTTP implementation of the upstream inbox API.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::models::{Message, NewMessage};
use super::query::{InboxApi, ListParams};
use crate::errors::{InboxError, Result};

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Talks to an inbox-sync server over its REST surface. Retries are left to
/// the caller; a failed request surfaces as an error once.
#[derive(Clone)]
pub struct HttpInboxApi {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpInboxApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| InboxError::Other(anyhow::anyhow!("Invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(InboxError::Other(anyhow::anyhow!(
                "Base URL '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn messages_url(&self, team_id: &str, suffix: &str, params: Option<&ListParams>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| InboxError::Other(anyhow::anyhow!("Base URL cannot have a path")))?
            .pop_if_empty()
            .extend(["api", "teams", team_id, "messages"]);
        if !suffix.is_empty() {
            url.path_segments_mut()
                .map_err(|_| InboxError::Other(anyhow::anyhow!("Base URL cannot have a path")))?
                .push(suffix);
        }
        if let Some(params) = params {
            let query = params.to_query_string();
            url.set_query(if query.is_empty() { None } else { Some(&query) });
        }
        Ok(url)
    }

    /// Capture a message into the team inbox.
    pub async fn insert(&self, team_id: &str, message: &NewMessage) -> Result<Message> {
        message.validate().map_err(InboxError::InvalidMessage)?;
        let url = self.messages_url(team_id, "", None)?;
        let resp = self.http.post(url).json(message).send().await?;
        decode_response(resp).await
    }
}

#[async_trait]
impl InboxApi for HttpInboxApi {
    async fn list(&self, team_id: &str, params: &ListParams) -> Result<Vec<Message>> {
        let url = self.messages_url(team_id, "", Some(params))?;
        let resp = self.http.get(url).send().await?;
        decode_response(resp).await
    }

    async fn count(&self, team_id: &str, params: &ListParams) -> Result<u64> {
        let url = self.messages_url(team_id, "count", Some(params))?;
        let resp = self.http.get(url).send().await?;
        let body: CountResponse = decode_response(resp).await?;
        Ok(body.count)
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error)
        .unwrap_or(text);
    Err(InboxError::Api {
        status: status.as_u16(),
        message,
    })
}
