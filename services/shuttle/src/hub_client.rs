//! Thin HTTP client for the hub's paged per-fid message inventory.

use hub_protocol::{MessageType, MessagesPage};

#[derive(Debug, thiserror::Error)]
pub enum HubClientError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hub returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[derive(Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// One page of a fid's live inventory of `message_type`. Pass the
    /// returned `next_page_token` back until it comes up empty.
    pub async fn get_messages_by_fid(
        &self,
        fid: u64,
        message_type: MessageType,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagesPage, HubClientError> {
        let url = format!(
            "{}/v1/messages/{}/{}",
            self.base_url,
            fid,
            message_type.as_str()
        );
        let mut request = self
            .http
            .get(&url)
            .query(&[("page_size", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HubClientError::Status { status, body });
        }
        Ok(response.json().await?)
    }
}
