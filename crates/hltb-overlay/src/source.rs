//! Remote lookup of completion times.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{HltbRecord, OverlayError, OverlayResult, SubjectId};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where completion times come from.
///
/// `Ok(None)` is an authoritative "no entry for this game" and gets cached;
/// `Err` is a transient failure and does not.
#[async_trait(?Send)]
pub trait HltbSource {
    async fn lookup(&self, id: SubjectId) -> OverlayResult<Option<HltbRecord>>;
}

/// Envelope returned by the lookup backend.
#[derive(Debug, Deserialize)]
struct BackendResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<HltbRecord>,
}

/// HTTP client for the lookup backend (`GET {endpoint}/games/{id}`).
#[derive(Clone)]
pub struct HltbClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HltbClient {
    pub fn new(endpoint: &str, timeout: Duration) -> OverlayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hltb-overlay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for(&self, id: SubjectId) -> String {
        format!("{}/games/{id}", self.endpoint)
    }
}

#[async_trait(?Send)]
impl HltbSource for HltbClient {
    async fn lookup(&self, id: SubjectId) -> OverlayResult<Option<HltbRecord>> {
        let url = self.url_for(id);
        tracing::debug!("GET {url}");

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(OverlayError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        let envelope: BackendResponse = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(OverlayError::Backend(
                envelope
                    .error
                    .unwrap_or_else(|| "unknown backend error".to_string()),
            ));
        }
        Ok(envelope.data)
    }
}
