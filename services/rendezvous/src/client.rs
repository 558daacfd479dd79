//! HTTP confirmation target used by devices talking to a remote service

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use crate::assertion::DeviceAssertion;
use crate::confirmer::ConfirmationTarget;
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::SessionId;
use crate::routes::PendingSession;

#[derive(Serialize)]
struct DecisionBody<'a> {
    assertion: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Posts decisions to `/auth/sessions/{id}/confirm|deny`
#[derive(Clone)]
pub struct HttpConfirmationTarget {
    client: Client,
    base_url: String,
}

impl HttpConfirmationTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, id: &SessionId, verb: &str) -> String {
        format!("{}/auth/sessions/{}/{}", self.base_url, id, verb)
    }

    /// Sessions of the device's account that await a decision
    pub async fn pending_sessions(
        &self,
        assertion: &DeviceAssertion,
    ) -> RendezvousResult<Vec<PendingSession>> {
        let url = format!("{}/devices/sessions/pending", self.base_url);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(assertion.as_str())
            .send()
            .await
            .map_err(|e| {
                error!("Request to {} failed: {}", url, e);
                RendezvousError::StoreUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RendezvousError::from_status(status));
        }
        response.json().await.map_err(|e| {
            error!("Unreadable pending sessions from {}: {}", url, e);
            RendezvousError::Internal(e.to_string())
        })
    }

    async fn post(&self, url: String, body: DecisionBody<'_>) -> RendezvousResult<()> {
        debug!("POST {}", url);
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            error!("Request to {} failed: {}", url, e);
            RendezvousError::StoreUnavailable(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RendezvousError::from_status(status))
        }
    }
}

#[async_trait]
impl ConfirmationTarget for HttpConfirmationTarget {
    async fn confirm(&self, id: &SessionId, assertion: &DeviceAssertion) -> RendezvousResult<()> {
        let body = DecisionBody {
            assertion: assertion.as_str(),
            reason: None,
        };
        self.post(self.url(id, "confirm"), body).await
    }

    async fn deny(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
        reason: Option<String>,
    ) -> RendezvousResult<()> {
        let body = DecisionBody {
            assertion: assertion.as_str(),
            reason,
        };
        self.post(self.url(id, "deny"), body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_strips_trailing_slash() {
        let target = HttpConfirmationTarget::new("http://localhost:3000/");
        let id = SessionId::generate();
        assert_eq!(
            target.url(&id, "confirm"),
            format!("http://localhost:3000/auth/sessions/{}/confirm", id)
        );
    }
}
