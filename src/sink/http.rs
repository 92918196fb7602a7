//! HTTP indexing endpoint.
//!
//! Outcome mapping:
//! - 2xx → accepted
//! - 408, 429, 5xx → transient
//! - other 4xx (and anything else) → permanent
//! - network errors → transient

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{records, Sink, SinkOutcome};
use crate::models::Batch;

pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSink {
    /// `token_env` names an environment variable holding a bearer token.
    pub fn new(endpoint: &str, token_env: Option<&str>) -> Result<Self> {
        let token = match token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| anyhow!("{} not set", var))?),
            None => None,
        };
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token,
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn insert(&self, batch: &Batch) -> SinkOutcome {
        let body = serde_json::json!({ "records": records(batch) });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    return SinkOutcome::Accepted;
                }
                let body_text = response.text().await.unwrap_or_default();
                classify_status(status, &body_text)
            }
            Err(e) => SinkOutcome::TransientFailure(e.to_string()),
        }
    }
}

/// Map an HTTP status to a [`SinkOutcome`].
pub fn classify_status(status: u16, body: &str) -> SinkOutcome {
    match status {
        200..=299 => SinkOutcome::Accepted,
        408 | 429 | 500..=599 => {
            SinkOutcome::TransientFailure(format!("sink returned {}: {}", status, body.trim()))
        }
        _ => SinkOutcome::PermanentFailure(format!("sink returned {}: {}", status, body.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200, ""), SinkOutcome::Accepted);
        assert_eq!(classify_status(204, ""), SinkOutcome::Accepted);
        assert!(matches!(classify_status(408, ""), SinkOutcome::TransientFailure(_)));
        assert!(matches!(classify_status(429, ""), SinkOutcome::TransientFailure(_)));
        assert!(matches!(classify_status(503, ""), SinkOutcome::TransientFailure(_)));
        assert!(matches!(classify_status(400, "bad"), SinkOutcome::PermanentFailure(_)));
        assert!(matches!(classify_status(422, ""), SinkOutcome::PermanentFailure(_)));
    }

    #[test]
    fn missing_token_env_is_an_error() {
        assert!(HttpSink::new("http://localhost:1", Some("REPO_INGEST_TEST_UNSET_TOKEN")).is_err());
        assert!(HttpSink::new("http://localhost:1", None).is_ok());
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 9 (discard) is closed on test hosts.
        let sink = HttpSink::new("http://127.0.0.1:9/ingest", None).unwrap();
        let batch = Batch {
            sequence: 0,
            chunks: vec![],
        };
        assert!(matches!(
            sink.insert(&batch).await,
            SinkOutcome::TransientFailure(_)
        ));
    }
}
