//! HTTP liveness probe.

use anyhow::Context;
use async_trait::async_trait;

use crate::core::endpoint::Endpoint;
use crate::core::health::HealthProbe;

/// Issues `GET {url}{path}` and treats any 2xx as alive.
///
/// Inference servers usually answer on `/api/version`, transcription
/// servers on `/health`. The checker applies the timeout.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    /// Probe hitting `path` on every endpoint.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            path: path.into(),
        }
    }

    /// Probe using an existing client.
    pub fn with_client(client: reqwest::Client, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    /// Full probe URL for `endpoint`.
    #[must_use]
    pub fn probe_url(&self, endpoint: &Endpoint) -> String {
        let base = endpoint.url.trim_end_matches('/');
        if self.path.is_empty() || self.path == "/" {
            return format!("{base}/");
        }
        if self.path.starts_with('/') {
            format!("{base}{}", self.path)
        } else {
            format!("{base}/{}", self.path)
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint) -> anyhow::Result<()> {
        let url = self.probe_url(endpoint);
        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        Ok(())
    }
}
