//! The live network as seen by the agent.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::AgentError;
use crate::http::{Request, Response};

/// Issues a request and returns whatever the server answered.
///
/// Any HTTP status counts as a delivered response; only transport failures
/// are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
    // No timeout unless configured; a hanging fetch only blocks its own task
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, AgentError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| AgentError::NetworkUnavailable(format!("invalid method: {}", e)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| AgentError::NetworkUnavailable(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| AgentError::NetworkUnavailable(e.to_string()))?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}
