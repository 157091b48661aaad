//! # Agent Gateway
//!
//! The external agent service, seen as one request/response call: message
//! history in, a single reply plus an approval signal out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::state::{Message, Role, StageId};

/// One turn of history sent to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request body for the agent service
#[derive(Debug, Clone, Serialize)]
pub struct GatewayRequest {
    pub prompt_model_name: String,
    pub message_history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<StageId>,
    /// Path on the agent service, taken from the stage
    #[serde(skip)]
    pub endpoint: Option<String>,
    /// Name of the stage the reply is for
    #[serde(skip)]
    pub stage_name: String,
}

/// The agent's reply turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTurn {
    #[serde(default = "agent_role")]
    pub role: Role,
    pub content: String,
}

fn agent_role() -> Role {
    Role::Agent
}

/// Response body from the agent service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayReply {
    pub response: AgentTurn,
    /// Explicit approval signal; `None` when the agent did not say
    #[serde(default)]
    pub approval_needed: Option<bool>,
}

impl GatewayReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            response: AgentTurn {
                role: Role::Agent,
                content: content.into(),
            },
            approval_needed: None,
        }
    }

    pub fn with_approval(mut self, approval_needed: bool) -> Self {
        self.approval_needed = Some(approval_needed);
        self
    }
}

/// Anything that can produce an agent reply for a stage
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(&self, request: GatewayRequest) -> Result<GatewayReply>;

    /// Whether requests must name a stage endpoint
    fn requires_endpoint(&self) -> bool {
        true
    }
}

/// Gateway calling the agent service over HTTP
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        join_url(&self.base_url, endpoint)
    }
}

fn join_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[async_trait]
impl AgentGateway for HttpGateway {
    #[tracing::instrument(skip(self, request), fields(stage_id = ?request.stage_id, turns = request.message_history.len()))]
    async fn invoke(&self, request: GatewayRequest) -> Result<GatewayReply> {
        let endpoint = request.endpoint.as_deref().ok_or_else(|| {
            Error::validation(format!(
                "stage '{}' has no pipeline endpoint",
                request.stage_name
            ))
        })?;
        let url = self.url_for(endpoint);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::GatewayTimeout(self.timeout)
                } else {
                    Error::Gateway(format!("POST {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Gateway(format!(
                "POST {} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let reply = response
            .json::<GatewayReply>()
            .await
            .map_err(|e| Error::Gateway(format!("malformed reply from {}: {}", url, e)))?;
        tracing::debug!(approval_needed = ?reply.approval_needed, "Agent replied");
        Ok(reply)
    }
}
