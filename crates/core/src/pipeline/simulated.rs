//! Canned in-process agent, for running without the agent service.

use async_trait::async_trait;

use super::gateway::{AgentGateway, GatewayReply, GatewayRequest};
use super::stages::StageKind;
use crate::error::Result;
use crate::state::Role;

/// Stage-specific scripted replies
///
/// The requirements agent asks for details until the user confirms
/// ("yes", "that's correct"), then requests approval. Every reply carries
/// an explicit approval flag.
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway;

impl SimulatedGateway {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(stage_name: &str, last_user_message: &str) -> GatewayReply {
        let lower = last_user_message.to_lowercase();
        let confirmed = lower.contains("yes") || lower.contains("that's correct");

        let (content, approval_needed) = match StageKind::from_name(stage_name) {
            Some(StageKind::RequirementsGathering) if confirmed => (
                "Great! I think I have gathered all the necessary requirements. \
                 Please review them and approve if everything looks correct.",
                true,
            ),
            Some(StageKind::RequirementsGathering) => (
                "Could you please provide more details about the specific functionality \
                 you need? This will help me better understand the requirements.",
                false,
            ),
            Some(StageKind::TechnicalSpecification) => (
                "Based on the requirements, I suggest using the following technical approach. \
                 Let me know if you'd like me to adjust any part of this specification.",
                false,
            ),
            Some(StageKind::Implementation) => (
                "I'm working on implementing the changes according to the technical \
                 specification. Would you like me to explain any part of the implementation?",
                false,
            ),
            Some(StageKind::CodeReview) => (
                "I've reviewed the code changes. Everything looks good, but please let me know \
                 if you'd like me to focus on any specific aspects.",
                false,
            ),
            None => ("How can I help you with this stage?", false),
        };

        GatewayReply::text(content).with_approval(approval_needed)
    }
}

#[async_trait]
impl AgentGateway for SimulatedGateway {
    async fn invoke(&self, request: GatewayRequest) -> Result<GatewayReply> {
        let last_user_message = request
            .message_history
            .iter()
            .rev()
            .find(|entry| entry.role == Role::User)
            .map(|entry| entry.content.as_str())
            .unwrap_or_default();

        Ok(Self::reply_for(&request.stage_name, last_user_message))
    }

    fn requires_endpoint(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gateway::HistoryEntry;

    fn request(stage_name: &str, turns: &[(Role, &str)]) -> GatewayRequest {
        GatewayRequest {
            prompt_model_name: "gpt-4".to_string(),
            message_history: turns
                .iter()
                .map(|(role, content)| HistoryEntry {
                    role: *role,
                    content: content.to_string(),
                })
                .collect(),
            stage_id: Some(1),
            endpoint: None,
            stage_name: stage_name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_requirements_ask_for_details_then_approval() {
        let gateway = SimulatedGateway::new();

        let reply = gateway
            .invoke(request(
                "Requirements Gathering",
                &[(Role::User, "I need an expense tracker")],
            ))
            .await
            .unwrap();
        assert_eq!(reply.approval_needed, Some(false));
        assert!(reply.response.content.contains("more details"));

        let reply = gateway
            .invoke(request(
                "Requirements Gathering",
                &[
                    (Role::User, "I need an expense tracker"),
                    (Role::Agent, "Could you please provide more details?"),
                    (Role::User, "Yes, that's correct"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(reply.approval_needed, Some(true));
    }

    #[tokio::test]
    async fn test_other_stages_never_request_approval() {
        let gateway = SimulatedGateway::new();
        for stage in ["Technical Specification", "Implementation", "Code Review", "Deployment"] {
            let reply = gateway
                .invoke(request(stage, &[(Role::User, "yes")]))
                .await
                .unwrap();
            assert_eq!(reply.approval_needed, Some(false), "{stage}");
            assert!(!reply.response.content.is_empty());
        }
        assert!(!gateway.requires_endpoint());
    }
}
