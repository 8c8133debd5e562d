//! Agent runner
//!
//! Consumes newly-created AgentExecutions, runs the model call, streams
//! progressive status updates back through the control plane, and, when
//! the execution carries a callback token, completes the parked engine
//! activity so the owning workflow resumes. The status path and the token
//! path are independent: one is observability, the other resumption.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stigmer_core::{Agent, AgentExecution, ExecutionPhase, Skill, StigmerResult};
use stigmer_server::{Channel, EngineCell, ResourceClient, SkillArtifactClient, SubscribeHub};

use crate::llm::{CompletionRequest, ModelProvider};

pub struct AgentRunner {
    channel: Channel,
    engine: EngineCell,
    provider: Arc<dyn ModelProvider>,
}

impl AgentRunner {
    pub fn new(channel: Channel, engine: EngineCell, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            channel,
            engine,
            provider,
        }
    }

    /// Start the consume loop. A startup sweep picks up PENDING executions
    /// left over from a previous process life, then the created-event feed
    /// takes over.
    pub fn spawn(self, hub: SubscribeHub) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut feed = hub.agent_created();

            let executions = ResourceClient::<AgentExecution>::new(self.channel.clone());
            match executions.list().await {
                Ok(pending) => {
                    for execution in pending
                        .into_iter()
                        .filter(|e| e.status.phase == ExecutionPhase::Pending)
                    {
                        self.handle(&execution.metadata.id).await;
                    }
                }
                Err(e) => warn!(error = %e, "pending sweep failed"),
            }

            loop {
                match feed.recv().await {
                    Ok(id) => self.handle(&id).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "agent feed lagged; sweeping for pending work");
                        if let Ok(pending) = executions.list().await {
                            for execution in pending
                                .into_iter()
                                .filter(|e| e.status.phase == ExecutionPhase::Pending)
                            {
                                self.handle(&execution.metadata.id).await;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    async fn handle(&self, execution_id: &str) {
        let executions = ResourceClient::<AgentExecution>::new(self.channel.clone());
        let execution = match executions.get(execution_id).await {
            Ok(execution) => execution,
            Err(e) => {
                warn!(execution = execution_id, error = %e, "agent execution fetch failed");
                return;
            }
        };
        if execution.status.phase != ExecutionPhase::Pending {
            debug!(execution = execution_id, phase = %execution.status.phase, "skipping non-pending execution");
            return;
        }

        let outcome = self.run(&execution).await;
        let (phase, message) = match &outcome {
            Ok(reply) => (ExecutionPhase::Completed, reply.clone()),
            Err(e) => (ExecutionPhase::Failed, e.to_string()),
        };

        if let Err(e) = executions
            .update_status(execution_id, phase, Some(&message), None)
            .await
        {
            warn!(execution = execution_id, error = %e, "terminal status write failed");
        }

        // The token handshake: complete the parked workflow activity. A
        // direct execution has no token and skips this.
        if let Some(token) = &execution.spec.callback_token {
            let Some(engine) = self.engine.get() else {
                warn!(execution = execution_id, "engine not connected; completion token unresolved");
                return;
            };
            let result = match outcome {
                Ok(reply) => Ok(json!({ "message": reply })),
                Err(e) => Err(e.to_string()),
            };
            match engine.complete_activity(token, result).await {
                Ok(()) => info!(execution = execution_id, "callback token completed"),
                Err(e) => warn!(execution = execution_id, error = %e, "token completion failed"),
            }
        }
    }

    async fn run(&self, execution: &AgentExecution) -> StigmerResult<String> {
        let executions = ResourceClient::<AgentExecution>::new(self.channel.clone());
        let agents = ResourceClient::<Agent>::new(self.channel.clone());
        let skills = ResourceClient::<Skill>::new(self.channel.clone());
        let artifacts = SkillArtifactClient::new(self.channel.clone());
        let id = &execution.metadata.id;

        executions
            .update_status(id, ExecutionPhase::InProgress, Some("resolving agent"), None)
            .await?;

        let agent = agents.get(&execution.spec.agent_id).await?;

        // Resolve skills through their version tags; `latest` floats.
        let mut skill_bodies = Vec::new();
        for reference in &agent.spec.skill_refs {
            let (skill, digest) = skills.get_by_reference(reference).await?;
            debug!(skill = %skill.metadata.slug, digest = ?digest, "skill resolved");
            if let Ok((_, bytes)) = artifacts
                .pull(&skill.metadata.name, reference.version_tag.as_deref())
                .await
            {
                skill_bodies.push(format!(
                    "[skill {}: {} bytes]",
                    skill.metadata.slug,
                    bytes.len()
                ));
            }
        }

        executions
            .update_status(id, ExecutionPhase::InProgress, Some("calling model"), None)
            .await?;

        let request = CompletionRequest {
            model: execution.spec.execution_config.model.clone(),
            instructions: agent.spec.instructions.clone(),
            message: execution.spec.message.clone(),
            temperature: execution.spec.execution_config.temperature,
            skills: skill_bodies,
        };

        let budget = execution
            .spec
            .execution_config
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        match tokio::time::timeout(budget, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(stigmer_core::StigmerError::DeadlineExceeded(format!(
                "agent call exceeded {budget:?}"
            ))),
        }
    }
}
