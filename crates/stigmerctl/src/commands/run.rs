//! Run command: create a WorkflowExecution, optionally waiting on progress

use colored::Colorize;
use serde_json::json;

use stigmer_core::{
    normalize_slug, Metadata, Phased, Workflow, WorkflowExecution, WorkflowExecutionSpec,
    WorkflowInstance,
};
use stigmer_server::ResourceClient;

use crate::commands::Session;
use crate::output::phase_line;

pub async fn execute(
    name: &str,
    instance: Option<&str>,
    message: Option<&str>,
    wait: bool,
) -> anyhow::Result<()> {
    let session = Session::open().await?;
    let result = run_inner(&session, name, instance, message, wait).await;
    session.close().await?;
    result
}

async fn run_inner(
    session: &Session,
    name: &str,
    instance: Option<&str>,
    message: Option<&str>,
    wait: bool,
) -> anyhow::Result<()> {
    let channel = session.channel();
    let workflows = ResourceClient::<Workflow>::new(channel.clone());
    let instances = ResourceClient::<WorkflowInstance>::new(channel.clone());
    let executions = ResourceClient::<WorkflowExecution>::new(channel.clone());

    let workflow = workflows
        .get_by_slug(Default::default(), "", &normalize_slug(name))
        .await?;

    let mut spec = WorkflowExecutionSpec {
        workflow_id: workflow.metadata.id.clone(),
        message: message.map(str::to_string),
        ..Default::default()
    };
    if let Some(instance_name) = instance {
        let instance = instances
            .get_by_slug(Default::default(), "", &normalize_slug(instance_name))
            .await?;
        spec.instance_id = instance.metadata.id.clone();
    }

    let request = WorkflowExecution {
        metadata: Metadata::named(format!(
            "{}-run-{}",
            workflow.metadata.slug,
            chrono::Utc::now().timestamp_millis()
        )),
        spec,
        status: Default::default(),
    };
    let created = executions.create(&request).await?;
    println!(
        "{} execution {} ({})",
        "started".green(),
        created.metadata.id,
        phase_line(&created.status.phase.to_string(), "")
    );

    if !wait {
        return Ok(());
    }

    let mut updates = executions.subscribe(&created.metadata.id).await?;
    let mut last = json!(null);
    while let Some(current) = updates.recv().await {
        let line = json!([current.status.phase, current.status.message]);
        if line != last {
            println!(
                "  {}",
                phase_line(&current.status.phase.to_string(), &current.status.message)
            );
            last = line;
        }
        if current.phase().is_terminal() {
            if current.status.phase == stigmer_core::ExecutionPhase::Failed {
                anyhow::bail!(stigmer_core::StigmerError::internal(format!(
                    "execution {} failed: {}",
                    current.metadata.id, current.status.message
                )));
            }
            break;
        }
    }
    Ok(())
}
