//! YAML manifest loading
//!
//! Declarative project files carry the usual apiVersion/kind/metadata/spec
//! envelope. Agents and Workflows load into their typed resources; Skill
//! directories are discovered by their `SKILL.md`, not by manifest.

use serde::Deserialize;
use std::path::Path;

use stigmer_core::{Agent, Metadata, StigmerError, StigmerResult, Workflow};
use stigmer_sdk::ResourceContext;
use stigmer_store::is_skill_dir;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "apiVersion", default)]
    _api_version: Option<String>,
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    spec: serde_json::Value,
}

fn load_manifest_file(path: &Path, ctx: &ResourceContext) -> StigmerResult<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StigmerError::invalid(format!("{}: {e}", path.display())))?;

    for document in serde_yaml::Deserializer::from_str(&content) {
        let manifest: Manifest = serde::Deserialize::deserialize(document)
            .map_err(|e| StigmerError::invalid(format!("{}: {e}", path.display())))?;

        match manifest.kind.as_str() {
            "Agent" => {
                let agent = Agent {
                    metadata: manifest.metadata,
                    spec: serde_json::from_value(manifest.spec).map_err(|e| {
                        StigmerError::invalid(format!("{}: agent spec: {e}", path.display()))
                    })?,
                    status: Default::default(),
                };
                ctx.register_agent(agent)?;
            }
            "Workflow" => {
                let workflow = Workflow {
                    metadata: manifest.metadata,
                    spec: serde_json::from_value(manifest.spec).map_err(|e| {
                        StigmerError::invalid(format!("{}: workflow spec: {e}", path.display()))
                    })?,
                    status: Default::default(),
                };
                ctx.register_workflow(workflow)?;
            }
            other => {
                return Err(StigmerError::invalid(format!(
                    "{}: unsupported kind {other}",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

fn scan_dir(dir: &Path, ctx: &ResourceContext, depth: usize) -> StigmerResult<()> {
    if depth > 3 {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StigmerError::invalid(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| StigmerError::internal(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            if is_skill_dir(&path) {
                ctx.register_skill_dir(&path)?;
            } else {
                scan_dir(&path, ctx, depth + 1)?;
            }
        } else if is_manifest(&path) {
            load_manifest_file(&path, ctx)?;
        }
    }
    Ok(())
}

/// Load a project file or directory into a fresh resource context
pub fn load_project(path: &Path) -> StigmerResult<ResourceContext> {
    let ctx = ResourceContext::new();
    if path.is_dir() {
        scan_dir(path, &ctx, 0)?;
    } else if is_manifest(path) {
        load_manifest_file(path, &ctx)?;
    } else {
        return Err(StigmerError::invalid(format!(
            "{} is neither a manifest nor a directory",
            path.display()
        )));
    }
    if ctx.is_empty() {
        return Err(StigmerError::invalid(format!(
            "{} contains no resources",
            path.display()
        )));
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_manifests_and_skill_dirs_from_a_project() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("skills/code-analysis")).unwrap();
        std::fs::write(root.join("skills/code-analysis/SKILL.md"), "# analysis").unwrap();

        std::fs::write(
            root.join("agent.yaml"),
            r#"
apiVersion: stigmer.dev/v1
kind: Agent
metadata:
  name: code-reviewer
spec:
  instructions: Review the diff carefully.
  skill_refs:
    - kind: Skill
      name: code-analysis
"#,
        )
        .unwrap();

        std::fs::write(
            root.join("workflow.yaml"),
            r#"
apiVersion: stigmer.dev/v1
kind: Workflow
metadata:
  name: review-pipeline
spec:
  document:
    namespace: default
    name: review-pipeline
  tasks:
    - name: review
      kind: AGENT_CALL
      config:
        agent:
          kind: Agent
          name: code-reviewer
        message: review it
"#,
        )
        .unwrap();

        let ctx = load_project(root).unwrap();
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "kind: Gadget\nmetadata:\n  name: x\n").unwrap();
        assert!(load_project(&path).is_err());
    }
}
