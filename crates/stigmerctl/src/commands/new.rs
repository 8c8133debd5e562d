//! New command: scaffold a project
//!
//! Without a name the current directory is used when empty; with a name a
//! fresh directory is created. A non-empty target without an explicit
//! name is an error.

use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use stigmer_core::StigmerError;

const AGENT_MANIFEST: &str = r#"apiVersion: stigmer.dev/v1
kind: Agent
metadata:
  name: code-reviewer
spec:
  description: Reviews changes for correctness and style.
  instructions: |
    You are a careful code reviewer. Read the change, list concrete
    problems first, then suggestions.
  skill_refs:
    - kind: Skill
      name: code-analysis
"#;

const WORKFLOW_MANIFEST: &str = r#"apiVersion: stigmer.dev/v1
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
        message: "Review the latest change."
"#;

const SKILL_BODY: &str = r#"# Code Analysis

How to analyze a change:

1. Read the diff end to end before commenting.
2. Check error paths first; happy paths rarely break.
3. Name the file and line for every finding.
"#;

pub fn execute(name: Option<&str>) -> anyhow::Result<()> {
    let target: PathBuf = match name {
        Some(name) => {
            let dir = PathBuf::from(name);
            if dir.exists() && dir.read_dir().map(|mut d| d.next().is_some()).unwrap_or(true) {
                return Err(StigmerError::invalid(format!(
                    "directory {name} already exists and is not empty"
                ))
                .into());
            }
            fs::create_dir_all(&dir)?;
            dir
        }
        None => {
            let cwd = std::env::current_dir()?;
            let occupied = cwd.read_dir()?.next().is_some();
            if occupied {
                return Err(StigmerError::invalid(
                    "current directory is not empty; pass a project name",
                )
                .into());
            }
            cwd
        }
    };

    scaffold(&target)?;
    println!(
        "{} project scaffolded at {}",
        "ok:".green().bold(),
        target.display()
    );
    println!("  next: stigmerctl apply -f {}", target.display());
    Ok(())
}

fn scaffold(root: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("skills/code-analysis"))?;
    fs::write(root.join("skills/code-analysis/SKILL.md"), SKILL_BODY)?;
    fs::write(root.join("agent.yaml"), AGENT_MANIFEST)?;
    fs::write(root.join("workflow.yaml"), WORKFLOW_MANIFEST)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffolds_into_a_named_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("demo");
        execute(Some(target.to_str().unwrap())).unwrap();
        assert!(target.join("agent.yaml").is_file());
        assert!(target.join("skills/code-analysis/SKILL.md").is_file());
    }

    #[test]
    fn refuses_existing_non_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("busy");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep.txt"), "data").unwrap();
        assert!(execute(Some(target.to_str().unwrap())).is_err());
    }
}
