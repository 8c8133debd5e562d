use clap::{Parser, Subcommand};

use crate::commands;

/// Stigmer CLI - local agentic-workflow control plane
#[derive(Parser, Debug)]
#[command(name = "stigmerctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Persistence root (overrides DATA_DIR)
    #[arg(long, global = true, env = "DATA_DIR")]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synthesize the project and deploy it in dependency order
    Apply {
        /// Project file or directory (manifests plus skill directories)
        #[arg(short, long, default_value = ".")]
        file: String,

        /// Print the plan without deploying
        #[arg(long)]
        dry_run: bool,
    },

    /// Create an execution of a workflow
    Run {
        /// Workflow name or slug
        name: String,

        /// Instance to run (defaults to the workflow's default instance)
        #[arg(long)]
        instance: Option<String>,

        /// Message made available to agent tasks
        #[arg(short, long)]
        message: Option<String>,

        /// Subscribe to progress until a terminal phase
        #[arg(short, long)]
        wait: bool,
    },

    /// Get one resource by name or id
    Get {
        /// Resource kind (workflow, agent, skill, ...)
        kind: String,

        /// Resource name, slug, or id
        name: String,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        output: String,
    },

    /// List resources of a kind
    List {
        /// Resource kind (workflow, agent, skill, ...)
        kind: String,

        /// Output format (table, yaml, json)
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Read daemon logs
    Logs {
        /// Follow the live log
        #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
        follow: bool,

        /// Lines from the end; 0 means all
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },

    /// Scaffold a project
    New {
        /// Directory to create; the current directory (if empty) when omitted
        name: Option<String>,
    },

    /// Run the daemon: control plane, workers, and network listener
    Serve {
        /// Listener port (overrides GRPC_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        if let Some(dir) = &self.data_dir {
            // Config::from_env reads DATA_DIR; the flag wins by setting it.
            std::env::set_var("DATA_DIR", dir);
        }

        match self.command {
            Commands::Apply { file, dry_run } => commands::apply::execute(&file, dry_run).await,
            Commands::Run {
                name,
                instance,
                message,
                wait,
            } => commands::run::execute(&name, instance.as_deref(), message.as_deref(), wait).await,
            Commands::Get { kind, name, output } => {
                commands::get::execute_get(&kind, &name, &output).await
            }
            Commands::List { kind, output } => commands::get::execute_list(&kind, &output).await,
            Commands::Logs { follow, tail } => commands::logs::execute(follow, tail).await,
            Commands::New { name } => commands::new::execute(name.as_deref()),
            Commands::Serve { port } => commands::serve::execute(port).await,
        }
    }
}
