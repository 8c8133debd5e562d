//! Apply command: synthesize and deploy in dependency order

use colored::Colorize;
use std::path::Path;

use crate::commands::Session;
use crate::manifest::load_project;

pub async fn execute(file: &str, dry_run: bool) -> anyhow::Result<()> {
    let ctx = load_project(Path::new(file))?;

    if dry_run {
        let plan = stigmer_sdk::plan(&ctx)?;
        println!("{}", "plan (dry run):".bold());
        for step in &plan.steps {
            let deps = if step.depends_on.is_empty() {
                String::new()
            } else {
                format!(
                    "  (after {})",
                    step.depends_on
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            println!("  {} {}{}", step.action, step.id, deps.dimmed());
        }
        return Ok(());
    }

    let session = Session::open().await?;
    let result = stigmer_sdk::deploy(&ctx, &session.channel(), false).await;
    session.close().await?;
    let results = result?;

    for deployed in &results {
        println!(
            "{} {} {} {}",
            "applied".green(),
            deployed.id,
            "→".dimmed(),
            deployed.outcome
        );
    }
    println!("{} {} resources deployed", "ok:".green().bold(), results.len());
    Ok(())
}
