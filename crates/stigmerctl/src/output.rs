//! Output rendering
//!
//! Resources render as YAML or JSON; listings render as a table with the
//! phase column colored by state.

use colored::Colorize;
use comfy_table::{presets::NOTHING, Cell, Table};
use serde_json::Value;

use stigmer_core::{StigmerError, StigmerResult};

pub fn render_value(value: &Value, format: &str) -> StigmerResult<String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map_err(|e| StigmerError::internal(e.to_string())),
        "yaml" => serde_yaml::to_string(value).map_err(|e| StigmerError::internal(e.to_string())),
        other => Err(StigmerError::invalid(format!("unknown output format {other}"))),
    }
}

fn phase_cell(phase: &str) -> String {
    match phase {
        "COMPLETED" => phase.green().to_string(),
        "FAILED" => phase.red().to_string(),
        "CANCELLED" => phase.yellow().to_string(),
        "IN_PROGRESS" => phase.cyan().to_string(),
        _ => phase.to_string(),
    }
}

/// Table listing over serialized resources
pub fn render_table(items: &[Value]) -> String {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        Cell::new("NAME"),
        Cell::new("SLUG"),
        Cell::new("ID"),
        Cell::new("PHASE"),
        Cell::new("UPDATED"),
    ]);

    for item in items {
        let meta = item.get("metadata").cloned().unwrap_or(Value::Null);
        let phase = item
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("-");
        table.add_row(vec![
            meta.get("name").and_then(Value::as_str).unwrap_or("-").to_string(),
            meta.get("slug").and_then(Value::as_str).unwrap_or("-").to_string(),
            meta.get("id").and_then(Value::as_str).unwrap_or("-").to_string(),
            phase_cell(phase),
            meta.get("updated_at")
                .and_then(Value::as_str)
                .unwrap_or("-")
                .to_string(),
        ]);
    }
    table.to_string()
}

pub fn phase_line(phase: &str, message: &str) -> String {
    if message.is_empty() {
        phase_cell(phase)
    } else {
        format!("{} {}", phase_cell(phase), message.dimmed())
    }
}
