//! Get and list commands

use serde_json::{json, Value};

use stigmer_core::{normalize_slug, ResourceKind, StigmerError};
use stigmer_server::query_service;

use crate::commands::Session;
use crate::output::{render_table, render_value};

fn parse_kind(kind: &str) -> anyhow::Result<ResourceKind> {
    ResourceKind::parse(kind).ok_or_else(|| {
        StigmerError::invalid(format!(
            "unknown kind {kind}; one of: {}",
            ResourceKind::all()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into()
    })
}

pub async fn execute_get(kind: &str, name: &str, format: &str) -> anyhow::Result<()> {
    let kind = parse_kind(kind)?;
    let session = Session::open().await?;
    let result = fetch(&session, kind, name).await;
    session.close().await?;
    println!("{}", render_value(&result?, format)?);
    Ok(())
}

async fn fetch(session: &Session, kind: ResourceKind, name: &str) -> anyhow::Result<Value> {
    let channel = session.channel();
    let service = query_service(kind);

    // slug first; fall back to raw id for generated names
    let by_slug = channel
        .unary(service, "GetBySlug", json!({ "slug": normalize_slug(name) }))
        .await;
    match by_slug {
        Ok(value) => Ok(value),
        Err(slug_err) => match channel.unary(service, "Get", json!({ "id": name })).await {
            Ok(value) => Ok(value),
            Err(_) => Err(slug_err.into()),
        },
    }
}

pub async fn execute_list(kind: &str, format: &str) -> anyhow::Result<()> {
    let kind = parse_kind(kind)?;
    let session = Session::open().await?;
    let result = session
        .channel()
        .unary(query_service(kind), "List", json!({}))
        .await;
    session.close().await?;

    let value = result?;
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match format {
        "table" => println!("{}", render_table(&items)),
        other => println!("{}", render_value(&Value::Array(items), other)?),
    }
    Ok(())
}
