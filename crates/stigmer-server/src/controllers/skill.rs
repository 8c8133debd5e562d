//! Skill controllers and the artifact push/pull path

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;

use stigmer_core::{
    normalize_slug, OwnerScope, Skill, StigmerError, StigmerResult, LATEST_TAG,
};
use stigmer_store::{short_digest, ArtifactStore, ResourceStore};

use crate::controllers::{CommandExtension, CommandHandler, Pipelines, QueryHandler};
use crate::pipeline::Pipeline;
use crate::steps::{
    BuildNewState, CheckDuplicate, DeleteExisting, LoadExisting, LoadForApply, Persist,
    ResolveSlug, ValidateProto,
};
use crate::transport::{Response, Router};

pub(crate) fn pipelines(store: &ResourceStore) -> Pipelines<Skill> {
    Pipelines {
        create: Pipeline::named("skill.create")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(CheckDuplicate::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        update: Pipeline::named("skill.update")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(BuildNewState))
            .step(Arc::new(Persist::new(store.clone()))),
        delete: Pipeline::named("skill.delete")
            .step(Arc::new(LoadExisting::new(store.clone())))
            .step(Arc::new(DeleteExisting::new(store.clone()))),
        apply: Pipeline::named("skill.apply")
            .step(Arc::new(ValidateProto))
            .step(Arc::new(ResolveSlug))
            .step(Arc::new(LoadForApply::new(store.clone()))),
    }
}

/// Push/Pull artifact methods on the Skill command service
struct ArtifactExtension {
    store: ResourceStore,
    artifacts: ArtifactStore,
}

impl ArtifactExtension {
    /// Push: digest the bytes, store them once, resolve (or create) the
    /// Skill, then move the tag. Last writer wins on tags; the artifact
    /// itself is immutable under its digest.
    fn push(&self, body: Value) -> StigmerResult<Value> {
        let name = required_str(&body, "name")?;
        let scope: OwnerScope = body
            .get("scope")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StigmerError::invalid(format!("bad scope: {e}")))?
            .unwrap_or_default();
        let org = body.get("org").and_then(Value::as_str).unwrap_or_default();
        let tag = body
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or(LATEST_TAG)
            .to_string();

        let encoded = required_str(&body, "artifact")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StigmerError::invalid(format!("artifact payload: {e}")))?;

        let (digest, reused) = self.artifacts.put(&bytes)?;
        tracing::info!(skill = name, %digest, reused, "artifact pushed");

        let mut skill = match self.store.find_by_slug::<Skill>(scope, org, &normalize_slug(name))? {
            Some(existing) => existing,
            None => {
                let mut created = Skill::named(name);
                created.metadata.owner_scope = scope;
                created.metadata.org = org.to_string();
                created.metadata.slug = normalize_slug(name);
                created.metadata.id = stigmer_core::generate_id(
                    stigmer_core::ResourceKind::Skill.id_prefix(),
                );
                let now = chrono::Utc::now();
                created.metadata.created_at = Some(now);
                created.metadata.updated_at = Some(now);
                created
            }
        };

        // Every new digest also gets a stable content tag, so older versions
        // stay addressable after `latest` moves on.
        if !skill.spec.tags.values().any(|d| d == &digest) {
            let version = skill
                .spec
                .tags
                .iter()
                .filter(|(t, _)| *t != LATEST_TAG)
                .count()
                + 1;
            let content_tag = format!("v{version}-{}", short_digest(&digest));
            skill.set_tag(content_tag, digest.clone());
        }
        skill.set_tag(&tag, digest.clone());
        skill.metadata.updated_at = Some(chrono::Utc::now());
        self.store.save(&skill)?;

        Ok(json!({ "digest": digest, "tag": tag }))
    }

    fn pull(&self, body: Value) -> StigmerResult<Value> {
        let name = required_str(&body, "name")?;
        let scope: OwnerScope = body
            .get("scope")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StigmerError::invalid(format!("bad scope: {e}")))?
            .unwrap_or_default();
        let org = body.get("org").and_then(Value::as_str).unwrap_or_default();
        let tag = body.get("tag").and_then(Value::as_str);

        let skill = self
            .store
            .find_by_slug::<Skill>(scope, org, &normalize_slug(name))?
            .ok_or_else(|| StigmerError::not_found("skill", name))?;

        let digest = skill
            .resolve_tag(tag)
            .ok_or_else(|| {
                StigmerError::not_found(
                    "skill tag",
                    format!("{}@{}", name, tag.unwrap_or(LATEST_TAG)),
                )
            })?
            .to_string();

        let bytes = self.artifacts.get(&digest)?;
        Ok(json!({
            "digest": digest,
            "artifact": base64::engine::general_purpose::STANDARD.encode(bytes),
        }))
    }
}

#[async_trait]
impl CommandExtension<Skill> for ArtifactExtension {
    async fn handle(&self, method: &str, body: Value) -> StigmerResult<Option<Response>> {
        match method {
            "Push" => Ok(Some(Response::Unary(self.push(body)?))),
            "Pull" => Ok(Some(Response::Unary(self.pull(body)?))),
            _ => Ok(None),
        }
    }
}

fn required_str<'a>(body: &'a Value, field: &str) -> StigmerResult<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StigmerError::invalid(format!("missing {field}")))
}

/// Version-tag resolution for GetByReference: `latest` resolves at call time
fn resolve_reference(skill: &Skill, version_tag: Option<&str>) -> StigmerResult<String> {
    skill
        .resolve_tag(version_tag)
        .map(str::to_string)
        .ok_or_else(|| {
            StigmerError::not_found(
                "skill tag",
                format!(
                    "{}@{}",
                    skill.metadata.slug,
                    version_tag.unwrap_or(LATEST_TAG)
                ),
            )
        })
}

pub fn register(
    router: &Router,
    store: &ResourceStore,
    artifacts: &ArtifactStore,
) -> StigmerResult<()> {
    router.register(Arc::new(
        CommandHandler::new(store.clone(), pipelines(store)).with_extension(ArtifactExtension {
            store: store.clone(),
            artifacts: artifacts.clone(),
        }),
    ))?;
    router.register(Arc::new(
        QueryHandler::<Skill>::new(store.clone()).with_reference_resolver(resolve_reference),
    ))?;
    Ok(())
}
