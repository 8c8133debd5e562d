// Stigmer Core - Typed expression references
//
// Expression strings are a serialization detail, not an authoring surface.
// Authors hold typed values (TaskRef, ExprRef, Condition); the canonical
// wire string `${ $context["<task>"].<path> }` is produced in exactly one
// place (`ExprRef::to_expr`) and tests compare on semantics, not syntax.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Handle to a prior task's result in the context map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    task: String,
}

impl TaskRef {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// The whole task result
    pub fn value(&self) -> ExprRef {
        ExprRef {
            task: self.task.clone(),
            path: Vec::new(),
        }
    }

    /// A field of the task result; chain `.field()` for deeper paths
    pub fn field(&self, name: impl Into<String>) -> ExprRef {
        ExprRef {
            task: self.task.clone(),
            path: vec![name.into()],
        }
    }
}

/// Typed reference to a value inside the execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprRef {
    task: String,
    path: Vec<String>,
}

impl ExprRef {
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.path.push(name.into());
        self
    }

    /// Render the canonical wire string. The only place it is constructed.
    pub fn to_expr(&self) -> String {
        let mut path = String::new();
        for seg in &self.path {
            path.push('.');
            path.push_str(seg);
        }
        format!("${{ $context[\"{}\"]{} }}", self.task, path)
    }

    pub fn equals(&self, rhs: impl Into<serde_json::Value>) -> Condition {
        self.binary("==", rhs)
    }

    pub fn not_equals(&self, rhs: impl Into<serde_json::Value>) -> Condition {
        self.binary("!=", rhs)
    }

    pub fn greater_than(&self, rhs: impl Into<serde_json::Value>) -> Condition {
        self.binary(">", rhs)
    }

    pub fn less_than(&self, rhs: impl Into<serde_json::Value>) -> Condition {
        self.binary("<", rhs)
    }

    /// True when the referenced string or array contains `needle`
    pub fn contains(&self, needle: impl Into<serde_json::Value>) -> Condition {
        Condition {
            expr: format!(
                "${{ contains($context[\"{}\"]{}, {}) }}",
                self.task,
                self.path_suffix(),
                render_literal(&needle.into())
            ),
        }
    }

    /// True when the referenced value is one of `options`
    pub fn in_list(&self, options: impl IntoIterator<Item = serde_json::Value>) -> Condition {
        let rendered: Vec<String> = options.into_iter().map(|v| render_literal(&v)).collect();
        Condition {
            expr: format!(
                "${{ $context[\"{}\"]{} in [{}] }}",
                self.task,
                self.path_suffix(),
                rendered.join(", ")
            ),
        }
    }

    fn binary(&self, op: &str, rhs: impl Into<serde_json::Value>) -> Condition {
        Condition {
            expr: format!(
                "${{ $context[\"{}\"]{} {} {} }}",
                self.task,
                self.path_suffix(),
                op,
                render_literal(&rhs.into())
            ),
        }
    }

    fn path_suffix(&self) -> String {
        let mut path = String::new();
        for seg in &self.path {
            path.push('.');
            path.push_str(seg);
        }
        path
    }
}

// Typed refs flatten to their expression strings before reaching any
// generic encoder; serializing one yields the wire string directly.
impl Serialize for ExprRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_expr())
    }
}

impl From<ExprRef> for serde_json::Value {
    fn from(r: ExprRef) -> Self {
        serde_json::Value::String(r.to_expr())
    }
}

impl fmt::Display for ExprRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

/// A boolean expression over context values, used by SWITCH cases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    expr: String,
}

impl Condition {
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        c.expr
    }
}

fn render_literal(value: &serde_json::Value) -> String {
    // JSON literal syntax doubles as the expression literal syntax
    value.to_string()
}

/// Recursively flatten any embedded expression strings inside a value tree.
/// Typed refs already serialize to strings, so this normalization only has
/// to widen nested maps and arrays; it is the wire adapter's property, not
/// the authoring API's.
pub fn normalize_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(normalize_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, normalize_value(v))).collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_access_renders_canonical_string() {
        let fetch = TaskRef::new("fetch");
        assert_eq!(
            fetch.field("status").field("code").to_expr(),
            "${ $context[\"fetch\"].status.code }"
        );
        assert_eq!(fetch.value().to_expr(), "${ $context[\"fetch\"] }");
    }

    #[test]
    fn conditions_carry_json_literals() {
        let fetch = TaskRef::new("fetch");
        assert_eq!(
            fetch.field("code").equals(200).as_str(),
            "${ $context[\"fetch\"].code == 200 }"
        );
        assert_eq!(
            fetch.field("body").contains("error").as_str(),
            "${ contains($context[\"fetch\"].body, \"error\") }"
        );
        assert_eq!(
            fetch.field("env").in_list([serde_json::json!("dev"), serde_json::json!("prod")]).as_str(),
            "${ $context[\"fetch\"].env in [\"dev\", \"prod\"] }"
        );
    }

    #[test]
    fn refs_flatten_when_serialized() {
        let body = serde_json::json!({
            "url": TaskRef::new("init").field("target"),
            "nested": [{"id": TaskRef::new("init").field("id")}],
        });
        let flat = normalize_value(body);
        assert_eq!(flat["url"], "${ $context[\"init\"].target }");
        assert_eq!(flat["nested"][0]["id"], "${ $context[\"init\"].id }");
    }
}
