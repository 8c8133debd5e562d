//! Expression evaluation against the execution context
//!
//! The wire form is `${ $context["<task>"].<path> }`; conditions add the
//! comparison operators, `contains(...)` and `in [...]`. The authoring SDK
//! produces these strings from typed values; this module is the only
//! consumer.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn expr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\s*(.*?)\s*\}").unwrap())
}

fn ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\$context\["([^"]+)"\]((?:\.[A-Za-z0-9_]+)*)$"#).unwrap()
    })
}

/// Resolve a `$context["task"].path` reference to its value
fn resolve_ref(inner: &str, context: &Value) -> Option<Value> {
    let caps = ref_re().captures(inner)?;
    let task = caps.get(1)?.as_str();
    let mut current = context.get(task)?;
    let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Evaluate the inside of a `${ ... }` expression to a value
fn eval_inner(inner: &str, context: &Value) -> Option<Value> {
    if let Some(value) = resolve_ref(inner, context) {
        return Some(value);
    }
    // not a bare reference: a condition or a literal
    if let Some(result) = eval_condition_inner(inner, context) {
        return Some(Value::Bool(result));
    }
    serde_json::from_str(inner).ok()
}

/// Render one string: a whole-string expression yields the referenced
/// value with its type intact; embedded expressions interpolate as text.
pub fn render_str(input: &str, context: &Value) -> Value {
    let trimmed = input.trim();
    if let Some(caps) = expr_re().captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            if let Some(inner) = caps.get(1) {
                if let Some(value) = eval_inner(inner.as_str(), context) {
                    return value;
                }
            }
            return Value::Null;
        }
    }

    let rendered = expr_re().replace_all(input, |caps: &regex::Captures<'_>| {
        match eval_inner(&caps[1], context) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        }
    });
    Value::String(rendered.into_owned())
}

/// Recursively render expression refs inside a value tree
pub fn render_value(input: &Value, context: &Value) -> Value {
    match input {
        Value::String(s) => render_str(s, context),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_value(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluate a condition expression to a boolean; malformed or unresolvable
/// conditions are false.
pub fn eval_condition(expr: &str, context: &Value) -> bool {
    let trimmed = expr.trim();
    let inner = match expr_re().captures(trimmed) {
        Some(caps) if caps.get(0).map(|m| m.as_str()) == Some(trimmed) => {
            caps.get(1).map(|m| m.as_str().to_string())
        }
        _ => None,
    };
    let inner = inner.unwrap_or_else(|| trimmed.to_string());

    match eval_condition_inner(&inner, context) {
        Some(result) => result,
        None => matches!(eval_inner(&inner, context), Some(Value::Bool(true))),
    }
}

fn eval_condition_inner(inner: &str, context: &Value) -> Option<bool> {
    // contains($context[...], literal)
    if let Some(rest) = inner.strip_prefix("contains(") {
        let rest = rest.strip_suffix(')')?;
        let (lhs, rhs) = rest.split_once(',')?;
        let haystack = resolve_ref(lhs.trim(), context)?;
        let needle: Value = serde_json::from_str(rhs.trim()).ok()?;
        return Some(match (&haystack, &needle) {
            (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        });
    }

    // lhs in [a, b, c]
    if let Some(idx) = find_operator(inner, " in ") {
        let (lhs, rhs) = inner.split_at(idx);
        let rhs = &rhs[4..];
        let value = operand(lhs.trim(), context)?;
        let options: Value = serde_json::from_str(rhs.trim()).ok()?;
        return Some(options.as_array().map(|a| a.contains(&value)).unwrap_or(false));
    }

    for (op, cmp) in [
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ] {
        if let Some(idx) = find_operator(inner, op) {
            let (lhs, rhs) = inner.split_at(idx);
            let rhs = &rhs[op.len()..];
            let left = operand(lhs.trim(), context)?;
            let right = operand(rhs.trim(), context)?;
            return Some(compare(&left, &right, cmp));
        }
    }

    None
}

#[derive(Clone, Copy)]
enum Comparison {
    Eq,
    Ne,
    Gt,
    Lt,
}

/// Find a top-level operator position, skipping quoted strings
fn find_operator(s: &str, op: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i + op.len() <= s.len() {
        let b = bytes[i];
        if b == b'"' {
            in_string = !in_string;
        }
        if !in_string && s[i..].starts_with(op) {
            // `>` must not match inside `->` or `>=`; the grammar here only
            // has the four operators, so adjacency checks suffice
            return Some(i);
        }
        i += 1;
    }
    None
}

fn operand(s: &str, context: &Value) -> Option<Value> {
    if let Some(value) = resolve_ref(s, context) {
        return Some(value);
    }
    serde_json::from_str(s).ok()
}

fn compare(left: &Value, right: &Value, cmp: Comparison) -> bool {
    match cmp {
        Comparison::Eq => left == right,
        Comparison::Ne => left != right,
        Comparison::Gt | Comparison::Lt => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return false;
            };
            match cmp {
                Comparison::Gt => l > r,
                Comparison::Lt => l < r,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "fetch": { "status": 200, "body": "service degraded", "tags": ["a", "b"] },
            "init": { "target": "https://example.com" },
        })
    }

    #[test]
    fn whole_string_reference_keeps_the_type() {
        let ctx = context();
        assert_eq!(
            render_str("${ $context[\"fetch\"].status }", &ctx),
            json!(200)
        );
    }

    #[test]
    fn embedded_reference_interpolates_as_text() {
        let ctx = context();
        assert_eq!(
            render_str("status was ${ $context[\"fetch\"].status }", &ctx),
            json!("status was 200")
        );
    }

    #[test]
    fn render_value_walks_nested_structures() {
        let ctx = context();
        let rendered = render_value(
            &json!({ "url": "${ $context[\"init\"].target }", "list": ["${ $context[\"fetch\"].status }"] }),
            &ctx,
        );
        assert_eq!(rendered["url"], json!("https://example.com"));
        assert_eq!(rendered["list"][0], json!(200));
    }

    #[test]
    fn comparison_conditions() {
        let ctx = context();
        assert!(eval_condition("${ $context[\"fetch\"].status == 200 }", &ctx));
        assert!(!eval_condition("${ $context[\"fetch\"].status == 500 }", &ctx));
        assert!(eval_condition("${ $context[\"fetch\"].status > 199 }", &ctx));
        assert!(eval_condition("${ $context[\"fetch\"].status != \"ok\" }", &ctx));
    }

    #[test]
    fn contains_and_in_conditions() {
        let ctx = context();
        assert!(eval_condition(
            "${ contains($context[\"fetch\"].body, \"degraded\") }",
            &ctx
        ));
        assert!(eval_condition(
            "${ contains($context[\"fetch\"].tags, \"a\") }",
            &ctx
        ));
        assert!(eval_condition(
            "${ $context[\"fetch\"].status in [200, 204] }",
            &ctx
        ));
        assert!(!eval_condition(
            "${ $context[\"fetch\"].status in [500] }",
            &ctx
        ));
    }

    #[test]
    fn unresolvable_condition_is_false() {
        let ctx = context();
        assert!(!eval_condition("${ $context[\"missing\"].x == 1 }", &ctx));
        assert!(!eval_condition("garbage", &ctx));
    }
}
