//! `{{ident}}` placeholder substitution (§4.7 step 5), kept as a standalone
//! pure function so it is independently unit-testable.
//!
//! Whitespace around the identifier is tolerant (`{{ name }}`); dotted paths
//! (`{{user.name}}`) are looked up as a literal key in `variables` first and,
//! failing that, walked segment-by-segment through nested JSON objects.
//! Missing variables render as empty string; declared-but-unused variables
//! are simply ignored.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static regex"));

/// Extracts the set of placeholder identifiers referenced by `content`
/// (used by the catalog writer to validate `placeholders ⊆ variables`).
pub fn extract_placeholders(content: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitutes every `{{ident}}` in `template` with the corresponding value
/// from `variables`. Values are stringified without quotes for strings;
/// other JSON types use their `to_string()` representation.
pub fn render(template: &str, variables: &HashMap<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let ident = &caps[1];
            lookup(ident, variables)
                .map(stringify)
                .unwrap_or_default()
        })
        .into_owned()
}

fn lookup<'a>(ident: &str, variables: &'a HashMap<String, Value>) -> Option<&'a Value> {
    if let Some(v) = variables.get(ident) {
        return Some(v);
    }
    let mut segments = ident.split('.');
    let head = segments.next()?;
    let mut current = variables.get(head)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_simple_placeholder() {
        let mut vars = HashMap::new();
        vars.insert("name".into(), json!("X"));
        assert_eq!(render("hi {{name}}", &vars), "hi X");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let mut vars = HashMap::new();
        vars.insert("name".into(), json!("X"));
        assert_eq!(render("hi {{ name }}", &vars), "hi X");
    }

    #[test]
    fn missing_variable_renders_empty() {
        let vars = HashMap::new();
        assert_eq!(render("hi {{name}}", &vars), "hi ");
    }

    #[test]
    fn unused_declared_variable_is_ignored() {
        let mut vars = HashMap::new();
        vars.insert("name".into(), json!("X"));
        vars.insert("unused".into(), json!("noise"));
        assert_eq!(render("hi {{name}}", &vars), "hi X");
    }

    #[test]
    fn dotted_path_resolves_nested_object() {
        let mut vars = HashMap::new();
        vars.insert("user".into(), json!({"name": "X"}));
        assert_eq!(render("hi {{user.name}}", &vars), "hi X");
    }

    #[test]
    fn extracts_placeholder_identifiers() {
        let placeholders = extract_placeholders("hi {{name}}, see {{link}}");
        assert_eq!(placeholders, vec!["name".to_string(), "link".to_string()]);
    }
}
