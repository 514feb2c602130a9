// Placeholder substitution for step parameters

use crate::types::{RunContext, StepId};
use serde_json::{Map, Value};

/// Resolves `{name}` placeholders against a run's variables and step results.
///
/// Only strings that are exactly one placeholder are replaced, and the
/// replacement keeps the looked-up value's JSON type. Names found in neither
/// the variables nor the step results are left as the literal placeholder.
pub struct ParameterResolver;

impl ParameterResolver {
    /// Resolve every placeholder in a parameter object
    pub fn resolve(parameters: &Map<String, Value>, context: &RunContext) -> Map<String, Value> {
        parameters
            .iter()
            .map(|(key, value)| (key.clone(), Self::resolve_value(value, context)))
            .collect()
    }

    /// Resolve a single value, recursing into objects and arrays
    pub fn resolve_value(value: &Value, context: &RunContext) -> Value {
        match value {
            Value::String(s) => match placeholder_name(s) {
                Some(name) => Self::lookup(name, context).unwrap_or_else(|| value.clone()),
                None => value.clone(),
            },
            Value::Object(map) => Value::Object(Self::resolve(map, context)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| Self::resolve_value(item, context))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Names of every placeholder referenced in the parameters, sorted and deduplicated
    pub fn placeholders(parameters: &Map<String, Value>) -> Vec<String> {
        let mut names = Vec::new();
        for value in parameters.values() {
            collect_placeholders(value, &mut names);
        }
        names.sort();
        names.dedup();
        names
    }

    fn lookup(name: &str, context: &RunContext) -> Option<Value> {
        context
            .variables
            .get(name)
            .or_else(|| context.step_results.get(&StepId::new(name)))
            .cloned()
    }
}

fn placeholder_name(s: &str) -> Option<&str> {
    if s.len() >= 2 && s.starts_with('{') && s.ends_with('}') {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn collect_placeholders(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = placeholder_name(s) {
                names.push(name.to_string());
            }
        }
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, names)),
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, names)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn context_with_town() -> RunContext {
        let mut context = RunContext::default();
        context
            .variables
            .insert("town".to_string(), json!("Seoul"));
        context
    }

    #[test]
    fn test_resolves_variable() {
        let resolved = ParameterResolver::resolve(&params(json!({"q": "{town}"})), &context_with_town());
        assert_eq!(Value::Object(resolved), json!({"q": "Seoul"}));
    }

    #[test]
    fn test_missing_placeholder_kept_verbatim() {
        let resolved =
            ParameterResolver::resolve(&params(json!({"q": "{missing}"})), &context_with_town());
        assert_eq!(Value::Object(resolved), json!({"q": "{missing}"}));
    }

    #[test]
    fn test_step_result_keeps_type() {
        let mut context = RunContext::default();
        context.step_results.insert(
            StepId::new("search_repo"),
            json!({"repositories": [{"name": "test-repo"}]}),
        );

        let resolved =
            ParameterResolver::resolve(&params(json!({"found": "{search_repo}"})), &context);
        assert_eq!(resolved["found"]["repositories"][0]["name"], "test-repo");
    }

    #[test]
    fn test_variables_shadow_step_results() {
        let mut context = RunContext::default();
        context.variables.insert("a".to_string(), json!(1));
        context.step_results.insert(StepId::new("a"), json!(2));

        let resolved = ParameterResolver::resolve(&params(json!({"v": "{a}"})), &context);
        assert_eq!(resolved["v"], json!(1));
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let resolved = ParameterResolver::resolve(
            &params(json!({
                "outer": {"inner": "{town}", "n": 3},
                "list": ["{town}", {"deep": "{town}"}, "plain"],
            })),
            &context_with_town(),
        );

        assert_eq!(
            Value::Object(resolved),
            json!({
                "outer": {"inner": "Seoul", "n": 3},
                "list": ["Seoul", {"deep": "Seoul"}, "plain"],
            })
        );
    }

    #[test]
    fn test_partial_placeholders_pass_through() {
        let resolved = ParameterResolver::resolve(
            &params(json!({"q": "user:{town}", "empty": "{}", "brace": "{"})),
            &context_with_town(),
        );
        assert_eq!(resolved["q"], "user:{town}");
        assert_eq!(resolved["empty"], "{}");
        assert_eq!(resolved["brace"], "{");
    }

    #[test]
    fn test_placeholders_listing() {
        let names = ParameterResolver::placeholders(&params(json!({
            "owner": "{repo_owner}",
            "repo": "{repo_name}",
            "nested": {"again": "{repo_owner}"},
            "literal": "main",
        })));
        assert_eq!(names, vec!["repo_name", "repo_owner"]);
    }
}
