//! Externalized variables.
//!
//! A function result too large for the log is stored here under a generated
//! name, and the log carries `${name}` instead. Names are
//! `<function>_<count>` with a strictly increasing count per function; counts
//! are all digits, so names from distinct functions never collide.

use std::collections::BTreeMap;

use memloop_core::error::ToolError;
use memloop_core::variable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variables of one agent context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentVariables {
    values: BTreeMap<String, Value>,
    counters: BTreeMap<String, u64>,
}

impl AgentVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next name for `function`.
    ///
    /// Skips any name that was set by hand in the meantime.
    pub fn allocate(&mut self, function: &str) -> String {
        let counter = self.counters.entry(function.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let name = format!("{function}_{counter}");
            if !self.values.contains_key(&name) {
                return name;
            }
        }
    }

    /// Allocate a name for `function` and store `value` under it.
    pub fn store(&mut self, function: &str, value: Value) -> String {
        let name = self.allocate(function);
        self.values.insert(name.clone(), value);
        name
    }

    /// Set or overwrite a variable. Accepts a bare name or a placeholder.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ToolError> {
        let name = variable::parse_placeholder(name).unwrap_or(name);
        if !variable::is_valid_name(name) {
            return Err(ToolError::InvalidArguments(format!(
                "'{name}' is not a valid variable name"
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read a variable by bare name or by `${name}`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = variable::parse_placeholder(name).unwrap_or(name);
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// How many names have been allocated for `function`.
    pub fn count(&self, function: &str) -> u64 {
        self.counters.get(function).copied().unwrap_or(0)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every string that is exactly a placeholder with the variable's
    /// value, descending into arrays and objects. Substituted values are not
    /// themselves rescanned.
    pub fn substitute(&self, arguments: Value) -> Result<Value, ToolError> {
        match arguments {
            Value::String(text) => match variable::parse_placeholder(&text) {
                Some(name) => self
                    .values
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ToolError::UnknownVariable(name.to_string())),
                None => Ok(Value::String(text)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.substitute(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => fields
                .into_iter()
                .map(|(key, value)| self.substitute(value).map(|value| (key, value)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other),
        }
    }
}

/// The text a value contributes to the log: strings verbatim, anything else
/// as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counters_increase_per_function() {
        let mut vars = AgentVariables::new();
        assert_eq!(vars.store("fetch", json!("a")), "fetch_1");
        assert_eq!(vars.store("fetch", json!("b")), "fetch_2");
        assert_eq!(vars.store("search", json!("c")), "search_1");
        assert_eq!(vars.count("fetch"), 2);
        assert_eq!(vars.count("unused"), 0);
    }

    #[test]
    fn names_never_collide_across_functions() {
        let mut vars = AgentVariables::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..12 {
            assert!(seen.insert(vars.store("a", json!(1))));
            assert!(seen.insert(vars.store("a_1", json!(2))));
            assert!(seen.insert(vars.store("a_11", json!(3))));
        }
        assert_eq!(vars.len(), 36);
    }

    #[test]
    fn placeholder_and_bare_name_read_the_same() {
        let mut vars = AgentVariables::new();
        let name = vars.store("fetch", json!("page"));
        assert_eq!(vars.get(&name), Some(&json!("page")));
        assert_eq!(vars.get("${fetch_1}"), vars.get("fetch_1"));
    }

    #[test]
    fn overwrite_returns_last_value() {
        let mut vars = AgentVariables::new();
        vars.store("fetch", json!("old"));
        vars.set("${fetch_1}", json!("new")).unwrap();
        assert_eq!(vars.get("fetch_1"), Some(&json!("new")));
        assert!(vars.set("bad name", json!(0)).is_err());
    }

    #[test]
    fn allocate_skips_hand_set_names() {
        let mut vars = AgentVariables::new();
        vars.set("fetch_1", json!("manual")).unwrap();
        assert_eq!(vars.store("fetch", json!("auto")), "fetch_2");
        assert_eq!(vars.get("fetch_1"), Some(&json!("manual")));
    }

    #[test]
    fn substitute_walks_nested_arguments() {
        let mut vars = AgentVariables::new();
        vars.store("fetch", json!({"html": "<p>hi</p>"}));
        let args = json!({
            "page": "${fetch_1}",
            "list": ["${fetch_1}", "plain", 3],
            "inline": "not ${fetch_1} alone",
        });
        let out = vars.substitute(args).unwrap();
        assert_eq!(out["page"], json!({"html": "<p>hi</p>"}));
        assert_eq!(out["list"][0], json!({"html": "<p>hi</p>"}));
        assert_eq!(out["list"][1], "plain");
        assert_eq!(out["inline"], "not ${fetch_1} alone");
    }

    #[test]
    fn substitute_reports_unknown_variable() {
        let vars = AgentVariables::new();
        let err = vars.substitute(json!({"x": "${nope_1}"})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownVariable(name) if name == "nope_1"));
    }

    #[test]
    fn render_strings_verbatim() {
        assert_eq!(render(&json!("text")), "text");
        assert_eq!(render(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
