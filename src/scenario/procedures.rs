//! Named, reusable step sequences
//!
//! A procedure's client roles are symbolic; the mapping to concrete roles
//! arrives at invocation time, together with extra variables. The registry
//! ships with the registration handshake built in, since every case needs
//! it.

use std::collections::HashMap;

use crate::common::{Error, Result};

use super::config::{PatternSpec, StepSpec};

/// Symbolic role used by the built-in procedures
pub const CLIENT_ROLE: &str = "client";

/// Registry of named procedures, owned by the harness for one suite run
pub struct ProcedureRegistry {
    procedures: HashMap<String, Vec<StepSpec>>,
}

impl ProcedureRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in procedures
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.define("register", register_steps());
        registry
    }

    /// Store (or replace) a procedure under `name`
    pub fn define(&mut self, name: &str, steps: Vec<StepSpec>) {
        self.procedures.insert(name.to_string(), steps);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Expand `name` into concrete steps.
    ///
    /// Roles present in `role_map` are replaced; others stay as written, so
    /// a procedure can carry a default identity. Invocation `vars` merge
    /// under each step's own variables (the step wins on collision).
    pub fn expand(
        &self,
        name: &str,
        role_map: &HashMap<String, String>,
        vars: &HashMap<String, String>,
    ) -> Result<Vec<StepSpec>> {
        let steps = self
            .procedures
            .get(name)
            .ok_or_else(|| Error::UnknownProcedure(name.to_string()))?;

        Ok(steps
            .iter()
            .map(|step| {
                let mut expanded = step.clone();
                if let Some(concrete) = role_map.get(&expanded.client) {
                    expanded.client = concrete.clone();
                }
                for (key, value) in vars {
                    expanded
                        .vars
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                expanded
            })
            .collect())
    }
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The minimum handshake of the protocol under test: password, nickname,
/// user info, then the welcome burst
fn register_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new(CLIENT_ROLE, "PASS $password"),
        StepSpec::new(CLIENT_ROLE, "NICK $nick"),
        StepSpec::new(CLIENT_ROLE, "USER $nick 0 * :$realname")
            .with_var("realname", "ircheck user")
            .expect_all(vec![
                PatternSpec::literal(" 001 "),
                PatternSpec::literal(" 002 "),
                PatternSpec::literal(" 003 "),
                PatternSpec::literal(" 004 "),
            ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::config::ExpectSpec;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_role_map_leaves_roles_unchanged() {
        let registry = ProcedureRegistry::with_builtins();
        let steps = registry
            .expand("register", &HashMap::new(), &HashMap::new())
            .unwrap();
        assert!(steps.iter().all(|s| s.client == CLIENT_ROLE));
    }

    #[test]
    fn full_role_map_replaces_every_role() {
        let registry = ProcedureRegistry::with_builtins();
        let steps = registry
            .expand("register", &map(&[("client", "alice")]), &HashMap::new())
            .unwrap();
        assert!(steps.iter().all(|s| s.client == "alice"));
    }

    #[test]
    fn invocation_vars_lose_to_step_vars() {
        let mut registry = ProcedureRegistry::new();
        registry.define(
            "greet",
            vec![StepSpec::new("client", "PRIVMSG $target :$greeting")
                .with_var("greeting", "hello")],
        );

        let steps = registry
            .expand(
                "greet",
                &HashMap::new(),
                &map(&[("greeting", "ignored"), ("target", "bob")]),
            )
            .unwrap();

        assert_eq!(steps[0].vars.get("greeting").map(String::as_str), Some("hello"));
        assert_eq!(steps[0].vars.get("target").map(String::as_str), Some("bob"));
    }

    #[test]
    fn unknown_procedure_is_an_error() {
        let registry = ProcedureRegistry::with_builtins();
        let err = registry
            .expand("nope", &HashMap::new(), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownProcedure(_)));
    }

    #[test]
    fn builtin_register_expects_the_welcome_burst() {
        let registry = ProcedureRegistry::with_builtins();
        let steps = registry
            .expand("register", &HashMap::new(), &HashMap::new())
            .unwrap();
        assert_eq!(steps.len(), 3);
        match steps[2].expect.as_ref().unwrap() {
            ExpectSpec::All(patterns) => assert_eq!(patterns.len(), 4),
            other => panic!("expected all-of expectation, got {other:?}"),
        }
    }
}
