//! Suite and test-case definitions
//!
//! Defines the data structures for deserializing YAML suites. The same
//! types double as the in-code builder API used by the stress harness and
//! the integration tests.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::common::{Error, Result};
use crate::pattern::Pattern;

/// A complete suite loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct SuiteFile {
    /// Name of the suite
    pub name: String,
    /// Optional description of what the suite covers
    #[serde(default)]
    pub description: Option<String>,
    /// Reusable step sequences; client roles inside them are symbolic
    #[serde(default)]
    pub procedures: HashMap<String, Vec<StepSpec>>,
    /// The test cases, run in order
    pub cases: Vec<CaseSpec>,
}

impl SuiteFile {
    /// Load and parse a YAML suite file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Scenario(format!("failed to parse suite '{}': {}", path.display(), e))
        })
    }
}

/// One test case
#[derive(Deserialize, Debug, Clone)]
pub struct CaseSpec {
    /// Name of the test case
    pub name: String,
    /// Optional description of what the case verifies
    #[serde(default)]
    pub description: Option<String>,
    /// Roles connected during setup and disconnected during cleanup
    pub clients: Vec<String>,
    /// The sequence of entries to execute
    pub steps: Vec<CaseEntry>,
}

/// A single entry in a case's execution flow
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CaseEntry {
    /// Send a command through a client, optionally awaiting replies
    Send(StepSpec),
    /// Expand a named procedure with a role mapping
    Call {
        /// Name of the procedure to expand
        procedure: String,
        /// Symbolic role -> concrete role
        #[serde(default)]
        clients: HashMap<String, String>,
        /// Variables merged under each expanded step's own variables
        #[serde(default)]
        vars: HashMap<String, String>,
    },
}

/// One send-and-optionally-verify unit
#[derive(Deserialize, Debug, Clone)]
pub struct StepSpec {
    /// Target role (symbolic inside procedures)
    pub client: String,
    /// Command template; `$name` placeholders are substituted before sending
    pub line: String,
    /// What must appear in the client's log after the send
    #[serde(default)]
    pub expect: Option<ExpectSpec>,
    /// Step-local variables; they win over invocation and harness variables
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Per-step override of the await timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl StepSpec {
    pub fn new(client: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            line: line.into(),
            expect: None,
            vars: HashMap::new(),
            timeout_ms: None,
        }
    }

    pub fn expect_one(mut self, pattern: PatternSpec) -> Self {
        self.expect = Some(ExpectSpec::One(pattern));
        self
    }

    pub fn expect_all(mut self, patterns: Vec<PatternSpec>) -> Self {
        self.expect = Some(ExpectSpec::All(patterns));
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// What a step expects to observe in its client's log
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ExpectSpec {
    /// A single pattern
    One(PatternSpec),
    /// All patterns must appear within the deadline, in any arrival order
    All(Vec<PatternSpec>),
}

/// A literal or regular-expression pattern
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum PatternSpec {
    /// Matched as a literal substring
    Literal(String),
    /// Matched as a regular expression
    Regex { regex: String },
}

impl PatternSpec {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    pub fn regex(source: impl Into<String>) -> Self {
        Self::Regex {
            regex: source.into(),
        }
    }

    pub fn to_pattern(&self) -> Pattern {
        match self {
            Self::Literal(text) => Pattern::Literal(text.clone()),
            Self::Regex { regex } => Pattern::Regex(regex.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_suite() {
        let suite: SuiteFile = serde_yaml::from_str(
            r#"
            name: basic
            procedures:
              join:
                - client: client
                  line: "JOIN $channel"
                  expect: "JOIN $channel"
            cases:
              - name: hello
                clients: [alice, bob]
                steps:
                  - action: call
                    procedure: register
                    clients: { client: alice }
                    vars: { nick: alice }
                  - action: send
                    client: alice
                    line: "PRIVMSG #test :Hi!"
                  - action: send
                    client: bob
                    line: "PING :x"
                    expect:
                      - "PONG"
                      - regex: "PONG :?x"
                    timeout_ms: 500
            "#,
        )
        .unwrap();

        assert_eq!(suite.name, "basic");
        assert_eq!(suite.procedures["join"].len(), 1);
        assert_eq!(suite.cases.len(), 1);

        let case = &suite.cases[0];
        assert_eq!(case.clients, vec!["alice", "bob"]);
        assert_eq!(case.steps.len(), 3);

        match &case.steps[0] {
            CaseEntry::Call {
                procedure,
                clients,
                vars,
            } => {
                assert_eq!(procedure, "register");
                assert_eq!(clients.get("client").map(String::as_str), Some("alice"));
                assert_eq!(vars.get("nick").map(String::as_str), Some("alice"));
            }
            other => panic!("expected call entry, got {other:?}"),
        }

        match &case.steps[1] {
            CaseEntry::Send(step) => {
                assert_eq!(step.client, "alice");
                assert!(step.expect.is_none());
            }
            other => panic!("expected send entry, got {other:?}"),
        }

        match &case.steps[2] {
            CaseEntry::Send(step) => {
                assert_eq!(step.timeout_ms, Some(500));
                match step.expect.as_ref().unwrap() {
                    ExpectSpec::All(patterns) => {
                        assert_eq!(patterns.len(), 2);
                        assert!(matches!(patterns[0], PatternSpec::Literal(_)));
                        assert!(matches!(patterns[1], PatternSpec::Regex { .. }));
                    }
                    other => panic!("expected all-of expectation, got {other:?}"),
                }
            }
            other => panic!("expected send entry, got {other:?}"),
        }
    }

    #[test]
    fn bare_string_expect_is_a_single_literal() {
        let step: StepSpec = serde_yaml::from_str(
            r#"
            client: alice
            line: "NICK alice"
            expect: "NICK"
            "#,
        )
        .unwrap();
        assert!(matches!(
            step.expect,
            Some(ExpectSpec::One(PatternSpec::Literal(_)))
        ));
    }

    #[test]
    fn regex_mapping_expect_is_a_single_regex() {
        let step: StepSpec = serde_yaml::from_str(
            r#"
            client: alice
            line: "WHOIS bob"
            expect:
              regex: "31[18]"
            "#,
        )
        .unwrap();
        assert!(matches!(
            step.expect,
            Some(ExpectSpec::One(PatternSpec::Regex { .. }))
        ));
    }
}
