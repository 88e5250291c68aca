//! Step, case and suite execution
//!
//! The harness is the one orchestration context of a run: it owns the
//! active sessions, the procedure registry and the base variables, and it
//! drives everything through a single sequential flow. Only the per-session
//! drain tasks run alongside it.

use std::collections::HashMap;
use std::time::Duration;

use colored::Colorize;

use crate::common::{Config, Error, Result};
use crate::pattern::{self, Pattern};
use crate::session::{SessionSet, TAIL_LINES};
use crate::transport::Transport;

use super::config::{CaseEntry, CaseSpec, ExpectSpec, StepSpec, SuiteFile};
use super::procedures::ProcedureRegistry;

/// Result of one test case
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Aggregate outcome of a suite run
#[derive(Debug, Default)]
pub struct SuiteSummary {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub total: usize,
}

impl SuiteSummary {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Names of the failing cases, in execution order
    pub fn failing(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Orchestration context for one suite run
pub struct Harness {
    transport: Box<dyn Transport>,
    sessions: SessionSet,
    procedures: ProcedureRegistry,
    base_vars: HashMap<String, String>,
    default_timeout: Duration,
}

impl Harness {
    pub fn new(config: &Config, transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: SessionSet::new(
                config.timeouts.poll_interval(),
                config.timeouts.connect(),
            ),
            procedures: ProcedureRegistry::with_builtins(),
            base_vars: config.base_vars(),
            default_timeout: config.timeouts.await_default(),
        }
    }

    pub fn sessions(&self) -> &SessionSet {
        &self.sessions
    }

    pub fn procedures_mut(&mut self) -> &mut ProcedureRegistry {
        &mut self.procedures
    }

    /// Execute one concrete step: resolve variables, send, await
    /// expectations.
    ///
    /// An all-of expectation awaits each pattern independently against the
    /// session's full history, so arrival order is irrelevant.
    pub async fn execute_step(&mut self, step: &StepSpec) -> Result<()> {
        let mut vars = self.base_vars.clone();
        vars.extend(step.vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let line = pattern::substitute(&step.line, &vars);
        self.sessions.send(&step.client, &line).await?;

        let patterns: Vec<Pattern> = match &step.expect {
            None => return Ok(()),
            Some(ExpectSpec::One(p)) => vec![p.to_pattern()],
            Some(ExpectSpec::All(ps)) => ps.iter().map(|p| p.to_pattern()).collect(),
        };

        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        for raw in patterns {
            let resolved = raw.substituted(&vars);
            if !self
                .sessions
                .await_match(&step.client, &resolved, timeout)
                .await?
            {
                return Err(Error::match_timeout(
                    &resolved,
                    timeout,
                    self.sessions.tail(&step.client, TAIL_LINES),
                ));
            }
        }
        Ok(())
    }

    /// Expand a case entry into the concrete steps to run
    fn expand_entry(&self, entry: &CaseEntry) -> Result<Vec<StepSpec>> {
        match entry {
            CaseEntry::Send(step) => Ok(vec![step.clone()]),
            CaseEntry::Call {
                procedure,
                clients,
                vars,
            } => self.procedures.expand(procedure, clients, vars),
        }
    }

    /// Run one case: Setup -> Running -> Cleanup.
    ///
    /// Setup connects every required role; a connect failure is deferred,
    /// the first step against that role fails naturally. The first failing
    /// entry aborts the rest. Cleanup disconnects every required role on
    /// both the pass and fail paths, so no session leaks across cases.
    pub async fn run_case(&mut self, case: &CaseSpec) -> TestResult {
        println!("\n{} {}", "Running:".blue().bold(), case.name.white().bold());
        if let Some(desc) = &case.description {
            println!("  {}", desc.dimmed());
        }

        for role in &case.clients {
            if self.sessions.contains(role) {
                continue;
            }
            if let Err(err) = self.sessions.connect(role, self.transport.as_ref()).await {
                tracing::warn!(role = %role, error = %err, "connect failed during setup");
            }
        }

        let steps_total = case.steps.len();
        let mut steps_run = 0;
        let mut error: Option<String> = None;

        'entries: for entry in &case.steps {
            if let CaseEntry::Call { procedure, .. } = entry {
                println!("  {} {}", "→".cyan(), procedure.dimmed());
            }
            let steps = match self.expand_entry(entry) {
                Ok(steps) => steps,
                Err(err) => {
                    println!("  {} {}", "✗".red(), err);
                    error = Some(err.to_string());
                    break 'entries;
                }
            };
            for step in &steps {
                match self.execute_step(step).await {
                    Ok(()) => println!("  {} {}", "✓".green(), step.line.dimmed()),
                    Err(err) => {
                        println!("  {} {}", "✗".red(), err);
                        error = Some(err.to_string());
                        break 'entries;
                    }
                }
            }
            steps_run += 1;
        }

        for role in &case.clients {
            self.sessions.disconnect(role).await;
        }

        let passed = error.is_none();
        if passed {
            println!("  {}", "passed".green().bold());
        } else {
            println!("  {}", "FAILED".red().bold());
        }

        TestResult {
            name: case.name.clone(),
            passed,
            steps_run,
            steps_total,
            error,
        }
    }

    /// Run every case in order, never in parallel; the server under test
    /// is shared state (nicknames, channels) and cases would interfere.
    pub async fn run_suite(&mut self, suite: &SuiteFile) -> SuiteSummary {
        println!("{} {}", "Suite:".blue().bold(), suite.name.white().bold());
        if let Some(desc) = &suite.description {
            println!("  {}", desc.dimmed());
        }

        for (name, steps) in &suite.procedures {
            self.procedures.define(name, steps.clone());
        }

        let mut summary = SuiteSummary::default();
        for case in &suite.cases {
            let result = self.run_case(case).await;
            if result.passed {
                summary.passed += 1;
            }
            summary.total += 1;
            summary.results.push(result);
        }

        print_summary(&summary);
        summary
    }

    /// Suite-end teardown: drop any session a case left behind
    pub async fn shutdown(&mut self) {
        self.sessions.disconnect_all().await;
    }
}

fn print_summary(summary: &SuiteSummary) {
    println!();
    if summary.all_passed() {
        println!(
            "{} {}/{} cases passed",
            "✓".green().bold(),
            summary.passed,
            summary.total
        );
    } else {
        println!(
            "{} {}/{} cases passed",
            "✗".red().bold(),
            summary.passed,
            summary.total
        );
        for name in summary.failing() {
            println!("  {} {}", "failed:".red(), name);
        }
    }
}
