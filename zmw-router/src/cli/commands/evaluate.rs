//! Labelled prompt evaluation
//!
//! A cases file is a JSON array of
//! `{"prompt": "...", "expected_service": "...", "expected_command": "..."}`.
//! Cases expecting no command use `"expected_command": "DONT_KNOW"` and no
//! service. Only the chosen service and command are compared, never the
//! arguments. The model's choice is never executed.

use crate::cli::{CliContext, OutputFormatter};
use crate::error::{RouterError, RouterResult};
use crate::grammar::FALLBACK_SENTINEL;
use crate::router::{AskOptions, QueryOutcome};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct EvaluateArgs {
    /// JSON file with labelled prompts
    pub cases: PathBuf,

    /// Stop after this many cases
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub prompt: String,
    #[serde(default)]
    pub expected_service: Option<String>,
    pub expected_command: String,
}

impl EvalCase {
    pub fn expects_nothing(&self) -> bool {
        self.expected_command == FALLBACK_SENTINEL
    }

    fn expected_label(&self) -> String {
        match &self.expected_service {
            Some(service) if !self.expects_nothing() => {
                format!("{}.{}", service, self.expected_command)
            }
            _ => self.expected_command.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvalResult {
    pub prompt: String,
    pub expected: String,
    pub got: String,
    pub passed: bool,
}

/// Compare a dry-run outcome with the label
pub fn check_outcome(case: &EvalCase, outcome: &QueryOutcome) -> bool {
    if case.expects_nothing() {
        return matches!(
            outcome,
            QueryOutcome::NoMatch | QueryOutcome::NoRelevantService
        );
    }
    match outcome.chosen() {
        Some((service, command)) => {
            case.expected_service.as_deref() == Some(service) && case.expected_command == command
        }
        None => false,
    }
}

fn outcome_label(outcome: &QueryOutcome) -> String {
    match outcome.chosen() {
        Some((service, command)) => format!("{}.{}", service, command),
        None => match outcome {
            QueryOutcome::NoMatch | QueryOutcome::NoRelevantService => {
                FALLBACK_SENTINEL.to_string()
            }
            other => other.label().to_string(),
        },
    }
}

pub fn load_cases(path: &Path) -> RouterResult<Vec<EvalCase>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RouterError::Io(format!("Failed to read cases file {:?}: {}", path, e)))?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn execute(ctx: &mut CliContext, args: EvaluateArgs) -> RouterResult<()> {
    let formatter = OutputFormatter::new(ctx.output_format);
    let router = ctx.router()?;
    let mut cases = load_cases(&args.cases)?;
    if let Some(limit) = args.limit {
        cases.truncate(limit);
    }
    ctx.status(&format!("Evaluating {} prompts with {}", cases.len(), router.engine_name()));

    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        let report = router
            .ask(&case.prompt, AskOptions::default().dry_run(true).source("evaluate"))
            .await;
        if let QueryOutcome::ModelUnavailable(reason) = &report.outcome {
            return Err(RouterError::ModelUnavailable(reason.clone()));
        }
        let passed = check_outcome(case, &report.outcome);
        let result = EvalResult {
            prompt: case.prompt.clone(),
            expected: case.expected_label(),
            got: outcome_label(&report.outcome),
            passed,
        };
        if !formatter.is_json() {
            if passed {
                formatter.success(&result.prompt);
            } else {
                formatter.error(&format!(
                    "{}\n    Expected: {}\n    Got:      {}",
                    result.prompt, result.expected, result.got
                ));
            }
        }
        results.push(result);
    }

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();
    let pct = if total == 0 {
        0.0
    } else {
        passed as f64 * 100.0 / total as f64
    };

    if formatter.is_json() {
        formatter.json(&serde_json::json!({
            "passed": passed,
            "total": total,
            "results": results,
        }));
    } else {
        formatter.section("Score");
        formatter.kv("Passed", &format!("{}/{} ({:.0}%)", passed, total, pct));
    }
    Ok(())
}
