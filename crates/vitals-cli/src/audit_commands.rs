use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use vitals_audit::audit_contract::{load_audit_contract_fixture, run_audit_contract_fixture};
use vitals_audit::{AuditOutcome, AuditPolicy, AuditRunner, ChromeLighthouseEngine};

use crate::audit_config::{load_audit_file_config, resolve_audit_config, AuditFileConfig};
use crate::cli_args::{ReplayArgs, RunArgs};

pub(crate) const EXIT_PASSED: i32 = 0;
pub(crate) const EXIT_THRESHOLD_FAILURE: i32 = 1;
pub(crate) const EXIT_AUDIT_ERROR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandExit {
    Passed,
    ThresholdFailure,
}

impl CommandExit {
    pub(crate) fn code(self) -> i32 {
        match self {
            Self::Passed => EXIT_PASSED,
            Self::ThresholdFailure => EXIT_THRESHOLD_FAILURE,
        }
    }
}

pub(crate) async fn execute_run_command(args: &RunArgs) -> Result<CommandExit> {
    let file = match &args.config {
        Some(path) => load_audit_file_config(path)?,
        None => AuditFileConfig::default(),
    };
    let config = resolve_audit_config(file, args)?;

    let engine = ChromeLighthouseEngine::new(config.engine)
        .context("failed to initialize chrome/lighthouse engine")?;
    let runner = AuditRunner::new(engine, config.policy)?;
    let outcome = runner.run(&config.url, &config.thresholds).await?;

    for check in &outcome.checks {
        println!("{check}");
    }
    if let Some(path) = &args.summary_json_out {
        write_summary_json(path, &render_outcome_summary(&outcome))?;
    }

    Ok(if outcome.passed() {
        CommandExit::Passed
    } else {
        CommandExit::ThresholdFailure
    })
}

pub(crate) async fn execute_replay_command(args: &ReplayArgs) -> Result<CommandExit> {
    if !args.fixture.is_file() {
        anyhow::bail!("fixture '{}' must point to a file", args.fixture.display());
    }
    let fixture = load_audit_contract_fixture(&args.fixture)?;
    let summary = run_audit_contract_fixture(&fixture, &AuditPolicy::default()).await?;

    println!(
        "audit contract replay summary: fixture={} discovered={} passed={} threshold_failures={} errors={} launches={} terminations={}",
        fixture.name,
        summary.discovered_cases,
        summary.passed_cases,
        summary.threshold_failures,
        summary.error_cases,
        summary.launches,
        summary.terminations,
    );
    if let Some(path) = &args.summary_json_out {
        let rendered =
            serde_json::to_value(&summary).context("serialize audit replay summary json")?;
        write_summary_json(path, &rendered)?;
        println!("summary_json={}", path.display());
    }

    Ok(CommandExit::Passed)
}

fn render_outcome_summary(outcome: &AuditOutcome) -> Value {
    json!({
        "url": outcome.url,
        "passed": outcome.passed(),
        "results": outcome.results,
        "checks": outcome.checks,
    })
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn write_summary_json(path: &Path, summary: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let rendered = serde_json::to_string_pretty(summary).context("serialize summary json")?;
    std::fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use vitals_audit::{AuditOutcome, ResultSet, ThresholdSet};

    use super::{render_outcome_summary, write_summary_json, CommandExit};

    #[test]
    fn unit_command_exit_codes_are_distinct_and_non_zero_on_failure() {
        assert_eq!(CommandExit::Passed.code(), 0);
        assert_eq!(CommandExit::ThresholdFailure.code(), 1);
        assert_ne!(super::EXIT_AUDIT_ERROR, 0);
        assert_ne!(super::EXIT_AUDIT_ERROR, CommandExit::ThresholdFailure.code());
    }

    #[test]
    fn functional_outcome_summary_json_lists_results_and_checks() {
        let outcome = AuditOutcome::evaluate(
            "https://example.com/",
            ResultSet {
                lcp: 3.0,
                cls: 0.05,
                inp: 0.0,
            },
            &ThresholdSet::default(),
        );
        let summary = render_outcome_summary(&outcome);
        assert_eq!(summary["passed"], false);
        assert_eq!(summary["results"]["LCP"], 3.0);
        assert_eq!(summary["checks"][0]["metric"], "LCP");
        assert_eq!(summary["checks"][0]["passed"], false);
        assert_eq!(summary["checks"].as_array().map(Vec::len), Some(2));

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/summary.json");
        write_summary_json(&path, &summary).expect("write summary");
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written, summary);
    }
}
