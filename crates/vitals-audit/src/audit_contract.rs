//! Fixture-driven replay of audit scenarios.
//!
//! Each case is run through the real [`AuditRunner`] against a
//! [`FixtureEngine`] that serves the case's raw report, so threshold checks,
//! report extraction and session release are exercised without a browser.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::audit_engine::RenderingEngine;
use crate::audit_error::{AuditError, AuditResult};
use crate::audit_runner::{AuditPolicy, AuditRunner};
use crate::audit_types::{Metric, ThresholdSet};

pub const AUDIT_CONTRACT_SCHEMA_VERSION: u32 = 1;

const FIXTURE_ENGINE: &str = "fixture";
const FIXTURE_CONTROL_PORT: u16 = 9222;
const SUPPORTED_ERROR_KINDS: [&str; 5] = [
    "invalid_input",
    "launch",
    "audit",
    "timeout",
    "malformed_report",
];

fn default_case_url() -> String {
    "https://example.com/".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcomeKind {
    Pass,
    ThresholdFailure,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuditCaseExpectation {
    pub outcome: AuditOutcomeKind,
    #[serde(default)]
    pub failed_metrics: Vec<Metric>,
    #[serde(default)]
    pub error_kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuditContractCase {
    pub case_id: String,
    #[serde(default = "default_case_url")]
    pub url: String,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    #[serde(default)]
    pub report: Value,
    #[serde(default)]
    pub simulate_launch_failure: bool,
    #[serde(default)]
    pub simulate_audit_failure: bool,
    pub expected: AuditCaseExpectation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditContractFixture {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cases: Vec<AuditContractCase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Observed result of replaying one case.
pub struct AuditReplayResult {
    pub outcome: AuditOutcomeKind,
    pub failed_metrics: Vec<Metric>,
    pub error_kind: Option<String>,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReplaySummary {
    pub discovered_cases: usize,
    pub passed_cases: usize,
    pub threshold_failures: usize,
    pub error_cases: usize,
    pub launches: usize,
    pub terminations: usize,
}

pub fn parse_audit_contract_fixture(raw: &str) -> Result<AuditContractFixture> {
    let fixture = serde_json::from_str::<AuditContractFixture>(raw)
        .context("failed to parse audit contract fixture")?;
    validate_audit_contract_fixture(&fixture)?;
    Ok(fixture)
}

pub fn load_audit_contract_fixture(path: &Path) -> Result<AuditContractFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    parse_audit_contract_fixture(&raw)
        .with_context(|| format!("invalid fixture {}", path.display()))
}

pub fn validate_audit_contract_fixture(fixture: &AuditContractFixture) -> Result<()> {
    if fixture.schema_version != AUDIT_CONTRACT_SCHEMA_VERSION {
        bail!(
            "unsupported audit contract schema version {} (expected {})",
            fixture.schema_version,
            AUDIT_CONTRACT_SCHEMA_VERSION
        );
    }
    if fixture.name.trim().is_empty() {
        bail!("fixture name cannot be empty");
    }
    if fixture.cases.is_empty() {
        bail!("fixture must include at least one case");
    }

    let mut case_ids = HashSet::new();
    for (index, case) in fixture.cases.iter().enumerate() {
        validate_audit_case(case, index)?;
        let case_id = case.case_id.trim().to_string();
        if !case_ids.insert(case_id.clone()) {
            bail!("fixture contains duplicate case_id '{}'", case_id);
        }
    }
    Ok(())
}

fn validate_audit_case(case: &AuditContractCase, index: usize) -> Result<()> {
    if case.case_id.trim().is_empty() {
        bail!("fixture case index {} has empty case_id", index);
    }
    if case.simulate_launch_failure && case.simulate_audit_failure {
        bail!(
            "fixture case '{}' cannot simulate both launch and audit failure",
            case.case_id
        );
    }

    let expected = &case.expected;
    let error_kind = expected.error_kind.trim();
    match expected.outcome {
        AuditOutcomeKind::Error => {
            if error_kind.is_empty() {
                bail!(
                    "fixture case '{}' expects an error but names no error_kind",
                    case.case_id
                );
            }
            if !SUPPORTED_ERROR_KINDS.contains(&error_kind) {
                bail!(
                    "fixture case '{}' uses unsupported error_kind '{}'",
                    case.case_id,
                    error_kind
                );
            }
        }
        AuditOutcomeKind::Pass | AuditOutcomeKind::ThresholdFailure => {
            if !error_kind.is_empty() {
                bail!(
                    "fixture case '{}' sets error_kind for a non-error outcome",
                    case.case_id
                );
            }
            // Invalid thresholds are allowed only as an expected invalid_input error.
            case.thresholds.validate().with_context(|| {
                format!("fixture case '{}' has invalid thresholds", case.case_id)
            })?;
        }
    }

    let distinct = expected.failed_metrics.iter().collect::<BTreeSet<_>>();
    if distinct.len() != expected.failed_metrics.len() {
        bail!(
            "fixture case '{}' lists a failed metric more than once",
            case.case_id
        );
    }
    let failed_metrics_consistent = match expected.outcome {
        AuditOutcomeKind::ThresholdFailure => !expected.failed_metrics.is_empty(),
        AuditOutcomeKind::Pass | AuditOutcomeKind::Error => expected.failed_metrics.is_empty(),
    };
    if !failed_metrics_consistent {
        bail!(
            "fixture case '{}' failed_metrics do not match outcome {:?}",
            case.case_id,
            expected.outcome
        );
    }
    Ok(())
}

#[derive(Debug)]
/// Engine double that serves a fixture case's raw report.
pub struct FixtureEngine {
    report: Value,
    simulate_launch_failure: bool,
    simulate_audit_failure: bool,
    launches: AtomicUsize,
    terminations: AtomicUsize,
}

impl FixtureEngine {
    pub fn from_case(case: &AuditContractCase) -> Self {
        Self {
            report: case.report.clone(),
            simulate_launch_failure: case.simulate_launch_failure,
            simulate_audit_failure: case.simulate_audit_failure,
            launches: AtomicUsize::new(0),
            terminations: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FixtureSession;

#[async_trait]
impl RenderingEngine for FixtureEngine {
    type Session = FixtureSession;

    fn engine_name(&self) -> &'static str {
        FIXTURE_ENGINE
    }

    async fn launch(&self) -> AuditResult<FixtureSession> {
        if self.simulate_launch_failure {
            return Err(AuditError::launch(
                FIXTURE_ENGINE,
                "simulated launch failure",
            ));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureSession)
    }

    fn control_port(&self, _session: &FixtureSession) -> u16 {
        FIXTURE_CONTROL_PORT
    }

    async fn audit(&self, _session: &FixtureSession, url: &Url) -> AuditResult<Value> {
        if self.simulate_audit_failure {
            return Err(AuditError::Audit(format!(
                "simulated navigation failure for {url}"
            )));
        }
        Ok(self.report.clone())
    }

    async fn terminate(&self, _session: FixtureSession) -> AuditResult<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replays one case and returns the engine alongside the observed result.
pub async fn replay_audit_case(
    case: &AuditContractCase,
    policy: &AuditPolicy,
) -> Result<(AuditReplayResult, FixtureEngine)> {
    let runner = AuditRunner::new(FixtureEngine::from_case(case), *policy)
        .context("failed to build fixture audit runner")?;
    let result = match runner.run(&case.url, &case.thresholds).await {
        Ok(outcome) => AuditReplayResult {
            outcome: if outcome.passed() {
                AuditOutcomeKind::Pass
            } else {
                AuditOutcomeKind::ThresholdFailure
            },
            failed_metrics: outcome.failed_metrics(),
            error_kind: None,
            lines: outcome.checks.iter().map(ToString::to_string).collect(),
        },
        Err(error) => AuditReplayResult {
            outcome: AuditOutcomeKind::Error,
            failed_metrics: Vec::new(),
            error_kind: Some(error.kind().to_string()),
            lines: Vec::new(),
        },
    };
    let (engine, _) = runner.into_parts();
    Ok((result, engine))
}

pub fn assert_audit_result_matches_expectation(
    case: &AuditContractCase,
    result: &AuditReplayResult,
) -> Result<()> {
    if result.outcome != case.expected.outcome {
        bail!(
            "case '{}' expected outcome {:?} but runtime returned {:?}",
            case.case_id,
            case.expected.outcome,
            result.outcome
        );
    }
    if result.failed_metrics != case.expected.failed_metrics {
        bail!(
            "case '{}' expected failed metrics {:?} but runtime returned {:?}",
            case.case_id,
            case.expected.failed_metrics,
            result.failed_metrics
        );
    }
    let expected_kind = case.expected.error_kind.trim();
    let actual_kind = result.error_kind.as_deref().unwrap_or_default();
    if expected_kind != actual_kind {
        bail!(
            "case '{}' expected error_kind '{}' but runtime returned '{}'",
            case.case_id,
            expected_kind,
            actual_kind
        );
    }
    Ok(())
}

pub async fn run_audit_contract_fixture(
    fixture: &AuditContractFixture,
    policy: &AuditPolicy,
) -> Result<AuditReplaySummary> {
    let mut summary = AuditReplaySummary {
        discovered_cases: fixture.cases.len(),
        ..AuditReplaySummary::default()
    };

    for case in &fixture.cases {
        let (result, engine) = replay_audit_case(case, policy).await?;
        if engine.launches() != engine.terminations() {
            bail!(
                "case '{}' launched {} session(s) but terminated {}",
                case.case_id,
                engine.launches(),
                engine.terminations()
            );
        }
        assert_audit_result_matches_expectation(case, &result)?;

        summary.launches = summary.launches.saturating_add(engine.launches());
        summary.terminations = summary.terminations.saturating_add(engine.terminations());
        match result.outcome {
            AuditOutcomeKind::Pass => {
                summary.passed_cases = summary.passed_cases.saturating_add(1);
            }
            AuditOutcomeKind::ThresholdFailure => {
                summary.threshold_failures = summary.threshold_failures.saturating_add(1);
            }
            AuditOutcomeKind::Error => {
                summary.error_cases = summary.error_cases.saturating_add(1);
            }
        }
    }

    Ok(summary)
}
