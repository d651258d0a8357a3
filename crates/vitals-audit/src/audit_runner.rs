use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::audit_engine::RenderingEngine;
use crate::audit_error::{AuditError, AuditResult};
use crate::audit_types::{AuditOutcome, ResultSet, ThresholdSet};

pub const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_AUDIT_TIMEOUT_MS: u64 = 120_000;

const SUPPORTED_URL_SCHEMES: [&str; 3] = ["http", "https", "file"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
/// Upper bounds for the two engine stages of an audit.
pub struct AuditPolicy {
    pub launch_timeout_ms: u64,
    pub audit_timeout_ms: u64,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            audit_timeout_ms: DEFAULT_AUDIT_TIMEOUT_MS,
        }
    }
}

impl AuditPolicy {
    pub fn validate(&self) -> AuditResult<()> {
        if self.launch_timeout_ms == 0 {
            return Err(AuditError::InvalidConfig(
                "launch timeout must be greater than 0ms".to_string(),
            ));
        }
        if self.audit_timeout_ms == 0 {
            return Err(AuditError::InvalidConfig(
                "audit timeout must be greater than 0ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
/// Drives one measurement pass per [`AuditRunner::run`] call.
pub struct AuditRunner<E: RenderingEngine> {
    engine: E,
    policy: AuditPolicy,
}

impl<E: RenderingEngine> AuditRunner<E> {
    pub fn new(engine: E, policy: AuditPolicy) -> AuditResult<Self> {
        policy.validate()?;
        Ok(Self { engine, policy })
    }

    pub fn into_parts(self) -> (E, AuditPolicy) {
        (self.engine, self.policy)
    }

    /// Launches a session, audits `target_url`, releases the session and
    /// checks the measurements against `thresholds`.
    ///
    /// A threshold violation is a successful run with a failing outcome.
    /// Launch, audit, timeout and report errors are returned as `Err` for the
    /// caller to report. Once a session is launched it is terminated exactly
    /// once on every path.
    pub async fn run(
        &self,
        target_url: &str,
        thresholds: &ThresholdSet,
    ) -> AuditResult<AuditOutcome> {
        let result = self.run_checked(target_url, thresholds).await;
        if let Err(error) = &result {
            tracing::debug!(
                url = target_url,
                kind = error.kind(),
                "performance audit aborted: {error}"
            );
        }
        result
    }

    async fn run_checked(
        &self,
        target_url: &str,
        thresholds: &ThresholdSet,
    ) -> AuditResult<AuditOutcome> {
        let url = parse_target_url(target_url)?;
        thresholds.validate()?;

        let session = with_timeout(
            "engine launch",
            self.policy.launch_timeout_ms,
            self.engine.launch(),
        )
        .await?;
        tracing::info!(
            engine = self.engine.engine_name(),
            port = self.engine.control_port(&session),
            url = %url,
            "rendering engine launched"
        );

        let measured = self.measure(&session, &url).await;
        if let Err(error) = self.engine.terminate(session).await {
            tracing::warn!(
                engine = self.engine.engine_name(),
                "failed to release rendering engine: {error}"
            );
        }
        let results = measured?;

        let outcome = AuditOutcome::evaluate(url.as_str(), results, thresholds);
        for check in &outcome.checks {
            tracing::info!(passed = check.passed, "{check}");
        }
        Ok(outcome)
    }

    async fn measure(&self, session: &E::Session, url: &Url) -> AuditResult<ResultSet> {
        let report = with_timeout(
            "audit",
            self.policy.audit_timeout_ms,
            self.engine.audit(session, url),
        )
        .await?;
        ResultSet::from_report(&report)
    }
}

/// Parses an absolute `http`, `https` or `file` URL.
pub fn parse_target_url(raw: &str) -> AuditResult<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|error| AuditError::InvalidUrl {
        url: trimmed.to_string(),
        reason: error.to_string(),
    })?;
    if !SUPPORTED_URL_SCHEMES.contains(&url.scheme()) {
        return Err(AuditError::InvalidUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

async fn with_timeout<T>(
    stage: &'static str,
    timeout_ms: u64,
    future: impl Future<Output = AuditResult<T>>,
) -> AuditResult<T> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), future)
        .await
        .map_err(|_| AuditError::Timeout { stage, timeout_ms })?
}
