use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit_error::{AuditError, AuditResult};

pub const DEFAULT_LCP_THRESHOLD_SECONDS: f64 = 2.5;
pub const DEFAULT_CLS_THRESHOLD: f64 = 0.1;

const MILLIS_PER_SECOND: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Core Web Vitals checked by an audit.
pub enum Metric {
    #[serde(rename = "LCP")]
    Lcp,
    #[serde(rename = "CLS")]
    Cls,
    #[serde(rename = "INP")]
    Inp,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Lcp, Metric::Cls, Metric::Inp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lcp => "LCP",
            Self::Cls => "CLS",
            Self::Inp => "INP",
        }
    }

    /// Audit id under `audits` in a raw Lighthouse report.
    pub fn audit_id(self) -> &'static str {
        match self {
            Self::Lcp => "largest-contentful-paint",
            Self::Cls => "cumulative-layout-shift",
            Self::Inp => "experimental-interaction-to-next-paint",
        }
    }

    /// Converts a raw report value into the unit thresholds are expressed in.
    pub fn scale_raw(self, raw: f64) -> f64 {
        match self {
            Self::Lcp | Self::Inp => raw / MILLIS_PER_SECOND,
            Self::Cls => raw,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
/// Maximum acceptable value per metric. `INP` is only checked when present.
pub struct ThresholdSet {
    #[serde(rename = "LCP")]
    pub lcp: f64,
    #[serde(rename = "CLS")]
    pub cls: f64,
    #[serde(rename = "INP", default, skip_serializing_if = "Option::is_none")]
    pub inp: Option<f64>,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            lcp: DEFAULT_LCP_THRESHOLD_SECONDS,
            cls: DEFAULT_CLS_THRESHOLD,
            inp: None,
        }
    }
}

impl ThresholdSet {
    pub fn new(lcp: f64, cls: f64, inp: Option<f64>) -> AuditResult<Self> {
        let thresholds = Self { lcp, cls, inp };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> AuditResult<()> {
        for (metric, value) in self.iter() {
            if !value.is_finite() || value < 0.0 {
                return Err(AuditError::InvalidThreshold { metric, value });
            }
        }
        Ok(())
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Lcp => Some(self.lcp),
            Metric::Cls => Some(self.cls),
            Metric::Inp => self.inp,
        }
    }

    /// Configured thresholds in `LCP`, `CLS`, `INP` order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|metric| self.get(metric).map(|value| (metric, value)))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
/// Measured values for a single audit run.
pub struct ResultSet {
    #[serde(rename = "LCP")]
    pub lcp: f64,
    #[serde(rename = "CLS")]
    pub cls: f64,
    #[serde(rename = "INP")]
    pub inp: f64,
}

impl ResultSet {
    /// Extracts the measurements from a raw Lighthouse report.
    ///
    /// Absent or non-numeric audits measure as `0`. The report itself must be
    /// an object with an `audits` object.
    pub fn from_report(report: &Value) -> AuditResult<Self> {
        let root = report.as_object().ok_or_else(|| {
            AuditError::MalformedReport("report root must be a JSON object".to_string())
        })?;
        let audits = root
            .get("audits")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                AuditError::MalformedReport("report is missing the 'audits' object".to_string())
            })?;

        let measure = |metric: Metric| {
            audits
                .get(metric.audit_id())
                .and_then(|audit| audit.get("numericValue"))
                .and_then(Value::as_f64)
                .filter(|raw| raw.is_finite())
                .map(|raw| metric.scale_raw(raw))
                .unwrap_or(0.0)
        };

        Ok(Self {
            lcp: measure(Metric::Lcp),
            cls: measure(Metric::Cls),
            inp: measure(Metric::Inp),
        })
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Lcp => self.lcp,
            Metric::Cls => self.cls,
            Metric::Inp => self.inp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricCheck {
    pub metric: Metric,
    pub measured: f64,
    pub threshold: f64,
    pub passed: bool,
}

impl MetricCheck {
    pub fn evaluate(metric: Metric, measured: f64, threshold: f64) -> Self {
        Self {
            metric,
            measured,
            threshold,
            passed: measured <= threshold,
        }
    }
}

impl fmt::Display for MetricCheck {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            write!(
                formatter,
                "{} passed: {} <= {}",
                self.metric, self.measured, self.threshold
            )
        } else {
            write!(
                formatter,
                "{} failed: {} > {}",
                self.metric, self.measured, self.threshold
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditOutcome {
    pub url: String,
    pub results: ResultSet,
    pub checks: Vec<MetricCheck>,
}

impl AuditOutcome {
    pub fn evaluate(url: impl Into<String>, results: ResultSet, thresholds: &ThresholdSet) -> Self {
        let checks = thresholds
            .iter()
            .map(|(metric, threshold)| {
                MetricCheck::evaluate(metric, results.get(metric), threshold)
            })
            .collect();
        Self {
            url: url.into(),
            results,
            checks,
        }
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn failed_metrics(&self) -> Vec<Metric> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.metric)
            .collect()
    }
}
