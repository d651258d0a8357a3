//! Web-performance threshold audits for Vitals.
//!
//! Drives a headless browser session through a [`RenderingEngine`], extracts
//! Core Web Vitals from the raw report and checks them against a
//! [`ThresholdSet`]. Includes fixture-driven contract replay used by CI.

pub mod audit_contract;
pub mod audit_engine;
pub mod audit_error;
pub mod audit_runner;
pub mod audit_types;

pub use audit_engine::{ChromeLighthouseEngine, ChromeSession, EngineConfig, RenderingEngine};
pub use audit_error::{AuditError, AuditResult};
pub use audit_runner::{parse_target_url, AuditPolicy, AuditRunner};
pub use audit_types::{AuditOutcome, Metric, MetricCheck, ResultSet, ThresholdSet};
