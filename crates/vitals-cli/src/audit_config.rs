use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use vitals_audit::{parse_target_url, AuditPolicy, EngineConfig, ThresholdSet};

use crate::cli_args::RunArgs;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
/// On-disk `vitals.toml` layout. Every section is optional.
pub(crate) struct AuditFileConfig {
    pub url: Option<String>,
    pub thresholds: Option<ThresholdSet>,
    pub engine: EngineConfig,
    pub timeouts: AuditPolicy,
}

#[derive(Debug, Clone, PartialEq)]
/// Config after merging the file, environment and command-line flags.
pub(crate) struct ResolvedAuditConfig {
    pub url: String,
    pub thresholds: ThresholdSet,
    pub engine: EngineConfig,
    pub policy: AuditPolicy,
}

pub(crate) fn parse_audit_file_config(raw: &str) -> Result<AuditFileConfig> {
    toml::from_str::<AuditFileConfig>(raw).context("failed to parse audit config")
}

pub(crate) fn load_audit_file_config(path: &Path) -> Result<AuditFileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_audit_file_config(&raw).with_context(|| format!("invalid config {}", path.display()))
}

pub(crate) fn resolve_audit_config(
    file: AuditFileConfig,
    args: &RunArgs,
) -> Result<ResolvedAuditConfig> {
    let url = args
        .url
        .clone()
        .or(file.url)
        .filter(|url| !url.trim().is_empty())
        .context("a target url is required (--url, VITALS_URL or `url` in the config file)")?;
    parse_target_url(&url)?;

    let mut thresholds = file.thresholds.unwrap_or_default();
    if let Some(lcp) = args.lcp {
        thresholds.lcp = lcp;
    }
    if let Some(cls) = args.cls {
        thresholds.cls = cls;
    }
    if args.inp.is_some() {
        thresholds.inp = args.inp;
    }
    thresholds.validate()?;

    let mut engine = file.engine;
    if let Some(chrome) = &args.chrome {
        engine.chrome_executable = chrome.clone();
    }
    engine.chrome_flags.extend(args.chrome_flags.iter().cloned());
    if let Some(lighthouse) = &args.lighthouse {
        engine.lighthouse_executable = lighthouse.clone();
    }
    engine
        .lighthouse_args
        .extend(args.lighthouse_args.iter().cloned());

    let mut policy = file.timeouts;
    if let Some(launch_timeout_ms) = args.launch_timeout_ms {
        policy.launch_timeout_ms = launch_timeout_ms;
    }
    if let Some(audit_timeout_ms) = args.audit_timeout_ms {
        policy.audit_timeout_ms = audit_timeout_ms;
    }
    policy.validate()?;

    Ok(ResolvedAuditConfig {
        url: url.trim().to_string(),
        thresholds,
        engine,
        policy,
    })
}

#[cfg(test)]
mod tests {
    use vitals_audit::{AuditPolicy, EngineConfig, ThresholdSet};

    use super::{parse_audit_file_config, resolve_audit_config, AuditFileConfig};
    use crate::cli_args::RunArgs;

    const SAMPLE_CONFIG: &str = r#"
url = "https://example.com/"

[thresholds]
LCP = 2.0
CLS = 0.05
INP = 0.2

[engine]
chrome_executable = "/usr/bin/chromium"
chrome_flags = ["--no-sandbox"]

[timeouts]
audit_timeout_ms = 90000
"#;

    #[test]
    fn unit_file_config_parses_sections_and_keeps_defaults() {
        let config = parse_audit_file_config(SAMPLE_CONFIG).expect("config");
        assert_eq!(config.url.as_deref(), Some("https://example.com/"));
        assert_eq!(
            config.thresholds,
            Some(ThresholdSet {
                lcp: 2.0,
                cls: 0.05,
                inp: Some(0.2)
            })
        );
        assert_eq!(config.engine.chrome_executable, "/usr/bin/chromium");
        assert_eq!(config.engine.lighthouse_executable, "lighthouse");
        assert_eq!(config.timeouts.audit_timeout_ms, 90_000);
        assert_eq!(
            config.timeouts.launch_timeout_ms,
            AuditPolicy::default().launch_timeout_ms
        );
    }

    #[test]
    fn unit_file_config_rejects_unknown_keys() {
        let error = parse_audit_file_config("url = \"https://example.com/\"\nretries = 3\n")
            .expect_err("unknown key");
        assert!(format!("{error:#}").contains("retries"));
    }

    #[test]
    fn functional_flags_override_file_values() {
        let file = parse_audit_file_config(SAMPLE_CONFIG).expect("config");
        let args = RunArgs {
            url: Some("http://localhost:3000/".to_string()),
            lcp: Some(3.0),
            chrome_flags: vec!["--mute-audio".to_string()],
            lighthouse: Some("/opt/lighthouse".to_string()),
            launch_timeout_ms: Some(5_000),
            ..RunArgs::default()
        };

        let resolved = resolve_audit_config(file, &args).expect("resolve");
        assert_eq!(resolved.url, "http://localhost:3000/");
        assert_eq!(resolved.thresholds.lcp, 3.0);
        assert_eq!(resolved.thresholds.cls, 0.05);
        assert_eq!(resolved.thresholds.inp, Some(0.2));
        assert_eq!(resolved.engine.chrome_flags, vec!["--no-sandbox", "--mute-audio"]);
        assert_eq!(resolved.engine.lighthouse_executable, "/opt/lighthouse");
        assert_eq!(resolved.policy.launch_timeout_ms, 5_000);
        assert_eq!(resolved.policy.audit_timeout_ms, 90_000);
    }

    #[test]
    fn functional_defaults_apply_without_config_file() {
        let args = RunArgs {
            url: Some("https://example.com/".to_string()),
            ..RunArgs::default()
        };
        let resolved = resolve_audit_config(AuditFileConfig::default(), &args).expect("resolve");
        assert_eq!(resolved.thresholds, ThresholdSet::default());
        assert_eq!(resolved.engine, EngineConfig::default());
        assert_eq!(resolved.policy, AuditPolicy::default());
    }

    #[test]
    fn regression_missing_or_invalid_url_is_rejected() {
        let error = resolve_audit_config(AuditFileConfig::default(), &RunArgs::default())
            .expect_err("missing url");
        assert!(error.to_string().contains("a target url is required"));

        let args = RunArgs {
            url: Some("not a url".to_string()),
            ..RunArgs::default()
        };
        let error =
            resolve_audit_config(AuditFileConfig::default(), &args).expect_err("invalid url");
        assert!(error.to_string().contains("invalid target url"));
    }

    #[test]
    fn regression_invalid_file_thresholds_are_rejected_after_merge() {
        let file = parse_audit_file_config(
            "url = \"https://example.com/\"\n[thresholds]\nLCP = -2.5\nCLS = 0.1\n",
        )
        .expect("config");
        let error = resolve_audit_config(file, &RunArgs::default()).expect_err("negative lcp");
        assert!(error.to_string().contains("invalid threshold for LCP"));
    }
}
