use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err("value must be a finite number greater than or equal to 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "vitals",
    about = "Headless Core Web Vitals threshold audits for CI",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: VitalsCommand,
}

#[derive(Debug, Subcommand)]
pub enum VitalsCommand {
    /// Audit a URL in a headless browser and check LCP, CLS and INP thresholds.
    Run(RunArgs),
    /// Replay a JSON audit contract fixture without launching a browser.
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[arg(
        long,
        env = "VITALS_CONFIG",
        help = "Optional TOML config file providing url, [thresholds], [engine] and [timeouts]"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "VITALS_URL",
        help = "Absolute http(s) or file URL to audit; overrides the config file"
    )]
    pub url: Option<String>,

    #[arg(
        long,
        value_parser = parse_threshold,
        help = "Maximum largest contentful paint in seconds (default 2.5)"
    )]
    pub lcp: Option<f64>,

    #[arg(
        long,
        value_parser = parse_threshold,
        help = "Maximum cumulative layout shift score (default 0.1)"
    )]
    pub cls: Option<f64>,

    #[arg(
        long,
        value_parser = parse_threshold,
        help = "Maximum interaction to next paint in seconds; unchecked when unset"
    )]
    pub inp: Option<f64>,

    #[arg(
        long = "chrome",
        env = "VITALS_CHROME",
        help = "Chrome/Chromium executable used for the headless session"
    )]
    pub chrome: Option<String>,

    #[arg(
        long = "chrome-flag",
        allow_hyphen_values = true,
        help = "Extra browser flag; repeat for multiple flags (e.g. --chrome-flag=--no-sandbox)"
    )]
    pub chrome_flags: Vec<String>,

    #[arg(
        long = "lighthouse",
        env = "VITALS_LIGHTHOUSE",
        help = "Lighthouse CLI executable"
    )]
    pub lighthouse: Option<String>,

    #[arg(
        long = "lighthouse-arg",
        allow_hyphen_values = true,
        help = "Extra lighthouse argument; repeat for multiple arguments"
    )]
    pub lighthouse_args: Vec<String>,

    #[arg(
        long = "launch-timeout-ms",
        value_parser = parse_positive_u64,
        help = "Maximum time to wait for the browser debugging port (default 30000)"
    )]
    pub launch_timeout_ms: Option<u64>,

    #[arg(
        long = "audit-timeout-ms",
        value_parser = parse_positive_u64,
        help = "Maximum time for the lighthouse audit pass (default 120000)"
    )]
    pub audit_timeout_ms: Option<u64>,

    #[arg(
        long = "summary-json-out",
        help = "Write the audit outcome as JSON to this path"
    )]
    pub summary_json_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ReplayArgs {
    #[arg(long, help = "Audit contract fixture (JSON) to replay")]
    pub fixture: PathBuf,

    #[arg(
        long = "summary-json-out",
        help = "Write the replay summary as JSON to this path"
    )]
    pub summary_json_out: Option<PathBuf>,
}
