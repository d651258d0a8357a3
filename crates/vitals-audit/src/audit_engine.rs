use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use url::Url;

use crate::audit_error::{AuditError, AuditResult};

const CHROME_LIGHTHOUSE_ENGINE: &str = "chrome-lighthouse";
const DEVTOOLS_ACTIVE_PORT_FILE: &str = "DevToolsActivePort";
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const BASE_CHROME_FLAGS: [&str; 5] = [
    "--headless=new",
    "--remote-debugging-port=0",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-gpu",
];
const BASE_LIGHTHOUSE_ARGS: [&str; 4] = [
    "--output=json",
    "--output-path=stdout",
    "--quiet",
    "--only-categories=performance",
];

/// Capability interface over a headless rendering/measurement engine.
///
/// `terminate` consumes the session, so a launched session can be released
/// at most once.
#[async_trait]
pub trait RenderingEngine: Send + Sync {
    type Session: Send + Sync;

    fn engine_name(&self) -> &'static str;

    async fn launch(&self) -> AuditResult<Self::Session>;

    fn control_port(&self, session: &Self::Session) -> u16;

    async fn audit(&self, session: &Self::Session, url: &Url) -> AuditResult<Value>;

    async fn terminate(&self, session: Self::Session) -> AuditResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub chrome_executable: String,
    pub chrome_flags: Vec<String>,
    pub lighthouse_executable: String,
    pub lighthouse_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chrome_executable: "google-chrome".to_string(),
            chrome_flags: Vec::new(),
            lighthouse_executable: "lighthouse".to_string(),
            lighthouse_args: Vec::new(),
        }
    }
}

#[derive(Debug)]
/// A running headless browser owned by one audit invocation.
pub struct ChromeSession {
    child: Child,
    port: u16,
    profile_dir: TempDir,
}

impl ChromeSession {
    pub fn profile_dir(&self) -> &Path {
        self.profile_dir.path()
    }
}

#[derive(Debug, Clone)]
/// Launches Chrome with an ephemeral debugging port and audits through the
/// `lighthouse` CLI attached to that port.
pub struct ChromeLighthouseEngine {
    config: EngineConfig,
}

impl ChromeLighthouseEngine {
    pub fn new(config: EngineConfig) -> AuditResult<Self> {
        if config.chrome_executable.trim().is_empty() {
            return Err(AuditError::InvalidConfig(
                "chrome executable cannot be empty".to_string(),
            ));
        }
        if config.lighthouse_executable.trim().is_empty() {
            return Err(AuditError::InvalidConfig(
                "lighthouse executable cannot be empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn wait_for_devtools_port(
        &self,
        child: &mut Child,
        profile_dir: &Path,
    ) -> AuditResult<u16> {
        let port_file = profile_dir.join(DEVTOOLS_ACTIVE_PORT_FILE);
        loop {
            if let Some(port) = read_devtools_port(&port_file).await {
                return Ok(port);
            }
            let exited = child.try_wait().map_err(|error| {
                AuditError::launch(
                    CHROME_LIGHTHOUSE_ENGINE,
                    format!("failed to poll browser process: {error}"),
                )
            })?;
            if let Some(status) = exited {
                return Err(AuditError::launch(
                    CHROME_LIGHTHOUSE_ENGINE,
                    format!("browser exited with {status} before exposing a debugging port"),
                ));
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RenderingEngine for ChromeLighthouseEngine {
    type Session = ChromeSession;

    fn engine_name(&self) -> &'static str {
        CHROME_LIGHTHOUSE_ENGINE
    }

    async fn launch(&self) -> AuditResult<ChromeSession> {
        let profile_dir = tempfile::Builder::new()
            .prefix("vitals-chrome-")
            .tempdir()
            .map_err(|error| {
                AuditError::launch(
                    CHROME_LIGHTHOUSE_ENGINE,
                    format!("failed to create browser profile directory: {error}"),
                )
            })?;

        let executable = self.config.chrome_executable.trim();
        let mut command = Command::new(executable);
        command.kill_on_drop(true);
        command.args(BASE_CHROME_FLAGS);
        command.arg(format!("--user-data-dir={}", profile_dir.path().display()));
        command.args(&self.config.chrome_flags);
        command.arg("about:blank");
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
        let mut child = spawn_with_text_file_busy_retry(&mut command)
            .await
            .map_err(|error| {
                AuditError::launch(
                    CHROME_LIGHTHOUSE_ENGINE,
                    format!("failed to spawn browser '{executable}': {error}"),
                )
            })?;

        match self.wait_for_devtools_port(&mut child, profile_dir.path()).await {
            Ok(port) => {
                tracing::debug!(
                    port,
                    profile_dir = %profile_dir.path().display(),
                    "headless browser ready"
                );
                Ok(ChromeSession {
                    child,
                    port,
                    profile_dir,
                })
            }
            Err(error) => {
                let _ = child.kill().await;
                Err(error)
            }
        }
    }

    fn control_port(&self, session: &ChromeSession) -> u16 {
        session.port
    }

    async fn audit(&self, session: &ChromeSession, url: &Url) -> AuditResult<Value> {
        let executable = self.config.lighthouse_executable.trim();
        let mut command = Command::new(executable);
        command.kill_on_drop(true);
        command.arg(url.as_str());
        command.arg(format!("--port={}", session.port));
        command.args(BASE_LIGHTHOUSE_ARGS);
        command.args(&self.config.lighthouse_args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        let child = spawn_with_text_file_busy_retry(&mut command)
            .await
            .map_err(|error| {
                AuditError::Audit(format!("failed to spawn lighthouse '{executable}': {error}"))
            })?;
        tracing::debug!(url = %url, port = session.port, "lighthouse audit started");

        let output = child.wait_with_output().await.map_err(|error| {
            AuditError::Audit(format!("lighthouse process failed: {error}"))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output
                .status
                .code()
                .map(|value| value.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AuditError::Audit(format!(
                "lighthouse failed with status {status}: {}",
                summarize_process_failure(&stderr, &stdout)
            )));
        }

        serde_json::from_str::<Value>(stdout.trim()).map_err(|error| {
            AuditError::MalformedReport(format!(
                "lighthouse output is not valid JSON ({error}): {}",
                truncate_for_log(stdout.trim())
            ))
        })
    }

    async fn terminate(&self, mut session: ChromeSession) -> AuditResult<()> {
        let still_running = matches!(session.child.try_wait(), Ok(None));
        if still_running {
            session.child.kill().await.map_err(|error| {
                AuditError::Audit(format!("failed to stop headless browser: {error}"))
            })?;
        }
        let profile_dir = session.profile_dir.path().to_path_buf();
        session.profile_dir.close().map_err(|error| {
            AuditError::Audit(format!(
                "failed to remove browser profile {}: {error}",
                profile_dir.display()
            ))
        })?;
        tracing::debug!(port = session.port, "headless browser terminated");
        Ok(())
    }
}

async fn read_devtools_port(path: &Path) -> Option<u16> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    raw.lines()
        .next()?
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
}

async fn spawn_with_text_file_busy_retry(command: &mut Command) -> std::io::Result<Child> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error)
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES =>
            {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

fn summarize_process_failure(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return truncate_for_log(stderr);
    }

    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return truncate_for_log(stdout);
    }

    "no error output".to_string()
}

fn truncate_for_log(text: &str) -> String {
    const MAX_CHARS: usize = 240;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(MAX_CHARS).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    #[cfg(unix)]
    use std::path::PathBuf;

    use tempfile::tempdir;

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let script = dir.join(name);
        let content = format!("#!/bin/sh\nset -eu\n{body}\n");
        std::fs::write(&script, content).expect("write script");
        let mut perms = std::fs::metadata(&script)
            .expect("script metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod script");
        script
    }

    #[cfg(unix)]
    const MOCK_CHROME: &str = r#"
profile=""
for arg in "$@"; do
  case "$arg" in
    --user-data-dir=*) profile="${arg#--user-data-dir=}";;
  esac
done
if [ -z "$profile" ]; then
  echo "missing --user-data-dir" >&2
  exit 4
fi
printf '9333\n/devtools/browser/mock\n' > "$profile/DevToolsActivePort"
exec sleep 30
"#;

    #[cfg(unix)]
    fn engine_with(dir: &Path, chrome_body: &str, lighthouse_body: &str) -> ChromeLighthouseEngine {
        let chrome = write_script(dir, "mock-chrome.sh", chrome_body);
        let lighthouse = write_script(dir, "mock-lighthouse.sh", lighthouse_body);
        ChromeLighthouseEngine::new(EngineConfig {
            chrome_executable: chrome.display().to_string(),
            chrome_flags: vec!["--mute-audio".to_string()],
            lighthouse_executable: lighthouse.display().to_string(),
            lighthouse_args: Vec::new(),
        })
        .expect("engine")
    }

    fn target() -> Url {
        Url::parse("https://example.com/").expect("url")
    }

    #[test]
    fn unit_engine_rejects_empty_executables() {
        let error = ChromeLighthouseEngine::new(EngineConfig {
            chrome_executable: "  ".to_string(),
            ..EngineConfig::default()
        })
        .expect_err("empty chrome");
        assert!(error.to_string().contains("chrome executable cannot be empty"));

        let error = ChromeLighthouseEngine::new(EngineConfig {
            lighthouse_executable: String::new(),
            ..EngineConfig::default()
        })
        .expect_err("empty lighthouse");
        assert!(error.to_string().contains("lighthouse executable cannot be empty"));
    }

    #[test]
    fn unit_truncate_for_log_caps_long_output() {
        let long = "x".repeat(500);
        let truncated = truncate_for_log(&long);
        assert_eq!(truncated.chars().count(), 243);
        assert!(truncated.ends_with("..."));
        assert_eq!(summarize_process_failure("  ", "  "), "no error output");
        assert_eq!(summarize_process_failure("", "stdout detail"), "stdout detail");
    }

    #[tokio::test]
    async fn unit_devtools_port_file_requires_non_zero_first_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(DEVTOOLS_ACTIVE_PORT_FILE);
        assert_eq!(read_devtools_port(&path).await, None);
        std::fs::write(&path, "0\n/devtools/browser/x\n").expect("write");
        assert_eq!(read_devtools_port(&path).await, None);
        std::fs::write(&path, "garbage").expect("write");
        assert_eq!(read_devtools_port(&path).await, None);
        std::fs::write(&path, "41234\n/devtools/browser/x\n").expect("write");
        assert_eq!(read_devtools_port(&path).await, Some(41234));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn integration_engine_launches_audits_and_terminates_browser() {
        let dir = tempdir().expect("tempdir");
        let engine = engine_with(
            dir.path(),
            MOCK_CHROME,
            r#"
case " $* " in
  *" --port=9333 "*) ;;
  *) echo "expected --port=9333" >&2; exit 3;;
esac
case "$1" in
  https://example.com/) ;;
  *) echo "unexpected url $1" >&2; exit 5;;
esac
printf '{"audits":{"largest-contentful-paint":{"numericValue":1800}}}'
"#,
        );

        let session = engine.launch().await.expect("launch");
        assert_eq!(engine.control_port(&session), 9333);
        let profile_dir = session.profile_dir().to_path_buf();
        assert!(profile_dir.join(DEVTOOLS_ACTIVE_PORT_FILE).exists());

        let report = engine.audit(&session, &target()).await.expect("audit");
        assert_eq!(
            report["audits"]["largest-contentful-paint"]["numericValue"],
            serde_json::json!(1800)
        );

        engine.terminate(session).await.expect("terminate");
        assert!(!profile_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_browser_exiting_early_fails_launch() {
        let dir = tempdir().expect("tempdir");
        let engine = engine_with(
            dir.path(),
            "echo 'no display' >&2\nexit 1",
            "exit 0",
        );
        let error = engine.launch().await.expect_err("launch should fail");
        assert_eq!(error.kind(), "launch");
        assert!(error.to_string().contains("before exposing a debugging port"));
    }

    #[tokio::test]
    async fn regression_missing_browser_executable_fails_launch() {
        let engine = ChromeLighthouseEngine::new(EngineConfig {
            chrome_executable: "/nonexistent/vitals/chrome".to_string(),
            ..EngineConfig::default()
        })
        .expect("engine");
        let error = engine.launch().await.expect_err("launch should fail");
        assert_eq!(error.kind(), "launch");
        assert!(error.to_string().contains("failed to spawn browser"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_lighthouse_failure_surfaces_stderr_summary() {
        let dir = tempdir().expect("tempdir");
        let engine = engine_with(
            dir.path(),
            MOCK_CHROME,
            "echo 'Unable to reach https://example.com/' >&2\nexit 1",
        );
        let session = engine.launch().await.expect("launch");
        let error = engine
            .audit(&session, &target())
            .await
            .expect_err("audit should fail");
        engine.terminate(session).await.expect("terminate");

        assert_eq!(error.kind(), "audit");
        assert!(error.to_string().contains("Unable to reach"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_non_json_lighthouse_output_is_malformed_report() {
        let dir = tempdir().expect("tempdir");
        let engine = engine_with(dir.path(), MOCK_CHROME, "printf '<html>report</html>'");
        let session = engine.launch().await.expect("launch");
        let error = engine
            .audit(&session, &target())
            .await
            .expect_err("audit should fail");
        engine.terminate(session).await.expect("terminate");

        assert_eq!(error.kind(), "malformed_report");
    }
}
