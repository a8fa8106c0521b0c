use crate::app::ports::ParserPort;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the external demo parser as `<program> <args..> <source_dir> <dest_dir>`.
///
/// The exit status is the only success signal. A run that exceeds `timeout`
/// is killed (the child is spawned with `kill_on_drop`) and reported as failed.
pub struct ProcessParser {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessParser {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl ParserPort for ProcessParser {
    async fn parse(&self, source_dir: &Path, dest_dir: &Path) -> Result<String, String> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| format!("failed to create {}: {}", dest_dir.display(), e))?;

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(source_dir)
            .arg(dest_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start parser {}: {}", self.program.display(), e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("parser wait failed: {e}")),
            Err(_) => {
                warn!(source = %source_dir.display(), "parser timed out, killed");
                return Err(format!("parser timed out after {}s", self.timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            debug!(source = %source_dir.display(), "parser finished");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(format!("parser exited with {}: {}", output.status, stderr))
        }
    }
}
