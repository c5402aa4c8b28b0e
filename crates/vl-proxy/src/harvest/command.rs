//! The external cover generator.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use vl_core::config::HarvestConfig;
use vl_core::{Error, Result};

/// Produces `<images_dir>/<name>.png` from the harvested samples of a library.
#[async_trait]
pub trait CoverRenderer: Send + Sync {
    async fn render(&self, library_name: &str) -> Result<()>;
}

/// Runs the configured command with the library name appended.
///
/// Output goes straight to the proxy's own stdout/stderr; the exit status is
/// the only signal read back.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let (program, args) = config
            .cover_command
            .split_first()
            .ok_or_else(|| Error::Configuration("harvest.cover_command is empty".into()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: config.cover_workdir.clone(),
            timeout: Duration::from_secs(config.cover_timeout_secs),
        })
    }
}

#[async_trait]
impl CoverRenderer for CommandRenderer {
    async fn render(&self, library_name: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(library_name)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(ref dir) = self.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(library = %library_name, program = %self.program, "Running cover generator");

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::harvest("cover", format!("failed to spawn {}: {e}", self.program)))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(Error::harvest("cover", format!("wait failed: {e}"))),
            Err(_) => {
                return Err(Error::harvest(
                    "cover",
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            }
        };

        if !status.success() {
            return Err(Error::harvest("cover", format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}
