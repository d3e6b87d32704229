use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use regex::{RegexSet, RegexSetBuilder};
use tokio::process::Command;
use tracing::debug;

use crate::config::SlicerConfig;
use crate::error::ConfigError;
use crate::report;

use super::{SliceError, SliceOutput, Slicer};

/// Runs the slicing engine as a child process.
pub struct CommandSlicer {
    binary: String,
    launcher: Option<String>,
    profile: String,
    output_directory: Option<PathBuf>,
    threads: u32,
    extra_args: Vec<String>,
    timeout: Duration,
    permanent_patterns: RegexSet,
}

impl CommandSlicer {
    pub fn from_config(config: &SlicerConfig) -> Result<Self, ConfigError> {
        let permanent_patterns = RegexSetBuilder::new(&config.permanent_failure_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: config.permanent_failure_patterns.join(" | "),
                reason: e.to_string(),
            })?;

        Ok(Self {
            binary: config.binary.clone(),
            launcher: config.launcher.clone(),
            profile: config.profile.clone(),
            output_directory: config.output_directory.as_ref().map(PathBuf::from),
            threads: config.threads,
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
            permanent_patterns,
        })
    }

    fn command(&self, geometry: &Path) -> Command {
        let mut cmd = match &self.launcher {
            Some(launcher) => {
                let mut cmd = Command::new(launcher);
                cmd.arg(&self.binary);
                cmd
            }
            None => Command::new(&self.binary),
        };

        cmd.arg("-g")
            .arg(geometry)
            .arg("--load")
            .arg(&self.profile)
            .arg("--threads")
            .arg(self.threads.to_string());

        if let Some(dir) = &self.output_directory {
            let stem = geometry
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("model");
            cmd.arg("--output").arg(dir.join(format!("{}.gcode", stem)));
        }

        cmd.args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a timeout also reaches whatever a launcher script
        // started without exec.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn invoke(&self, geometry: &Path) -> Result<Output, SliceError> {
        let child = self.command(geometry).spawn().map_err(|e| {
            SliceError::EngineInvocationFailed(format!("cannot start '{}': {}", self.binary, e))
        })?;

        let pid = child.id();

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(SliceError::EngineInvocationFailed(format!(
                "failed waiting for engine: {}",
                e
            ))),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                Err(SliceError::TimedOut {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    fn missing_export(&self, stdout: &str, stderr: &str) -> SliceError {
        let permanent =
            self.permanent_patterns.is_match(stdout) || self.permanent_patterns.is_match(stderr);
        let detail = last_line(stderr)
            .or_else(|| last_line(stdout))
            .unwrap_or("no export line in engine output")
            .to_string();
        SliceError::OutputNotFound { permanent, detail }
    }
}

impl Slicer for CommandSlicer {
    fn slice(&self, geometry: &Path) -> Result<SliceOutput, SliceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                SliceError::EngineInvocationFailed(format!("cannot start process runtime: {}", e))
            })?;
        let output = runtime.block_on(self.invoke(geometry))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!(status = %output.status, stdout_len = stdout.len(), "engine exited");

        if stdout.trim().is_empty() {
            return Err(SliceError::EngineInvocationFailed(format!(
                "engine exited with {} and printed nothing{}",
                output.status,
                last_line(&stderr)
                    .map(|l| format!(": {}", l))
                    .unwrap_or_default()
            )));
        }

        let Some(exported) = report::export_path(&stdout) else {
            return Err(self.missing_export(&stdout, &stderr));
        };
        let gcode_path = PathBuf::from(exported);

        let comments = read_comment_lines(&gcode_path).map_err(|e| {
            SliceError::EngineInvocationFailed(format!(
                "cannot read exported G-code '{}': {}",
                gcode_path.display(),
                e
            ))
        })?;

        let mut report = stdout;
        report.push('\n');
        report.push_str(&comments);

        Ok(SliceOutput {
            gcode_path,
            report,
            stderr,
        })
    }
}

/// The engine writes its statistics as `;` comments in the G-code.
fn read_comment_lines(path: &Path) -> std::io::Result<String> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut comments = String::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim_start().starts_with(';') {
            comments.push_str(&line);
            comments.push('\n');
        }
    }
    Ok(comments)
}

/// SIGKILLs the group led by the engine's direct child.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes plain integers and only sends a signal.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "engine process group already gone"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|l| !l.is_empty())
}
