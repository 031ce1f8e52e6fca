//! Run step executor
//!
//! Launches an external program directly (never through a shell) and streams
//! its standard output to the observer line by line.

use crate::error::{FlowrunError, Result};
use crate::executors::{ExecParams, StepExecutor};
use crate::models::TOOL_SIGIL;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Executor for `run:` steps
#[derive(Debug, Clone)]
pub struct RunExecutor {
    args: Vec<String>,
}

impl RunExecutor {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    /// Resolve the program, substituting `$name` through the toolbox
    fn resolve_program(&self, params: &ExecParams<'_>) -> Result<String> {
        let first = self.args.first().ok_or(FlowrunError::NoArguments)?;

        match first.strip_prefix(TOOL_SIGIL) {
            Some(name) => params
                .toolbox
                .resolve(name)
                .map(|info| info.path.clone())
                .ok_or_else(|| FlowrunError::ToolSubstitution {
                    name: name.to_string(),
                }),
            None => Ok(first.clone()),
        }
    }
}

#[async_trait]
impl StepExecutor for RunExecutor {
    async fn execute(&self, params: &mut ExecParams<'_>) -> Result<()> {
        let program = self.resolve_program(params)?;

        info!("Executing program: {}", program);
        debug!("Program args: {:?}", &self.args[1..]);

        // Individual args, no shell interpolation
        let mut cmd = Command::new(&program);
        cmd.args(&self.args[1..])
            .env_clear()
            .envs(params.env.iter().map(|(k, v)| (k, v)))
            .current_dir(params.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // A timed-out child must not outlive its step
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to launch '{}': {}", program, source);
            FlowrunError::Spawn {
                program: program.clone(),
                source,
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FlowrunError::Other("child stdout was not captured".to_string()))?;
        let observer = &mut *params.observer;

        let run = async {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            // Blank lines are held back so trailing ones can be dropped
            let mut pending_blank = 0usize;
            let mut emitted = false;

            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).await? == 0 {
                    // Output made only of line breaks still counts as one empty line
                    if pending_blank > 0 && !emitted {
                        observer.step_output("");
                    }
                    break;
                }

                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches('\n').trim_end_matches('\r');
                if line.is_empty() {
                    pending_blank += 1;
                    continue;
                }

                for _ in 0..pending_blank {
                    observer.step_output("");
                }
                pending_blank = 0;
                emitted = true;
                observer.step_output(line);
            }

            Ok::<_, FlowrunError>(child.wait().await?)
        };

        let outcome = match params.step_timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let status = match outcome {
            Some(result) => result?,
            None => {
                let timeout = params.step_timeout.unwrap_or_default().as_secs();
                error!("Program '{}' timed out after {} seconds", program, timeout);
                let _ = child.kill().await;
                return Err(FlowrunError::StepTimeout { program, timeout });
            }
        };

        info!(
            "Program '{}' exited with code {:?}",
            program,
            status.code()
        );

        if status.success() {
            Ok(())
        } else {
            Err(FlowrunError::ExitStatus { program, status })
        }
    }
}
