use super::{CommandOutput, ExecError, LocalExec, NOT_FOUND_EXIT};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

/// Local subprocess execution. The child is killed when its timeout expires.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

#[async_trait]
impl LocalExec for LocalRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CommandOutput {
                    exit_code: NOT_FOUND_EXIT,
                    stdout: String::new(),
                    stderr: format!("{program} not found"),
                });
            }
            Err(source) => {
                return Err(ExecError::Spawn {
                    program: program.clone(),
                    source,
                })
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(source)) => Err(ExecError::Spawn {
                program: program.clone(),
                source,
            }),
            Err(_) => {
                tracing::warn!(%program, timeout_secs = timeout.as_secs(), "command timed out");
                Ok(CommandOutput::timed_out("command", timeout))
            }
        }
    }
}
