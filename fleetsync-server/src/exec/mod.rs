//! Command execution capabilities.
//!
//! The sync engine never talks to SSH or spawns processes itself. It goes
//! through [`RemoteExec`] (a command on a fleet host) and [`LocalExec`] (a
//! subprocess on the controller), both shaped `(target, command, timeout) ->
//! (exit code, stdout, stderr)`. Expired timeouts come back as exit code
//! [`TIMEOUT_EXIT`], never as a pending operation.

pub mod local;
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use local::LocalRunner;
pub use ssh::SshRunner;

/// Exit code reported when a command outlives its timeout.
pub const TIMEOUT_EXIT: i32 = 124;

/// Exit code reported when the program cannot be found.
pub const NOT_FOUND_EXIT: i32 = 127;

/// A fleet host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Display name, unique in the fleet
    pub name: String,

    /// `user@hostname` as given to ssh and rsync
    pub ssh_host: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl Host {
    /// Split `ssh_host` into user (default `root`) and hostname.
    pub fn user_and_hostname(&self) -> (&str, &str) {
        match self.ssh_host.split_once('@') {
            Some((user, hostname)) => (user, hostname),
            None => ("root", self.ssh_host.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(what: &str, timeout: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT,
            stdout: String::new(),
            stderr: format!("{what} timeout after {}s", timeout.as_secs()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("ssh channel error on {host}: {message}")]
    Channel { host: String, message: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty command line")]
    EmptyCommand,

    #[error("execution task failed: {0}")]
    Join(String),
}

/// Runs a shell command on a fleet host.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Runs a program on the controller. `argv[0]` is the program.
#[async_trait]
pub trait LocalExec: Send + Sync {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ExecError>;
}

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./,:@%+=".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Join arguments into one shell command line.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
