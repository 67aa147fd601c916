use super::{shell_quote, CommandOutput, ExecError, Host, RemoteExec};
use async_trait::async_trait;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// libssh2's LIBSSH2_ERROR_TIMEOUT.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Remote command execution over libssh2.
///
/// Authenticates with the configured private key, or through ssh-agent when
/// no key is configured.
#[derive(Debug, Clone)]
pub struct SshRunner {
    key_path: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshRunner {
    pub fn new(key_path: Option<PathBuf>) -> Self {
        Self {
            key_path,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Open an authenticated session to `host`.
    pub fn open_session(&self, host: &Host) -> Result<ssh2::Session, ExecError> {
        let (user, hostname) = host.user_and_hostname();
        let connect_err = |message: String| ExecError::Connect {
            host: host.ssh_host.clone(),
            message,
        };

        let addr = (hostname, host.ssh_port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("no address resolved".into()))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut sess = ssh2::Session::new().map_err(|e| connect_err(e.to_string()))?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(self.connect_timeout.as_millis() as u32);
        sess.handshake().map_err(|e| connect_err(e.to_string()))?;

        match &self.key_path {
            Some(key) => sess
                .userauth_pubkey_file(user, None, key, None)
                .map_err(|e| connect_err(format!("SSH authentication failed: {e}")))?,
            None => sess
                .userauth_agent(user)
                .map_err(|e| connect_err(format!("SSH agent authentication failed: {e}")))?,
        }
        if !sess.authenticated() {
            return Err(connect_err("SSH authentication failed".into()));
        }

        Ok(sess)
    }

    fn run_blocking(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let sess = self.open_session(host)?;
        sess.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);

        let channel_err = |message: String| ExecError::Channel {
            host: host.ssh_host.clone(),
            message,
        };

        let mut channel = sess
            .channel_session()
            .map_err(|e| channel_err(e.to_string()))?;
        if let Err(e) = channel.exec(command) {
            if is_timeout(&e) {
                return Ok(CommandOutput::timed_out("ssh", timeout));
            }
            return Err(channel_err(e.to_string()));
        }

        let mut stdout = String::new();
        let mut stderr = String::new();
        let read = channel
            .read_to_string(&mut stdout)
            .and_then(|_| channel.stderr().read_to_string(&mut stderr));
        if let Err(e) = read {
            if e.kind() == std::io::ErrorKind::TimedOut {
                return Ok(CommandOutput::timed_out("ssh", timeout));
            }
            return Err(channel_err(e.to_string()));
        }

        channel.wait_close().map_err(|e| channel_err(e.to_string()))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| channel_err(e.to_string()))?;

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl RemoteExec for SshRunner {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let runner = self.clone();
        let target = host.clone();
        let cmd = command.to_string();

        tracing::debug!(host = %host.ssh_host, timeout_secs = timeout.as_secs(), "ssh exec");
        let task = tokio::task::spawn_blocking(move || runner.run_blocking(&target, &cmd, timeout));

        // The session timeout bounds the blocking side; this bounds the wait.
        match tokio::time::timeout(timeout + self.connect_timeout, task).await {
            Ok(joined) => joined.map_err(|e| ExecError::Join(e.to_string()))?,
            Err(_) => {
                tracing::warn!(host = %host.ssh_host, "ssh command timed out");
                Ok(CommandOutput::timed_out("ssh", timeout))
            }
        }
    }
}

fn is_timeout(err: &ssh2::Error) -> bool {
    err.code() == ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)
}

/// The `ssh` command line rsync uses as its transport (`rsync -e`).
pub fn transport_command(key_path: Option<&Path>, port: u16) -> String {
    let mut parts: Vec<String> = vec![
        "ssh".into(),
        "-o".into(),
        "IdentitiesOnly=yes".into(),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
        "-o".into(),
        "ServerAliveInterval=10".into(),
        "-o".into(),
        "ServerAliveCountMax=2".into(),
        "-o".into(),
        "ConnectTimeout=10".into(),
    ];
    if port != 22 {
        parts.push("-p".into());
        parts.push(port.to_string());
    }
    if let Some(key) = key_path {
        parts.push("-i".into());
        parts.push(shell_quote(&key.to_string_lossy()));
    }
    parts.join(" ")
}
