use crate::exec::{shell_quote, Host, SshRunner};
use std::io::Read;
use std::path::{Path, PathBuf};

const DEFAULT_REMOTE_PATH: &str = "/usr/local/bin/fleetsync-agent";

/// The agent binary shipped next to the server binary, unless
/// `FLEETSYNC_AGENT_BINARY` points elsewhere.
pub fn local_agent_binary() -> PathBuf {
    if let Ok(path) = std::env::var("FLEETSYNC_AGENT_BINARY") {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("fleetsync-agent")))
        .unwrap_or_else(|| PathBuf::from("fleetsync-agent"))
}

/// Where the agent goes on the host: `agent_path` when absolute.
pub fn remote_install_path(agent_path: &str) -> &str {
    if agent_path.starts_with('/') {
        agent_path
    } else {
        DEFAULT_REMOTE_PATH
    }
}

/// Upload the agent binary to `host` and return its reported version.
pub async fn install_agent(
    ssh: SshRunner,
    host: Host,
    agent_path: String,
    binary: PathBuf,
) -> anyhow::Result<String> {
    if !binary.exists() {
        anyhow::bail!(
            "Agent binary not found at {}. Build with: cargo build --release -p fleetsync-agent",
            binary.display()
        );
    }

    tracing::info!(host = %host.name, "Starting agent installation");
    let version = tokio::task::spawn_blocking(move || {
        install_via_ssh(&ssh, &host, remote_install_path(&agent_path), &binary)
    })
    .await??;

    tracing::info!(version = %version, "Agent installed");
    Ok(version)
}

fn install_via_ssh(ssh: &SshRunner, host: &Host, dest: &str, binary: &Path) -> anyhow::Result<String> {
    let sess = ssh.open_session(host)?;

    // 1. Upload binary via SFTP
    tracing::info!(host = %host.name, "Uploading agent binary...");
    let tmp_path = format!(
        "/tmp/fleetsync-agent-upload-{}",
        chrono::Utc::now().timestamp_millis()
    );
    let binary_data = std::fs::read(binary)?;
    let sftp = sess.sftp()?;
    let mut remote_file = sftp.create(Path::new(&tmp_path))?;
    std::io::Write::write_all(&mut remote_file, &binary_data)?;
    drop(remote_file);
    drop(sftp);

    // 2. Move into place
    let dest_q = shell_quote(dest);
    let (code, _, stderr) = exec_ssh(
        &sess,
        &format!("mv {} {dest_q} && chmod 755 {dest_q}", shell_quote(&tmp_path)),
    )?;
    if code != 0 {
        anyhow::bail!("Failed to install agent at {dest}: {}", stderr.trim());
    }

    // 3. Verify
    let (code, stdout, stderr) = exec_ssh(&sess, &format!("{dest_q} --version"))?;
    if code != 0 {
        tracing::error!(host = %host.name, stderr = %stderr.trim(), "Installed agent does not run");
        anyhow::bail!("Installed agent does not run: {}", stderr.trim());
    }
    Ok(stdout.trim().to_string())
}

fn exec_ssh(sess: &ssh2::Session, cmd: &str) -> anyhow::Result<(i32, String, String)> {
    let mut channel = sess.channel_session()?;
    channel.exec(cmd)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;
    Ok((channel.exit_status()?, stdout, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_path_prefers_absolute_agent_path() {
        assert_eq!(remote_install_path("/opt/fleetsync/agent"), "/opt/fleetsync/agent");
        assert_eq!(remote_install_path("fleetsync-agent"), DEFAULT_REMOTE_PATH);
    }

    #[tokio::test]
    async fn missing_binary_is_rejected_before_connecting() {
        let host = Host {
            name: "a".into(),
            ssh_host: "root@host.invalid".into(),
            ssh_port: 22,
        };
        let err = install_agent(
            SshRunner::new(None),
            host,
            "fleetsync-agent".into(),
            PathBuf::from("/nonexistent/fleetsync-agent"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Agent binary not found"));
    }
}
