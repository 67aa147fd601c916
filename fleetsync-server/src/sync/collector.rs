use super::error::{Result, SyncError};
use crate::exec::{shell_join, Host, RemoteExec, TIMEOUT_EXIT};
use fleetsync_agent::{ExcludeSet, Manifest, ManifestReport};
use std::collections::BTreeMap;
use std::time::Duration;

/// Runs the agent's `manifest` subcommand on a host and validates the result.
pub struct ManifestCollector<'a> {
    remote: &'a dyn RemoteExec,
    agent_path: &'a str,
    timeout: Duration,
}

impl<'a> ManifestCollector<'a> {
    pub fn new(remote: &'a dyn RemoteExec, agent_path: &'a str, timeout: Duration) -> Self {
        Self {
            remote,
            agent_path,
            timeout,
        }
    }

    pub async fn collect(&self, host: &Host, root: &str, excludes: &ExcludeSet) -> Result<Manifest> {
        let command = manifest_command(self.agent_path, root, excludes.patterns());
        tracing::debug!(host = %host.name, %root, "collecting manifest");

        let output = self
            .remote
            .run(host, &command, self.timeout)
            .await
            .map_err(|e| SyncError::Connectivity {
                host: host.name.clone(),
                root: root.to_string(),
                message: e.to_string(),
            })?;

        if output.exit_code == TIMEOUT_EXIT {
            return Err(SyncError::Connectivity {
                host: host.name.clone(),
                root: root.to_string(),
                message: format!("manifest timed out after {}s", self.timeout.as_secs()),
            });
        }
        if !output.success() {
            return Err(SyncError::RemoteCommand {
                host: host.name.clone(),
                root: root.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let manifest = parse_manifest(&output.stdout, excludes).map_err(|message| {
            SyncError::parse(format!("{}:{root}", host.name), message)
        })?;
        tracing::info!(host = %host.name, %root, files = manifest.len(), "manifest collected");
        Ok(manifest)
    }
}

pub fn manifest_command(agent_path: &str, root: &str, patterns: &[String]) -> String {
    let mut args = vec![agent_path.to_string(), "manifest".into(), "--root".into(), root.to_string()];
    for pattern in patterns {
        args.push("--exclude".into());
        args.push(pattern.clone());
    }
    shell_join(&args)
}

/// Parse agent stdout into a manifest, re-applying `excludes`.
pub fn parse_manifest(stdout: &str, excludes: &ExcludeSet) -> std::result::Result<Manifest, String> {
    let payload = stdout.trim();
    if payload.is_empty() {
        return Err("empty manifest output".into());
    }
    let report: ManifestReport =
        serde_json::from_str(payload).map_err(|e| format!("invalid manifest JSON: {e}"))?;

    let mut manifest = BTreeMap::new();
    for record in report.files {
        validate_path(&record.path)?;
        if excludes.is_excluded(&record.path) {
            continue;
        }
        if manifest.contains_key(&record.path) {
            return Err(format!("duplicate path {:?}", record.path));
        }
        manifest.insert(record.path.clone(), record);
    }
    Ok(manifest)
}

fn validate_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() || path.starts_with('/') {
        return Err(format!("path {path:?} is not root-relative"));
    }
    if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(format!("path {path:?} has an invalid component"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, ExecError};
    use async_trait::async_trait;

    struct Canned(std::result::Result<CommandOutput, fn() -> ExecError>);

    #[async_trait]
    impl RemoteExec for Canned {
        async fn run(&self, _: &Host, _: &str, _: Duration) -> std::result::Result<CommandOutput, ExecError> {
            match &self.0 {
                Ok(out) => Ok(out.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn host() -> Host {
        Host {
            name: "a".into(),
            ssh_host: "root@a".into(),
            ssh_port: 22,
        }
    }

    fn out(code: i32, stdout: &str, stderr: &str) -> Canned {
        Canned(Ok(CommandOutput {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }))
    }

    fn no_excludes() -> ExcludeSet {
        ExcludeSet::new::<&str>(&[]).unwrap()
    }

    async fn collect(remote: &Canned) -> Result<Manifest> {
        let collector = ManifestCollector::new(remote, "fleetsync-agent", Duration::from_secs(5));
        collector.collect(&host(), "/srv", &no_excludes()).await
    }

    #[test]
    fn command_quotes_patterns() {
        let cmd = manifest_command("fleetsync-agent", "/srv/app", &["**/.env".into()]);
        assert_eq!(cmd, "fleetsync-agent manifest --root /srv/app --exclude '**/.env'");
    }

    #[test]
    fn parse_reapplies_excludes() {
        let stdout = r#"{"root":"/r","exists":true,"files":[
            {"path":"keep.txt","size":1,"mtime":1.0,"fingerprint":"aa"},
            {"path":"cfg/.env","size":1,"mtime":1.0,"sha256":"bb"}]}"#;
        let excludes = ExcludeSet::new(&["**/.env"]).unwrap();
        let manifest = parse_manifest(stdout, &excludes).unwrap();
        assert_eq!(manifest.keys().collect::<Vec<_>>(), vec!["keep.txt"]);
    }

    #[test]
    fn parse_missing_root_is_empty() {
        let manifest = parse_manifest(r#"{"root":"/r","exists":false,"files":[]}"#, &no_excludes()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn parse_rejects_bad_payloads() {
        assert!(parse_manifest("", &no_excludes()).is_err());
        assert!(parse_manifest("not json", &no_excludes()).is_err());
        assert!(parse_manifest("[]", &no_excludes()).is_err());

        for bad in ["/abs", "../up", "a/./b", "a//b", ""] {
            let stdout = format!(
                r#"{{"root":"/r","exists":true,"files":[{{"path":"{bad}","size":1,"mtime":1.0,"fingerprint":"aa"}}]}}"#
            );
            assert!(parse_manifest(&stdout, &no_excludes()).is_err(), "{bad}");
        }

        let dup = r#"{"root":"/r","exists":true,"files":[
            {"path":"a","size":1,"mtime":1.0,"fingerprint":"aa"},
            {"path":"a","size":1,"mtime":1.0,"fingerprint":"bb"}]}"#;
        assert!(parse_manifest(dup, &no_excludes()).is_err());
    }

    #[tokio::test]
    async fn timeout_is_connectivity_error() {
        let err = collect(&out(TIMEOUT_EXIT, "", "")).await.unwrap_err();
        assert!(matches!(err, SyncError::Connectivity { .. }));
        assert!(err.to_string().starts_with("a:/srv:"));
    }

    #[tokio::test]
    async fn connect_failure_is_connectivity_error() {
        let remote = Canned(Err(|| ExecError::Connect {
            host: "root@a".into(),
            message: "refused".into(),
        }));
        let err = collect(&remote).await.unwrap_err();
        assert!(matches!(err, SyncError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let err = collect(&out(1, "", "permission denied\n")).await.unwrap_err();
        match err {
            SyncError::RemoteCommand { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "permission denied");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_stdout_is_parse_error() {
        let err = collect(&out(0, "", "")).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse { .. }));
    }
}
