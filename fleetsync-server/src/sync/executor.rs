use super::itemize::parse_itemized;
use super::types::{Stage, TransferOutcome};
use crate::exec::ssh::transport_command;
use crate::exec::{Host, LocalExec};
use fleetsync_agent::fs::exclude::CONFLICT_DIR_PATTERN;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Two-phase rsync transfer through a private local staging directory.
pub struct StagedExecutor<'a> {
    local: &'a dyn LocalExec,
    rsync_path: &'a str,
    ssh_key_path: Option<&'a Path>,
    staging_dir: Option<&'a Path>,
    timeout: Duration,
}

/// One leg's pull and push.
#[derive(Debug, Default)]
pub struct LegTransfer {
    pub pull: Option<TransferOutcome>,
    pub push: Option<TransferOutcome>,
    pub failure: Option<(Stage, String)>,
}

impl LegTransfer {
    fn fail(mut self, stage: Stage, message: String) -> Self {
        self.failure = Some((stage, message));
        self
    }
}

/// What to move and how.
pub struct TransferSpec<'a> {
    pub origin: &'a Host,
    pub destination: &'a Host,
    pub root: &'a str,
    pub excludes: &'a [String],
    /// Root-relative paths kept out of this transfer.
    pub skip: &'a [String],
    pub allow_delete: bool,
}

impl<'a> StagedExecutor<'a> {
    pub fn new(
        local: &'a dyn LocalExec,
        rsync_path: &'a str,
        ssh_key_path: Option<&'a Path>,
        staging_dir: Option<&'a Path>,
        timeout: Duration,
    ) -> Self {
        Self {
            local,
            rsync_path,
            ssh_key_path,
            staging_dir,
            timeout,
        }
    }

    /// Pull the origin's root into staging, then push staging to the
    /// destination. The push never runs when the pull fails. Staging is
    /// removed before returning.
    pub async fn transfer(&self, job: &TransferSpec<'_>) -> LegTransfer {
        let leg = LegTransfer::default();

        let staging = match self.create_staging() {
            Ok(dir) => dir,
            Err(e) => return leg.fail(Stage::Pull, format!("cannot create staging directory: {e}")),
        };
        let local_root = staging.path().join(root_key(job.root));
        let exclude_file = staging.path().join("excludes.txt");
        if let Err(e) = prepare_staging(&local_root, &exclude_file, job.excludes, job.skip) {
            return leg.fail(Stage::Pull, format!("cannot prepare staging directory: {e}"));
        }

        let local_arg = format!("{}/", local_root.to_string_lossy());
        let pull_argv = self.rsync_argv(
            &exclude_file,
            job.origin.ssh_port,
            false,
            remote_arg(job.origin, job.root),
            local_arg.clone(),
        );
        let (pull, pull_error) = self.run_phase(pull_argv, "pull").await;
        let leg = LegTransfer {
            pull,
            ..Default::default()
        };
        if let Some(message) = pull_error {
            tracing::warn!(host = %job.origin.name, root = %job.root, error = %message, "pull failed");
            return leg.fail(Stage::Pull, message);
        }

        let push_argv = self.rsync_argv(
            &exclude_file,
            job.destination.ssh_port,
            job.allow_delete,
            local_arg,
            remote_arg(job.destination, job.root),
        );
        let (push, push_error) = self.run_phase(push_argv, "push").await;
        let leg = LegTransfer { push, ..leg };
        if let Some(message) = push_error {
            tracing::warn!(host = %job.destination.name, root = %job.root, error = %message, "push failed");
            return leg.fail(Stage::Push, message);
        }

        tracing::info!(
            from = %job.origin.name,
            to = %job.destination.name,
            root = %job.root,
            pulled = leg.pull.as_ref().map_or(0, |o| o.changes.len()),
            pushed = leg.push.as_ref().map_or(0, |o| o.changes.len()),
            "transfer complete"
        );
        leg
    }

    fn create_staging(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fleetsync-");
        match self.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    fn rsync_argv(
        &self,
        exclude_file: &Path,
        port: u16,
        delete: bool,
        from: String,
        to: String,
    ) -> Vec<String> {
        let mut argv = vec![
            self.rsync_path.to_string(),
            "-az".into(),
            "--itemize-changes".into(),
        ];
        if delete {
            argv.push("--delete".into());
        }
        argv.extend([
            "--exclude-from".into(),
            exclude_file.to_string_lossy().into_owned(),
            "-e".into(),
            transport_command(self.ssh_key_path, port),
            from,
            to,
        ]);
        argv
    }

    /// Run one rsync phase. The error message is set when the phase failed.
    async fn run_phase(&self, argv: Vec<String>, phase: &str) -> (Option<TransferOutcome>, Option<String>) {
        tracing::debug!(?argv, "rsync {phase}");
        let output = match self.local.run(&argv, self.timeout).await {
            Ok(output) => output,
            Err(e) => return (None, Some(format!("rsync {phase} could not run: {e}"))),
        };

        let mut outcome = TransferOutcome {
            command: argv,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            changes: Vec::new(),
        };
        if outcome.exit_code != 0 {
            let message = format!(
                "rsync {phase} failed (exit {}): {}",
                outcome.exit_code,
                outcome.stderr.trim()
            );
            return (Some(outcome), Some(message));
        }

        match parse_itemized(&outcome.stdout) {
            Ok(changes) => {
                outcome.changes = changes;
                (Some(outcome), None)
            }
            Err(e) => (Some(outcome), Some(e.to_string())),
        }
    }
}

fn prepare_staging(
    local_root: &Path,
    exclude_file: &Path,
    excludes: &[String],
    skip: &[String],
) -> std::io::Result<()> {
    std::fs::create_dir_all(local_root)?;
    std::fs::write(exclude_file, exclude_file_contents(excludes, skip))
}

/// Contents of the `--exclude-from` file.
///
/// Every directory is included first, so the rules that follow only ever
/// decide on files, the same way manifests are filtered. Then come the plan
/// excludes and the conflict directory, translated by [`rsync_rules`], and
/// each skipped path anchored at the transfer root.
pub fn exclude_file_contents(excludes: &[String], skip: &[String]) -> String {
    let mut patterns: Vec<&str> = excludes.iter().map(String::as_str).collect();
    if !patterns.contains(&CONFLICT_DIR_PATTERN) {
        patterns.push(CONFLICT_DIR_PATTERN);
    }

    let mut lines = vec!["+ */".to_string()];
    for pattern in patterns {
        for rule in rsync_rules(pattern) {
            if !lines.contains(&rule) {
                lines.push(rule);
            }
        }
    }
    lines.extend(skip.iter().map(|path| format!("/{}", escape_wildcards(path))));

    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

/// rsync rules that exclude exactly the files `pattern` keeps out of a
/// manifest.
///
/// Manifests match the whole of `rel` or `/rel`, and `*` crosses `/`. rsync
/// matches unanchored patterns against the end of the path and only `**`
/// crosses `/`. So every rule is anchored at the transfer root and every
/// star run becomes `**`. A leading wildcard that could swallow the slash of
/// `/rel` gets a second rule without it.
pub fn rsync_rules(pattern: &str) -> Vec<String> {
    // Manifest paths never end in `/`, so such a pattern excludes nothing.
    if pattern.is_empty() || pattern.ends_with('/') {
        return Vec::new();
    }
    if pattern.starts_with('/') {
        return vec![widen_stars(pattern)];
    }

    let mut rules = vec![format!("/{}", widen_stars(pattern))];
    let unstarred = pattern.trim_start_matches('*');
    if unstarred.len() < pattern.len() && unstarred.starts_with('/') {
        rules.push(widen_stars(unstarred));
    }
    if let Some(rest) = pattern.strip_prefix('?') {
        if !rest.is_empty() {
            rules.push(format!("/{}", widen_stars(rest)));
        }
    }
    rules.dedup();
    rules
}

/// Turn every run of `*` outside a bracket class into `**`.
fn widen_stars(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '[' if !in_class => {
                in_class = true;
                out.push(c);
                // A leading `!` or `]` belongs to the class body.
                if let Some(&next) = chars.peek() {
                    if next == '!' || next == ']' {
                        out.push(next);
                        chars.next();
                    }
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            '*' if !in_class => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str("**");
            }
            other => out.push(other),
        }
    }
    out
}

/// Backslash-escape rsync wildcards so a path matches only itself. rsync
/// reads backslashes literally in patterns without wildcards.
fn escape_wildcards(path: &str) -> String {
    if !path.contains(['*', '?', '[']) {
        return path.to_string();
    }
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Staging subdirectory name for a root: its components joined by `_`.
pub fn root_key(root: &str) -> String {
    let parts: Vec<&str> = root.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        "root".to_string()
    } else {
        parts.join("_")
    }
}

fn remote_arg(host: &Host, root: &str) -> String {
    format!("{}:{}/", host.ssh_host, root.trim_end_matches('/'))
}
