//! In-process fleet used by tests.
//!
//! Every host is a directory under one temp dir, named after its `ssh_host`.
//! [`FakeRemote`] answers agent commands with the agent library, and
//! [`FakeRsync`] copies between host directories and staging the way
//! `rsync -a --itemize-changes [--delete] --exclude-from` would.

use crate::exec::{CommandOutput, ExecError, Host, LocalExec, RemoteExec};
use async_trait::async_trait;
use fleetsync_agent::fs::ops::{copy_file, move_file};
use fleetsync_agent::manifest::build_report;
use fleetsync_agent::{ExcludeSet, Manifest};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub struct Fleet {
    pub base: tempfile::TempDir,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            base: tempfile::TempDir::new().unwrap(),
        }
    }

    pub fn host(&self, name: &str) -> Host {
        Host {
            name: name.to_string(),
            ssh_host: format!("root@{name}"),
            ssh_port: 22,
        }
    }

    /// Local directory standing in for `path` on `host`.
    pub fn path(&self, host: &Host, path: &str) -> PathBuf {
        host_path(self.base.path(), &host.ssh_host, path)
    }

    pub fn write(&self, host: &Host, path: &str, contents: &str) {
        let file = self.path(host, path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, contents).unwrap();
    }

    pub fn read(&self, host: &Host, path: &str) -> String {
        std::fs::read_to_string(self.path(host, path)).unwrap()
    }

    pub fn manifest(&self, host: &Host, root: &str) -> Manifest {
        let excludes = ExcludeSet::new::<&str>(&[]).unwrap();
        build_report(&self.path(host, root), &excludes)
            .unwrap()
            .into_manifest()
    }

    /// Every file under `root`, conflict backups included.
    pub fn files(&self, host: &Host, root: &str) -> Vec<String> {
        let dir = self.path(host, root);
        let mut files = if dir.exists() { list_files(&dir) } else { Vec::new() };
        files.sort();
        files
    }

    pub fn remote(&self) -> FakeRemote {
        FakeRemote {
            base: self.base.path().to_path_buf(),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    pub fn rsync(&self) -> FakeRsync {
        FakeRsync {
            base: self.base.path().to_path_buf(),
            calls: Mutex::new(Vec::new()),
            fail_pull: Mutex::new(false),
        }
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    out
}

fn host_path(base: &Path, ssh_host: &str, path: &str) -> PathBuf {
    base.join(ssh_host.replace('@', "_"))
        .join(path.trim_start_matches('/'))
}

/// Split a command line built by `shell_join`.
fn shell_split(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut started = false;

    for c in command.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                started = true;
            }
            '\\' if !in_quotes => {
                escaped = true;
                started = true;
            }
            ' ' if !in_quotes => {
                if started {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            _ => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        args.push(current);
    }
    args
}

fn ok(stdout: String) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout,
        stderr: String::new(),
    }
}

fn failed(code: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

/// Runs agent commands against the fleet directories.
pub struct FakeRemote {
    base: PathBuf,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeRemote {
    pub fn set_unreachable(&self, host: &Host) {
        self.unreachable.lock().unwrap().insert(host.ssh_host.clone());
    }
}

#[async_trait]
impl RemoteExec for FakeRemote {
    async fn run(&self, host: &Host, command: &str, _: Duration) -> Result<CommandOutput, ExecError> {
        if self.unreachable.lock().unwrap().contains(&host.ssh_host) {
            return Err(ExecError::Connect {
                host: host.ssh_host.clone(),
                message: "connection refused".into(),
            });
        }

        let args = shell_split(command);
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let at = |p: &str| host_path(&self.base, &host.ssh_host, p);

        let output = match words.as_slice() {
            [_, "manifest", "--root", root, rest @ ..] => {
                let patterns: Vec<&str> = rest.iter().copied().filter(|w| *w != "--exclude").collect();
                let excludes = ExcludeSet::new(patterns.as_slice()).unwrap();
                match build_report(&at(*root), &excludes) {
                    Ok(mut report) => {
                        report.root = root.to_string();
                        ok(serde_json::to_string(&report).unwrap())
                    }
                    Err(e) => failed(1, e.to_string()),
                }
            }
            [_, "fs", op, from, to] => {
                let result = match *op {
                    "copy" => copy_file(&at(*from), &at(*to)),
                    "move" => move_file(&at(*from), &at(*to)),
                    _ => return Ok(failed(2, format!("unknown fs op {op}"))),
                };
                match result {
                    Ok(preserved) => ok(serde_json::json!({ "result": preserved }).to_string()),
                    Err(e) => failed(1, e.to_string()),
                }
            }
            _ if command.starts_with("uname") => ok(format!("{}\n 10:00:00 up 1 day\n", host.name)),
            _ => failed(127, format!("unknown command: {command}")),
        };
        Ok(output)
    }
}

/// Emulates rsync between fleet directories and local staging.
pub struct FakeRsync {
    base: PathBuf,
    pub calls: Mutex<Vec<Vec<String>>>,
    fail_pull: Mutex<bool>,
}

impl FakeRsync {
    pub fn fail_pulls(&self) {
        *self.fail_pull.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, arg: &str) -> (PathBuf, bool) {
        match arg.split_once(':') {
            Some((ssh_host, path)) if !arg.starts_with('/') => {
                (host_path(&self.base, ssh_host, path), true)
            }
            _ => (PathBuf::from(arg), false),
        }
    }

    fn sync_dirs(&self, src: &Path, dst: &Path, filter: &RsyncFilter, delete: bool) -> String {
        let mut lines = Vec::new();
        let mut src_files: Vec<String> = list_files(src)
            .into_iter()
            .filter(|rel| !filter.excludes(rel))
            .collect();
        src_files.sort();
        let present: HashSet<&String> = src_files.iter().collect();

        for rel in &src_files {
            let target = dst.join(rel);
            let incoming = std::fs::read(src.join(rel)).unwrap();
            let tag = match std::fs::read(&target) {
                Err(_) => ">f+++++++++",
                Ok(existing) if existing != incoming => ">f.st......",
                Ok(_) => continue,
            };
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(&target, &incoming).unwrap();
            lines.push(format!("{tag} {rel}"));
        }

        if delete && dst.exists() {
            let mut existing = list_files(dst);
            existing.sort();
            for rel in existing {
                if !present.contains(&rel) && !filter.excludes(&rel) {
                    std::fs::remove_file(dst.join(&rel)).unwrap();
                    lines.push(format!("*deleting   {rel}"));
                }
            }
        }

        let mut out = String::from("sending incremental file list\n");
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str("\nsent 100 bytes  received 20 bytes  240.00 bytes/sec\n");
        out
    }
}

#[async_trait]
impl LocalExec for FakeRsync {
    async fn run(&self, argv: &[String], _: Duration) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(argv.to_vec());

        let delete = argv.iter().any(|a| a == "--delete");
        let exclude_file = argv
            .iter()
            .position(|a| a == "--exclude-from")
            .map(|i| PathBuf::from(&argv[i + 1]))
            .ok_or(ExecError::EmptyCommand)?;
        let filter = RsyncFilter::parse(&std::fs::read_to_string(&exclude_file).unwrap());

        let (src, src_remote) = self.resolve(&argv[argv.len() - 2]);
        let (dst, _) = self.resolve(&argv[argv.len() - 1]);

        if src_remote && *self.fail_pull.lock().unwrap() {
            return Ok(failed(255, "ssh: connect to host: Connection refused"));
        }
        if !src.is_dir() {
            return Ok(failed(23, format!("change_dir {:?} failed: No such file or directory", src)));
        }

        std::fs::create_dir_all(&dst).unwrap();
        Ok(ok(self.sync_dirs(&src, &dst, &filter, delete)))
    }
}

/// An exclude file read the way rsync reads it: the first matching rule
/// wins, `+ ` lines include, a trailing `/` only matches directories, a
/// leading `/` anchors at the transfer root and other patterns match the
/// end of the path. `*` and `?` stop at `/`, `**` does not. A file under an
/// excluded directory is excluded.
pub struct RsyncFilter {
    rules: Vec<RsyncRule>,
}

struct RsyncRule {
    include: bool,
    dir_only: bool,
    anchored: bool,
    pattern: Vec<char>,
}

impl RsyncFilter {
    pub fn parse(contents: &str) -> Self {
        let rules = contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let (include, line) = match line.strip_prefix("+ ") {
                    Some(rest) => (true, rest),
                    None => (false, line.strip_prefix("- ").unwrap_or(line)),
                };
                let dir_only = line.len() > 1 && line.ends_with('/');
                let line = if dir_only { &line[..line.len() - 1] } else { line };
                let anchored = line.starts_with('/');
                RsyncRule {
                    include,
                    dir_only,
                    anchored,
                    pattern: line.trim_start_matches('/').chars().collect(),
                }
            })
            .collect();
        Self { rules }
    }

    /// Whether the file at root-relative `rel` stays out of the transfer.
    pub fn excludes(&self, rel: &str) -> bool {
        let parts: Vec<&str> = rel.split('/').collect();
        for depth in 1..parts.len() {
            if self.excluded(&parts[..depth].join("/"), true) {
                return true;
            }
        }
        self.excluded(rel, false)
    }

    fn excluded(&self, path: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.matches(path, is_dir))
            .is_some_and(|rule| !rule.include)
    }
}

impl RsyncRule {
    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let text: Vec<char> = path.chars().collect();
        if self.anchored {
            return wildmatch(&self.pattern, &text);
        }
        (0..text.len())
            .filter(|&i| i == 0 || text[i - 1] == '/')
            .any(|i| wildmatch(&self.pattern, &text[i..]))
    }
}

fn wildmatch(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            let double = p.get(1) == Some(&'*');
            let rest = &p[p.iter().take_while(|&&c| c == '*').count()..];
            (0..=t.len())
                .take_while(|&i| double || i == 0 || t[i - 1] != '/')
                .any(|i| wildmatch(rest, &t[i..]))
        }
        Some('?') => !t.is_empty() && t[0] != '/' && wildmatch(&p[1..], &t[1..]),
        Some('\\') if p.len() > 1 => t.first() == Some(&p[1]) && wildmatch(&p[2..], &t[1..]),
        Some('[') => match p[1..].iter().skip(1).position(|&c| c == ']') {
            Some(offset) if !t.is_empty() => {
                let close = offset + 2;
                let (negate, body) = match p[1] {
                    '!' | '^' => (true, &p[2..close]),
                    _ => (false, &p[1..close]),
                };
                let hit = class_contains(body, t[0]);
                hit != negate && t[0] != '/' && wildmatch(&p[close + 1..], &t[1..])
            }
            Some(_) => false,
            None => t.first() == Some(&'[') && wildmatch(&p[1..], &t[1..]),
        },
        Some(&c) => t.first() == Some(&c) && wildmatch(&p[1..], &t[1..]),
    }
}

fn class_contains(body: &[char], c: char) -> bool {
    let mut i = 0;
    while i < body.len() {
        if i + 2 < body.len() && body[i + 1] == '-' {
            if body[i] <= c && c <= body[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if body[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsync_filter_follows_rsync_matching() {
        let filter = RsyncFilter::parse("+ */\n/logs/**.txt\nlogs/*.tmp\n/cache/\n");
        assert!(filter.excludes("logs/x.txt"));
        assert!(filter.excludes("logs/deep/x.txt"));
        assert!(!filter.excludes("app/logs/x.txt"));
        // Unanchored patterns match the end of the path.
        assert!(filter.excludes("app/logs/a.tmp"));
        assert!(!filter.excludes("logs/deep/a.tmp"));
        // `+ */` wins for directories, so `/cache/` never applies.
        assert!(!filter.excludes("cache/blob"));

        let filter = RsyncFilter::parse("/cache/\n");
        assert!(filter.excludes("cache/blob"));
        assert!(!filter.excludes("cache"));
    }

    #[test]
    fn wildmatch_basics() {
        let m = |p: &str, t: &str| {
            wildmatch(&p.chars().collect::<Vec<_>>(), &t.chars().collect::<Vec<_>>())
        };
        assert!(m("*.log", "run.log"));
        assert!(!m("*.log", "a/run.log"));
        assert!(m("**.log", "a/run.log"));
        assert!(m("v[0-9].cfg", "v3.cfg"));
        assert!(!m("[!a].bin", "a.bin"));
        assert!(m("a\\[1\\].txt", "a[1].txt"));
        assert!(!m("a?b", "a/b"));
    }

    #[test]
    fn split_round_trips_shell_join() {
        let line = crate::exec::shell_join(&["agent", "fs", "copy", "/a b/it's", "**/x"]);
        assert_eq!(shell_split(&line), vec!["agent", "fs", "copy", "/a b/it's", "**/x"]);
    }
}
