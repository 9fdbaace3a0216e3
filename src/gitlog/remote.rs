//! Git remote metadata (§3 supplemented features: `get_remote_url`,
//! `get_default_branch`, `detect_git_provider`, `transform_to_web_url`,
//! `get_git_remote_info`).
//!
//! Every function here is informational-only (§7): a subprocess failure or
//! an unrecognized shape never propagates as an error, it resolves to
//! `None`. Callers that need a hard failure should use [`super::get_head_oid`]
//! or [`super::count_commits`] instead.

use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// A known git hosting provider, detected from the remote URL's host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
    Bitbucket,
    Unknown,
}

impl GitProvider {
    fn from_host(host: &str) -> Self {
        if host.eq_ignore_ascii_case("github.com") || host.ends_with(".github.com") {
            GitProvider::GitHub
        } else if host.eq_ignore_ascii_case("gitlab.com") || host.contains("gitlab") {
            GitProvider::GitLab
        } else if host.eq_ignore_ascii_case("bitbucket.org") {
            GitProvider::Bitbucket
        } else {
            GitProvider::Unknown
        }
    }
}

/// Remote metadata bundle as surfaced to callers; every field is best-effort.
#[derive(Debug, Clone, Default)]
pub struct GitRemoteInfo {
    pub remote_url: Option<String>,
    pub default_branch: Option<String>,
    pub provider: Option<GitProvider>,
    pub web_url: Option<String>,
}

/// Runs `git -C repo <args>` with up to [`RETRY_ATTEMPTS`] tries, each
/// bounded by [`RETRY_TIMEOUT`] via a watchdog thread. Returns `None` on any
/// failure, timeout, or empty output — this is the sentinel behavior §7
/// requires of informational-only call sites.
fn run_best_effort(repo: &Path, args: &[&str]) -> Option<String> {
    for attempt in 0..RETRY_ATTEMPTS {
        match run_once(repo, args) {
            Some(out) if !out.is_empty() => return Some(out),
            _ => {
                if attempt + 1 < RETRY_ATTEMPTS {
                    thread::sleep(Duration::from_millis(100 * 2u64.pow(attempt)));
                }
            }
        }
    }
    None
}

fn run_once(repo: &Path, args: &[&str]) -> Option<String> {
    let mut child = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .ok()?;

    let start = std::time::Instant::now();
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            if !status.success() {
                return None;
            }
            let mut out = String::new();
            use std::io::Read;
            child.stdout.take()?.read_to_string(&mut out).ok()?;
            return Some(out.trim().to_string());
        }
        if start.elapsed() > RETRY_TIMEOUT {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// `git remote get-url origin`.
pub fn get_remote_url(repo: &Path) -> Option<String> {
    run_best_effort(repo, &["remote", "get-url", "origin"])
}

/// `git symbolic-ref refs/remotes/origin/HEAD`, falling back to
/// `for-each-ref` when the symbolic ref was never set locally.
pub fn get_default_branch(repo: &Path) -> Option<String> {
    if let Some(out) = run_best_effort(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"]) {
        if let Some(branch) = out.rsplit('/').next() {
            return Some(branch.to_string());
        }
    }
    let out = run_best_effort(
        repo,
        &[
            "for-each-ref",
            "--format=%(refname:short)",
            "refs/remotes/origin",
        ],
    )?;
    out.lines()
        .find(|l| !l.ends_with("HEAD"))
        .map(|l| l.rsplit('/').next().unwrap_or(l).to_string())
}

/// Infer the hosting provider from a remote URL's host component, handling
/// both `https://host/owner/repo(.git)` and `git@host:owner/repo(.git)`
/// shapes.
pub fn detect_git_provider(remote_url: &str) -> GitProvider {
    host_of(remote_url)
        .map(|h| GitProvider::from_host(&h))
        .unwrap_or(GitProvider::Unknown)
}

fn host_of(remote_url: &str) -> Option<String> {
    if let Some(rest) = remote_url.strip_prefix("git@") {
        return rest.split(':').next().map(str::to_string);
    }
    for scheme in ["https://", "http://", "ssh://", "git://"] {
        if let Some(rest) = remote_url.strip_prefix(scheme) {
            let rest = rest.split('@').next_back().unwrap_or(rest);
            return rest.split(['/', ':']).next().map(str::to_string);
        }
    }
    None
}

/// Turn an SSH or `.git`-suffixed HTTPS remote URL into a browsable web
/// URL. Best-effort string surgery, not a full URL parser — `None` when the
/// shape isn't recognized.
pub fn transform_to_web_url(remote_url: &str) -> Option<String> {
    let host = host_of(remote_url)?;
    let path = if let Some(rest) = remote_url.strip_prefix("git@") {
        rest.splitn(2, ':').nth(1)?.to_string()
    } else {
        let after_host = remote_url.splitn(2, &host).nth(1)?;
        after_host.trim_start_matches(['/', ':']).to_string()
    };
    let path = path.trim_end_matches(".git");
    Some(format!("https://{host}/{path}"))
}

/// Gather everything above into one bundle, in the order a caller usually
/// wants it resolved.
pub fn get_git_remote_info(repo: &Path) -> GitRemoteInfo {
    let remote_url = get_remote_url(repo);
    let default_branch = get_default_branch(repo);
    let provider = remote_url.as_deref().map(detect_git_provider);
    let web_url = remote_url.as_deref().and_then(transform_to_web_url);
    GitRemoteInfo {
        remote_url,
        default_branch,
        provider,
        web_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_github_from_https() {
        assert_eq!(
            detect_git_provider("https://github.com/owner/repo.git"),
            GitProvider::GitHub
        );
    }

    #[test]
    fn detects_github_from_ssh() {
        assert_eq!(
            detect_git_provider("git@github.com:owner/repo.git"),
            GitProvider::GitHub
        );
    }

    #[test]
    fn unknown_host_is_unknown_provider() {
        assert_eq!(
            detect_git_provider("https://git.example.internal/owner/repo.git"),
            GitProvider::Unknown
        );
    }

    #[test]
    fn transforms_ssh_to_web_url() {
        assert_eq!(
            transform_to_web_url("git@github.com:owner/repo.git").as_deref(),
            Some("https://github.com/owner/repo")
        );
    }

    #[test]
    fn transforms_https_to_web_url() {
        assert_eq!(
            transform_to_web_url("https://gitlab.com/group/sub/repo.git").as_deref(),
            Some("https://gitlab.com/group/sub/repo")
        );
    }

    #[test]
    fn nonexistent_repo_is_none_not_error() {
        let dir = std::env::temp_dir().join("coupling-core-remote-test-nonexistent");
        assert!(get_remote_url(&dir).is_none());
    }
}
