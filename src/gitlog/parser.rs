use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::config::ValidationMode;
use crate::error::{CouplingError, Result};
use crate::validate;

use super::{COMMIT_MARKER, Change};

/// Severity of a single validation issue (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// The kind of grammar violation recorded against a commit (§8, scenario C
/// metrics: `invalid_status` / `invalid_path` / `incomplete` /
/// `invalid_commit_oid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    InvalidStatus,
    InvalidPath,
    IncompleteChange,
    InvalidCommitOid,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::InvalidStatus => "invalid_status",
            IssueType::InvalidPath => "invalid_path",
            IssueType::IncompleteChange => "incomplete",
            IssueType::InvalidCommitOid => "invalid_commit_oid",
        }
    }
}

/// One parser complaint, scoped to the commit it was raised against.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub token: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(issue_type: IssueType, severity: Severity, token: Option<String>, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            token,
            message: message.into(),
        }
    }
}

/// Commit-level metadata parsed from the `--pretty=format:` header fields.
#[derive(Debug, Clone)]
pub struct CommitHeader {
    pub commit_oid: String,
    pub parent_oids: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub authored_ts: i64,
    pub committer_ts: i64,
    pub subject: String,
    pub validation_issues: Vec<ValidationIssue>,
}

impl CommitHeader {
    pub fn is_merge(&self) -> bool {
        self.parent_oids.len() > 1
    }
}

/// The four parser states (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    ExpectCommitOrStatus,
    ExpectPath,
    ExpectOldPath,
    ExpectNewPath,
}

/// Pull one NUL-delimited token from `reader` into `scratch`, reusing the
/// buffer's allocation across calls (§9 "allocation-light... ring buffer").
/// Returns `None` at end of stream.
fn next_token(reader: &mut impl BufRead, scratch: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    scratch.clear();
    let n = reader.read_until(0, scratch)?;
    if n == 0 {
        return Ok(None);
    }
    if scratch.last() == Some(&0) {
        scratch.pop();
    }
    Ok(Some(String::from_utf8_lossy(scratch).into_owned()))
}

/// Streaming parser over a `BufRead` of `-z`-delimited `git log` output.
/// Construct it via [`iter_log`], which also owns the subprocess.
pub struct LogParser<R: BufRead> {
    reader: R,
    scratch: Vec<u8>,
    mode: ValidationMode,
    state: ParseState,
    pending_status: Option<String>,
    pending_old_path: Option<String>,
    current: Option<CommitHeader>,
    changes: Vec<Change>,
    issues: Vec<ValidationIssue>,
    exhausted: bool,
}

impl<R: BufRead> LogParser<R> {
    pub fn new(reader: R, mode: ValidationMode) -> Self {
        Self {
            reader,
            scratch: Vec::with_capacity(256),
            mode,
            state: ParseState::ExpectCommitOrStatus,
            pending_status: None,
            pending_old_path: None,
            current: None,
            changes: Vec::new(),
            issues: Vec::new(),
            exhausted: false,
        }
    }

    fn strict(&self) -> bool {
        self.mode == ValidationMode::Strict
    }

    fn permissive(&self) -> bool {
        self.mode == ValidationMode::Permissive
    }

    fn record(&mut self, issue: ValidationIssue) -> Result<()> {
        let abort = self.strict() && issue.severity == Severity::Error;
        let message = issue.message.clone();
        self.issues.push(issue);
        if abort {
            return Err(CouplingError::ParseError(message));
        }
        Ok(())
    }

    /// Read the seven header tokens following a marker and open a new
    /// commit. Tokens are read eagerly, exactly as the marker's producer
    /// (`--pretty=format:`) emits them in one block.
    fn open_header(&mut self) -> Result<()> {
        let mut fields = Vec::with_capacity(7);
        for _ in 0..7 {
            match next_token(&mut self.reader, &mut self.scratch)? {
                Some(t) => fields.push(t),
                None => {
                    // Stream ended mid-header; nothing usable to open.
                    self.current = None;
                    return Ok(());
                }
            }
        }
        let [commit_oid, parents, author_name, author_email, authored_ts, committer_ts, subject] =
            <[String; 7]>::try_from(fields).expect("exactly 7 header tokens read");

        let mut issues = Vec::new();
        if !is_full_oid(&commit_oid) {
            issues.push(ValidationIssue::new(
                IssueType::InvalidCommitOid,
                Severity::Error,
                Some(commit_oid.clone()),
                "commit id is not a 40-hex OID",
            ));
        }
        let parent_oids = parents
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let authored_ts = authored_ts.parse().unwrap_or(0);
        let committer_ts = committer_ts.parse().unwrap_or(0);

        self.state = ParseState::ExpectCommitOrStatus;
        self.pending_status = None;
        self.pending_old_path = None;
        self.changes.clear();

        self.current = Some(CommitHeader {
            commit_oid,
            parent_oids,
            author_name,
            author_email,
            authored_ts,
            committer_ts,
            subject,
            validation_issues: Vec::new(),
        });

        for issue in issues {
            self.record(issue)?;
        }
        Ok(())
    }

    fn process_token(&mut self, raw: &str) -> Result<()> {
        let token = raw.trim();
        if token.is_empty() {
            return Ok(());
        }
        match self.state {
            ParseState::ExpectCommitOrStatus => self.on_status(token)?,
            ParseState::ExpectPath => {
                if validate::is_valid_path(token, self.permissive()) {
                    let status = self.pending_status.take().unwrap_or_default();
                    self.changes.push(Change {
                        status,
                        path: token.to_string(),
                        old_path: None,
                    });
                    self.state = ParseState::ExpectCommitOrStatus;
                } else {
                    self.resync(token, IssueType::InvalidPath, "expected a path")?;
                }
            }
            ParseState::ExpectOldPath => {
                if validate::is_valid_path(token, self.permissive()) {
                    self.pending_old_path = Some(token.to_string());
                    self.state = ParseState::ExpectNewPath;
                } else {
                    self.resync(token, IssueType::InvalidPath, "expected a rename/copy old path")?;
                }
            }
            ParseState::ExpectNewPath => {
                if validate::is_valid_path(token, self.permissive()) {
                    let status = self.pending_status.take().unwrap_or_default();
                    let old_path = self.pending_old_path.take();
                    self.changes.push(Change {
                        status,
                        path: token.to_string(),
                        old_path,
                    });
                    self.state = ParseState::ExpectCommitOrStatus;
                } else {
                    self.resync(token, IssueType::InvalidPath, "expected a rename/copy new path")?;
                }
            }
        }
        Ok(())
    }

    fn on_status(&mut self, token: &str) -> Result<()> {
        if validate::is_valid_status(token) {
            self.pending_status = Some(token.to_string());
            self.state = if validate::is_rename_or_copy(token) {
                ParseState::ExpectOldPath
            } else {
                ParseState::ExpectPath
            };
            Ok(())
        } else {
            self.record(ValidationIssue::new(
                IssueType::InvalidStatus,
                Severity::Warning,
                Some(token.to_string()),
                "token is not a valid status code",
            ))
        }
    }

    /// Bounded resynchronization (§4.2): a failed token is recorded, then
    /// re-tried as a status; if that also fails we drop back to
    /// expect-commit-or-status and the token is simply discarded.
    fn resync(&mut self, token: &str, issue_type: IssueType, context: &str) -> Result<()> {
        self.record(ValidationIssue::new(
            issue_type,
            Severity::Warning,
            Some(token.to_string()),
            format!("{context}, got {token:?}"),
        ))?;
        self.pending_status = None;
        self.pending_old_path = None;
        self.state = ParseState::ExpectCommitOrStatus;
        if validate::is_valid_status(token) {
            self.on_status(token)?;
        }
        Ok(())
    }

    fn finish_current(&mut self) -> Option<(CommitHeader, Vec<Change>)> {
        let mut header = self.current.take()?;
        if self.state != ParseState::ExpectCommitOrStatus {
            header.validation_issues.push(ValidationIssue::new(
                IssueType::IncompleteChange,
                Severity::Warning,
                None,
                "commit ended mid-change; trailing partial record dropped",
            ));
        }
        header.validation_issues.append(&mut self.issues);
        let changes = std::mem::take(&mut self.changes);
        self.state = ParseState::ExpectCommitOrStatus;
        Some((header, changes))
    }
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<(CommitHeader, Vec<Change>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        loop {
            let token = match next_token(&mut self.reader, &mut self.scratch) {
                Ok(Some(t)) => t,
                Ok(None) => {
                    self.exhausted = true;
                    return self.finish_current().map(Ok);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(CouplingError::Io(e)));
                }
            };

            if token == COMMIT_MARKER {
                let finished = self.finish_current();
                if let Err(e) = self.open_header() {
                    self.exhausted = true;
                    return Some(Err(e));
                }
                if let Some(pair) = finished {
                    return Some(Ok(pair));
                }
                continue;
            }

            if self.current.is_none() {
                // Tokens before the first marker (should not happen with a
                // well-formed invocation) are silently skipped.
                continue;
            }

            if let Err(e) = self.process_token(&token) {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

fn is_full_oid(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Owns the `git log` subprocess and the parser reading its stdout.
/// Awaits the child's exit on every control path: normal exhaustion, an
/// early `break` by the caller, or a dropped iterator (via `Drop`).
pub struct GitLogStream {
    child: Child,
    parser: LogParser<BufReader<ChildStdout>>,
    waited: bool,
}

impl Iterator for GitLogStream {
    type Item = Result<(CommitHeader, Vec<Change>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parser.next() {
            Some(item) => Some(item),
            None => {
                self.reap();
                None
            }
        }
    }
}

impl GitLogStream {
    fn reap(&mut self) {
        if !self.waited {
            let _ = self.child.wait();
            self.waited = true;
        }
    }
}

impl Drop for GitLogStream {
    fn drop(&mut self) {
        self.reap();
    }
}

/// Options accepted by [`iter_log`], mirroring the `git log` flags in §6.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub git_ref: Option<String>,
    pub all_refs: bool,
    pub since: Option<String>,
    pub until: Option<String>,
    pub first_parent_only: bool,
    pub find_renames_threshold: u8,
}

/// Spawn `git log` with the exact invocation in §6 and return a streaming
/// parser over its output.
pub fn iter_log(repo: &Path, opts: &LogOptions, mode: ValidationMode) -> Result<GitLogStream> {
    let pretty = format!(
        "format:{COMMIT_MARKER}%x00%H%x00%P%x00%an%x00%ae%x00%at%x00%ct%x00%s"
    );
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo)
        .arg("log")
        .arg("--name-status")
        .arg(format!("--find-renames={}%", opts.find_renames_threshold))
        .arg("--date-order")
        .arg("-z")
        .arg("--pretty")
        .arg(pretty);

    if opts.first_parent_only {
        cmd.arg("--first-parent");
    }
    if let Some(since) = &opts.since {
        cmd.arg(format!("--since={since}"));
    }
    if let Some(until) = &opts.until {
        cmd.arg(format!("--until={until}"));
    }
    if opts.all_refs {
        cmd.arg("--all");
    } else {
        cmd.arg(opts.git_ref.as_deref().unwrap_or("HEAD"));
    }

    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| CouplingError::SubprocessError(format!("spawning git log: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CouplingError::SubprocessError("git log: no stdout pipe".to_string()))?;

    Ok(GitLogStream {
        child,
        parser: LogParser::new(BufReader::new(stdout), mode),
        waited: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens(parts: &[&str]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for p in parts {
            buf.extend_from_slice(p.as_bytes());
            buf.push(0);
        }
        Cursor::new(buf)
    }

    #[test]
    fn parses_single_commit_two_changes() {
        let oid = "a".repeat(40);
        let reader = tokens(&[
            COMMIT_MARKER,
            &oid,
            "",
            "Alice",
            "alice@example.com",
            "1000",
            "1000",
            "add two files",
            "A",
            "src/a.py",
            "A",
            "src/b.py",
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Soft);
        let (header, changes) = parser.next().unwrap().unwrap();
        assert_eq!(header.commit_oid, oid);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "src/a.py");
        assert_eq!(changes[1].path, "src/b.py");
        assert!(parser.next().is_none());
    }

    #[test]
    fn parses_rename_as_three_tokens() {
        let oid = "b".repeat(40);
        let reader = tokens(&[
            COMMIT_MARKER,
            &oid,
            "",
            "Bob",
            "bob@example.com",
            "2000",
            "2000",
            "rename a to core/a",
            "R100",
            "src/a.py",
            "src/core/a.py",
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Soft);
        let (_, changes) = parser.next().unwrap().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, "R100");
        assert_eq!(changes[0].old_path.as_deref(), Some("src/a.py"));
        assert_eq!(changes[0].path, "src/core/a.py");
    }

    #[test]
    fn strict_mode_aborts_on_bad_oid() {
        let reader = tokens(&[
            COMMIT_MARKER,
            "abcd",
            "",
            "Eve",
            "eve@example.com",
            "1",
            "1",
            "bad",
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Strict);
        assert!(parser.next().unwrap().is_err());
    }

    #[test]
    fn soft_mode_records_bad_oid_and_continues() {
        let oid_ok = "c".repeat(40);
        let reader = tokens(&[
            COMMIT_MARKER,
            "abcd",
            "",
            "Eve",
            "eve@example.com",
            "1",
            "1",
            "bad",
            "A",
            "src/x.py",
            COMMIT_MARKER,
            &oid_ok,
            "",
            "Eve",
            "eve@example.com",
            "2",
            "2",
            "good",
            "A",
            "src/y.py",
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Soft);
        let (first, _) = parser.next().unwrap().unwrap();
        assert!(
            first
                .validation_issues
                .iter()
                .any(|i| i.issue_type == IssueType::InvalidCommitOid)
        );
        let (second, changes) = parser.next().unwrap().unwrap();
        assert_eq!(second.commit_oid, oid_ok);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn one_malformed_token_costs_at_most_one_change() {
        let oid = "d".repeat(40);
        let reader = tokens(&[
            COMMIT_MARKER,
            &oid,
            "",
            "Mallory",
            "mallory@example.com",
            "1",
            "1",
            "inject garbage mid-stream",
            "A",
            "src/ok1.py",
            "Q", // invalid status, not a valid path either since single char
            "A",
            "src/ok2.py",
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Soft);
        let (header, changes) = parser.next().unwrap().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "src/ok1.py");
        assert_eq!(changes[1].path, "src/ok2.py");
        assert!(!header.validation_issues.is_empty());
    }

    #[test]
    fn incomplete_trailing_change_is_flagged() {
        let oid = "e".repeat(40);
        let reader = tokens(&[
            COMMIT_MARKER,
            &oid,
            "",
            "Trudy",
            "trudy@example.com",
            "1",
            "1",
            "trailing rename cut short",
            "R100",
            "src/a.py",
            // stream ends here, still expecting new path
        ]);
        let mut parser = LogParser::new(reader, ValidationMode::Soft);
        let (header, changes) = parser.next().unwrap().unwrap();
        assert!(changes.is_empty());
        assert!(
            header
                .validation_issues
                .iter()
                .any(|i| i.issue_type == IssueType::IncompleteChange)
        );
        assert!(parser.next().is_none());
    }
}
