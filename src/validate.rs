//! Path validator & status-code grammar (§4.1).
//!
//! Pure functions — no I/O, no state. Classifies a single raw token from the
//! `git log --name-status -z` stream as a status code, a plausible file
//! path, or neither. The `strict` flag tightens path acceptance; it does
//! not change status-code acceptance, which is fixed by the grammar.

use once_cell::sync::Lazy;
use regex::Regex;

static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([AMDTUXB]|[RC]\d{2,3})$").unwrap());
static HEX40_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{40}$").unwrap());
static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{9,10}$").unwrap());
static RENAME_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[RC]\d{2,3}$").unwrap());

/// The parser's own sentinel prefix; a token starting with this can never
/// be a legitimate path (§4.1 "internal markers").
pub const INTERNAL_MARKER_PREFIX: &str = "__CI_";

/// `true` if `token` is exactly one valid git status code: `A M D T U X B`
/// or an `R###`/`C###` rename/copy code with a 2-3 digit similarity score.
pub fn is_valid_status(token: &str) -> bool {
    STATUS_RE.is_match(token)
}

/// `true` if a rename/copy status code starts a rename (`R`) or copy (`C`)
/// sequence, which expects *two* subsequent path tokens instead of one.
pub fn is_rename_or_copy(status: &str) -> bool {
    status.starts_with('R') || status.starts_with('C')
}

/// Reject tokens that are obviously not file paths — i.e. parser
/// desynchronization masquerading as a path (§4.1).
pub fn is_valid_path(path: &str, strict: bool) -> bool {
    if path.len() < 2 {
        return false;
    }
    if RENAME_CODE_RE.is_match(path) {
        return false;
    }
    if HEX40_RE.is_match(path) {
        return false;
    }
    if TIMESTAMP_RE.is_match(path) {
        return false;
    }
    if path.contains('@') && !path.contains('/') {
        return false;
    }
    if path.starts_with(INTERNAL_MARKER_PREFIX) {
        return false;
    }

    if strict {
        if path.len() <= 3 && path.chars().all(|c| c.is_ascii_alphabetic()) {
            return false;
        }
        if !path.contains('/') && !path.contains('.') && path.len() < 10 {
            return false;
        }
    }

    true
}
