// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Closed classification of every externally-visible failure (§3).
///
/// Matching is by lowercased substring against a prioritized table; the
/// first kind whose keywords match wins. The priority order is a
/// behavioural contract, not an implementation detail — reordering it
/// changes which kind wins on ambiguous raw text (e.g. "permission denied
/// resolving host" must classify as `permission_denied`, not `dns_resolution`,
/// because permission is checked first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    PermissionDenied,
    NotFound,
    Timeout,
    Network,
    ConnectionReset,
    DnsResolution,
    InvalidFormat,
    Host,
    Unknown,
}

impl ErrorKind {
    /// Fixed human message used at every externally visible error path —
    /// raw error text never reaches the user (§7).
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Auth => "authentication failed",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFound => "repository not found",
            ErrorKind::Timeout => "connection timed out",
            ErrorKind::Network => "network error",
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::DnsResolution => "cannot resolve host",
            ErrorKind::InvalidFormat => "invalid repository format",
            ErrorKind::Host => "host unreachable",
            ErrorKind::Unknown => "unknown error",
        }
    }
}

/// Whether the retry engine (C2) should retry an operation that failed
/// with this kind. The non-retryable set is exactly {auth, not_found,
/// permission_denied, invalid_format} (§3).
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Timeout
            | ErrorKind::Network
            | ErrorKind::ConnectionReset
            | ErrorKind::DnsResolution
            | ErrorKind::Unknown
    )
}

/// Priority-ordered keyword table. The first entry whose keyword list
/// contains a match wins — order matters (§4.1).
const TABLE: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Auth,
        &[
            "authentication failed",
            "auth failed",
            "unauthorized",
            "401",
            "invalid credentials",
            "bad credentials",
        ],
    ),
    (
        ErrorKind::PermissionDenied,
        &[
            "permission denied",
            "access denied",
            "403",
            "forbidden",
        ],
    ),
    (
        ErrorKind::DnsResolution,
        &[
            "could not resolve host",
            "resolve host",
            "name or service not known",
            "dns",
            "no such host",
        ],
    ),
    (
        ErrorKind::NotFound,
        &[
            "not found",
            "404",
            "no such file or directory",
            "repository not found",
        ],
    ),
    (
        ErrorKind::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorKind::ConnectionReset,
        &["connection reset", "reset by peer", "econnreset"],
    ),
    (
        ErrorKind::Network,
        &[
            "network",
            "connection refused",
            "could not connect",
            "unreachable network",
            "broken pipe",
        ],
    ),
    (
        ErrorKind::InvalidFormat,
        &[
            "invalid format",
            "malformed",
            "unsupported url",
            "invalid url",
            "ssh is not supported",
        ],
    ),
    (
        ErrorKind::Host,
        &["no route to host", "unknown host", "host"],
    ),
];

/// Classify a raw error string into a closed [`ErrorKind`] (C1).
///
/// Pure function: lowercases and trims the input, then scans the
/// priority table top to bottom. Falls back to `Unknown` if nothing
/// matches.
pub fn classify(raw: &str) -> ErrorKind {
    let lowered = raw.to_lowercase();
    let text = lowered.trim();
    for (kind, keywords) in TABLE {
        if keywords.iter().any(|kw| text.contains(kw)) {
            return *kind;
        }
    }
    ErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Boundary behaviours from spec §8 ─────────────────────────────────────

    #[test]
    fn classifies_authentication_failure() {
        assert_eq!(classify("fatal: Authentication failed"), ErrorKind::Auth);
        assert!(!is_retryable(ErrorKind::Auth));
    }

    #[test]
    fn classifies_dns_resolution_failure() {
        assert_eq!(
            classify("could not resolve host: github.com"),
            ErrorKind::DnsResolution
        );
        assert!(is_retryable(ErrorKind::DnsResolution));
    }

    #[test]
    fn classifies_connection_reset() {
        assert_eq!(
            classify("connection reset by peer"),
            ErrorKind::ConnectionReset
        );
        assert!(is_retryable(ErrorKind::ConnectionReset));
    }

    // ── Priority ordering ─────────────────────────────────────────────────────

    #[test]
    fn auth_wins_over_dns_when_both_present() {
        assert_eq!(
            classify("authentication failed while trying to resolve host"),
            ErrorKind::Auth
        );
    }

    #[test]
    fn permission_wins_over_network() {
        assert_eq!(
            classify("permission denied (network unreachable)"),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn dns_wins_over_not_found() {
        assert_eq!(
            classify("could not resolve host, resource not found"),
            ErrorKind::DnsResolution
        );
    }

    // ── Trimming / case-insensitivity ────────────────────────────────────────

    #[test]
    fn classification_is_case_insensitive_and_trims_whitespace() {
        assert_eq!(classify("  TIMED OUT  "), ErrorKind::Timeout);
    }

    #[test]
    fn unmatched_text_is_unknown_and_retryable() {
        assert_eq!(classify("the dog ate my homework"), ErrorKind::Unknown);
        assert!(is_retryable(ErrorKind::Unknown));
    }

    // ── Non-retryable set ─────────────────────────────────────────────────────

    #[test]
    fn invalid_format_is_not_retryable() {
        assert_eq!(classify("invalid format: ssh is not supported"), ErrorKind::InvalidFormat);
        assert!(!is_retryable(ErrorKind::InvalidFormat));
    }

    #[test]
    fn not_found_is_not_retryable() {
        assert_eq!(classify("repository not found"), ErrorKind::NotFound);
        assert!(!is_retryable(ErrorKind::NotFound));
    }
}
