// SPDX-License-Identifier: Apache-2.0
use aihub_errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a repository's working copy is obtained (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryType {
    Git,
    Local,
    Svn,
}

/// Per-repository knobs that influence the connection test and retry loop
/// (§4.4, §4.7). `retry_count` is the user-configured ceiling, distinct
/// from the true attempt count recorded on a [`TestResult`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(default = "RepositorySettings::default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "RepositorySettings::default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub auto_update: bool,
}

impl RepositorySettings {
    fn default_retry_count() -> u32 {
        3
    }

    fn default_connection_timeout_secs() -> u64 {
        10
    }
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            retry_count: Self::default_retry_count(),
            connection_timeout_secs: Self::default_connection_timeout_secs(),
            auto_update: false,
        }
    }
}

/// One recorded retry attempt from a connection test (§4.4, §9). Always
/// reflects what actually happened, independent of whatever policy a
/// caller applies to [`TestResult::retry_count`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttemptRecord {
    pub attempt: u32,
    pub error: String,
    pub delay_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Diagnostic detail attached to a [`TestResult`] (§3, §4.4). On failure
/// only `error_kind` and `attempts` are populated; on success the
/// branch-discovery fields (`branches`, `actual_branch`,
/// `branch_validation`, `is_git_repo`) are filled in alongside them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestDetails {
    #[serde(default)]
    pub branch_count: Option<u32>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    /// For `local` repositories: whether a `.git`/`.svn` marker directory
    /// was found at the configured path. `None` for non-local types.
    #[serde(default)]
    pub vcs_marker: Option<bool>,
    #[serde(default)]
    pub attempts: Vec<RetryAttemptRecord>,
    /// Set on failure only — the classified reason the probe didn't
    /// succeed (§3, §4.1).
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    /// The branches discovered by the probe. Empty for `local`/`svn`
    /// repositories and on failure.
    #[serde(default)]
    pub branches: Vec<String>,
    /// The branch actually resolved for use after validation/fallback
    /// (§4.3 `optimalBranch`), distinct from `Repository.requested_branch`
    /// which may still hold the user's original, now-stale request.
    #[serde(default)]
    pub actual_branch: Option<String>,
    /// Result of validating the requested branch against the discovered
    /// set. `None` for non-git repositories, where there's nothing to
    /// validate.
    #[serde(default)]
    pub branch_validation: Option<BranchValidation>,
    #[serde(default)]
    pub is_git_repo: bool,
}

/// Outcome of testing a repository's reachability (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    pub details: TestDetails,
    /// See §9 Open Question: the hub records the *true* number of retries
    /// that occurred, never the policy-defined zero-on-eventual-success
    /// some clients may expect — see DESIGN.md.
    pub retry_count: u32,
    pub tested_at: DateTime<Utc>,
}

impl TestResult {
    pub fn ok(message: impl Into<String>, details: TestDetails) -> Self {
        let retry_count = details.attempts.len() as u32;
        Self {
            success: true,
            message: message.into(),
            details,
            retry_count,
            tested_at: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>, details: TestDetails) -> Self {
        let retry_count = details.attempts.len() as u32;
        Self {
            success: false,
            message: message.into(),
            details,
            retry_count,
            tested_at: Utc::now(),
        }
    }
}

/// Whether a named branch can be used, and what to suggest if not (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchValidation {
    pub is_valid: bool,
    pub is_default: bool,
    /// The closest-matching known branch when `is_valid` is false, chosen
    /// by similarity (§4.3 `optimalBranch`).
    pub suggested_branch: Option<String>,
}

/// Cached state from the most recent branch discovery / connection test
/// (§3, §4.3, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    #[serde(default)]
    pub last_test_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_test_result: Option<TestResult>,
    #[serde(default)]
    pub available_branches: Vec<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// A connectable source of code a session can be opened against (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub url: String,
    pub repo_type: RepositoryType,
    /// Reference into the credential vault; `None` for public/local repos.
    pub credential_id: Option<Uuid>,
    /// The user's stored branch preference. Resolved against the
    /// discovered branch list by the repository engine (§4.3, §4.4); set
    /// to the resolved branch automatically the first time a test
    /// succeeds and this is absent or invalid.
    pub requested_branch: Option<String>,
    pub settings: RepositorySettings,
    pub metadata: RepositoryMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(owner_user_id: Uuid, name: impl Into<String>, url: impl Into<String>, repo_type: RepositoryType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            name: name.into(),
            url: url.into(),
            repo_type,
            credential_id: None,
            requested_branch: None,
            settings: RepositorySettings::default(),
            metadata: RepositoryMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a fresh [`TestResult`] and bump `updated_at` (§4.4).
    pub fn apply_test_result(&mut self, result: TestResult) {
        self.metadata.last_test_date = Some(result.tested_at);
        self.metadata.last_test_result = Some(result);
        self.updated_at = Utc::now();
    }

    /// Validate `branch` against the cached branch list (§4.3). Falls back
    /// to `exists: false` with no suggestion when branches haven't been
    /// discovered yet.
    pub fn validate_branch(&self, branch: &str) -> BranchValidation {
        let is_valid = self.metadata.available_branches.iter().any(|b| b == branch);
        let is_default = self.metadata.default_branch.as_deref() == Some(branch);
        let suggested_branch = if is_valid {
            None
        } else {
            closest_branch(branch, &self.metadata.available_branches)
        };
        BranchValidation {
            is_valid,
            is_default,
            suggested_branch,
        }
    }
}

/// Find the branch with the smallest Levenshtein distance to `target`,
/// preferring the default branch on ties (§4.3 `optimalBranch`).
fn closest_branch(target: &str, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .min_by_key(|c| levenshtein(target, c))
        .cloned()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());
    let mut row: Vec<usize> = (0..=lb).collect();
    for i in 1..=la {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=lb {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[lb]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        Repository::new(Uuid::new_v4(), "demo", "https://example.com/demo.git", RepositoryType::Git)
    }

    // ── Levenshtein / branch suggestion ──────────────────────────────────────

    #[test]
    fn levenshtein_identical_strings_is_zero() {
        assert_eq!(levenshtein("main", "main"), 0);
    }

    #[test]
    fn levenshtein_counts_edits() {
        assert_eq!(levenshtein("main", "mian"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn closest_branch_picks_nearest_match() {
        let candidates = vec!["main".to_string(), "develop".to_string(), "release".to_string()];
        assert_eq!(closest_branch("mian", &candidates), Some("main".to_string()));
    }

    // ── TestResult ────────────────────────────────────────────────────────────

    #[test]
    fn test_result_records_true_attempt_count() {
        let details = TestDetails {
            attempts: vec![
                RetryAttemptRecord {
                    attempt: 1,
                    error: "timeout".into(),
                    delay_ms: 100,
                    timestamp: Utc::now(),
                },
                RetryAttemptRecord {
                    attempt: 2,
                    error: "timeout".into(),
                    delay_ms: 200,
                    timestamp: Utc::now(),
                },
            ],
            ..Default::default()
        };
        let result = TestResult::ok("reachable", details);
        assert!(result.success);
        assert_eq!(result.retry_count, 2);
    }

    // ── Branch validation ─────────────────────────────────────────────────────

    #[test]
    fn validate_branch_unknown_with_no_discovery_yet() {
        let r = repo();
        let v = r.validate_branch("main");
        assert!(!v.is_valid);
        assert!(v.suggested_branch.is_none());
    }

    #[test]
    fn validate_branch_exists_and_flags_default() {
        let mut r = repo();
        r.metadata.available_branches = vec!["main".into(), "dev".into()];
        r.metadata.default_branch = Some("main".into());

        let v = r.validate_branch("main");
        assert!(v.is_valid);
        assert!(v.is_default);

        let v = r.validate_branch("dev");
        assert!(v.is_valid);
        assert!(!v.is_default);
    }

    #[test]
    fn validate_branch_missing_suggests_closest() {
        let mut r = repo();
        r.metadata.available_branches = vec!["main".into(), "develop".into()];
        let v = r.validate_branch("mian");
        assert!(!v.is_valid);
        assert_eq!(v.suggested_branch.as_deref(), Some("main"));
    }

    #[test]
    fn apply_test_result_updates_metadata() {
        let mut r = repo();
        let before = r.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(1));
        r.apply_test_result(TestResult::failure("auth failed", TestDetails::default()));
        assert!(r.metadata.last_test_result.is_some());
        assert!(r.updated_at >= before);
    }
}
