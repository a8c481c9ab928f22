// SPDX-License-Identifier: Apache-2.0
//!
//! Pure branch-name resolution (C3): parsing a remote-refs probe's raw
//! output, picking a default branch, and validating a user's requested
//! branch against what's actually available. Nothing here touches a
//! network or the filesystem.

/// Parse the raw output of a remote-refs probe (`<hash>\tref` lines) into
/// an alphabetically sorted, de-duplicated list of branch names. Tags,
/// pull/merge-request refs and `HEAD` are discarded; `refs/heads/` is
/// stripped. Invalid or empty input yields an empty list, never an error.
pub fn parse_remote_refs(raw: &str) -> Vec<String> {
    let mut branches: Vec<String> = raw
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let _hash = parts.next()?;
            let ref_name = parts.next()?.trim();
            ref_name.strip_prefix("refs/heads/").map(str::to_string)
        })
        .collect();
    branches.sort();
    branches.dedup();
    branches
}

/// Prefer `main`, then `master`, then the first branch alphabetically,
/// then `None` if there are no branches at all.
pub fn default_branch(branches: &[String]) -> Option<String> {
    if branches.iter().any(|b| b == "main") {
        return Some("main".to_string());
    }
    if branches.iter().any(|b| b == "master") {
        return Some("master".to_string());
    }
    branches.first().cloned()
}

/// Outcome of validating a requested branch name against the available
/// set (§4.3 `validate`).
#[derive(Debug, Clone, PartialEq)]
pub struct BranchCheck {
    pub is_valid: bool,
    pub message: String,
    /// The single best suggestion, or the repo's default branch if no
    /// candidate scored highly enough.
    pub suggested_branch: Option<String>,
    /// Up to three scored suggestions, most similar first.
    pub suggestions: Vec<String>,
    pub available_branches: Vec<String>,
}

const SUGGESTION_THRESHOLD: f64 = 30.0;
const MAX_SUGGESTIONS: usize = 3;

/// Validate `requested` against `available` (§4.3). Never panics; empty
/// input on either side is reported as invalid with an explanatory
/// message rather than treated as a special error case.
pub fn validate(requested: &str, available: &[String]) -> BranchCheck {
    let available_branches = available.to_vec();

    if requested.is_empty() {
        return BranchCheck {
            is_valid: false,
            message: "branch name is empty".to_string(),
            suggested_branch: default_branch(available),
            suggestions: Vec::new(),
            available_branches,
        };
    }
    if available.is_empty() {
        return BranchCheck {
            is_valid: false,
            message: "no available branches".to_string(),
            suggested_branch: None,
            suggestions: Vec::new(),
            available_branches,
        };
    }
    if available.iter().any(|b| b == requested) {
        return BranchCheck {
            is_valid: true,
            message: "branch exists".to_string(),
            suggested_branch: Some(requested.to_string()),
            suggestions: Vec::new(),
            available_branches,
        };
    }

    let mut scored: Vec<(String, f64)> = available
        .iter()
        .map(|b| (b.clone(), similarity(requested, b)))
        .filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let suggestions: Vec<String> = scored.into_iter().take(MAX_SUGGESTIONS).map(|(b, _)| b).collect();

    let suggested_branch = suggestions.first().cloned().or_else(|| default_branch(available));

    BranchCheck {
        is_valid: false,
        message: format!("branch '{requested}' not found"),
        suggested_branch,
        suggestions,
        available_branches,
    }
}

/// A resolved branch choice, flagging whether the user actually asked
/// for it (§4.3 `optimalBranch`).
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalBranch {
    pub branch: String,
    pub user_specified: bool,
}

/// Resolve the branch to actually use: the user's request if it's valid,
/// otherwise the best suggestion (or repo default) marked as not
/// user-specified (§4.3).
pub fn optimal_branch(user_requested: &str, available: &[String]) -> Option<OptimalBranch> {
    if !user_requested.is_empty() {
        let check = validate(user_requested, available);
        if check.is_valid {
            return Some(OptimalBranch {
                branch: user_requested.to_string(),
                user_specified: true,
            });
        }
        if let Some(fallback) = check.suggested_branch {
            return Some(OptimalBranch {
                branch: fallback,
                user_specified: false,
            });
        }
        return None;
    }
    default_branch(available).map(|branch| OptimalBranch {
        branch,
        user_specified: false,
    })
}

/// Case-insensitive similarity score in `[0, 100]` (§4.3): exact match is
/// 100, containment is 80, prefix match is 60, otherwise a Levenshtein-
/// distance-derived score.
fn similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return 100.0;
    }
    if a_lower.contains(&b_lower) || b_lower.contains(&a_lower) {
        return 80.0;
    }
    if a_lower.starts_with(&b_lower) || b_lower.starts_with(&a_lower) {
        return 60.0;
    }
    let max_len = a_lower.chars().count().max(b_lower.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    let dist = levenshtein(&a_lower, &b_lower) as f64;
    ((max_len as f64 - dist) / max_len as f64 * 100.0).max(0.0)
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
