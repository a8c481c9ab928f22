// SPDX-License-Identifier: Apache-2.0
//!
//! Resolves a repository's `credential_id` to its stored ciphertext
//! blob. Credential storage itself lives in the external persistence
//! layer (§1, §4.11 lists no credential contract), so this trait is the
//! hub's one seam onto it — kept deliberately narrow, mirroring how
//! `RepoEngine` only ever receives a blob it didn't fetch itself.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// The stored ciphertext for `credential_id`, or `None` if it has no
    /// record (treated the same as "no credential" by the orchestrator).
    async fn resolve(&self, credential_id: Uuid) -> Option<String>;
}

/// An in-memory resolver for tests and single-process deployments that
/// keep credential blobs alongside their own config.
#[derive(Default)]
pub struct StaticCredentialResolver {
    blobs: std::collections::HashMap<Uuid, String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential_id: Uuid, blob: impl Into<String>) {
        self.blobs.insert(credential_id, blob.into());
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, credential_id: Uuid) -> Option<String> {
        self.blobs.get(&credential_id).cloned()
    }
}
