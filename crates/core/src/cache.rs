use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::scorer::ScoringState;

/// Content-addressed run identifier: sha256 over the source text and the
/// version hint. Identical submissions get identical ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunId(String);

impl RunId {
    pub fn fingerprint(source: &str, version_hint: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(version_hint.unwrap_or("").as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to identify a run in logs
        write!(f, "{}", &self.0[..16])
    }
}

/// In-memory store for per-run channel embeddings. Nothing is retained
/// unless a caller asks; there is no disk layer.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: Mutex<HashMap<RunId, ScoringState>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(&self, run: RunId, state: ScoringState) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(run, state);
        }
    }

    pub fn lookup(&self, run: &RunId) -> Option<ScoringState> {
        self.entries.lock().ok()?.get(run).cloned()
    }

    pub fn evict(&self, run: &RunId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(run);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic_and_hint_sensitive() {
        let a = RunId::fingerprint("contract C {}", None);
        let b = RunId::fingerprint("contract C {}", None);
        let c = RunId::fingerprint("contract C {}", Some("0.8.0"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_retain_lookup_evict() {
        let cache = EmbeddingCache::new();
        let run = RunId::fingerprint("contract C {}", None);
        assert!(cache.lookup(&run).is_none());

        cache.retain(run.clone(), ScoringState::default());
        assert!(cache.lookup(&run).is_some());
        assert_eq!(cache.len(), 1);

        cache.evict(&run);
        assert!(cache.is_empty());
    }
}
