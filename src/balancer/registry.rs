//! Backend registry with round-robin rotation over the healthy subset.

use std::fmt;

use tokio::sync::Mutex;

/// An immutable backend connection target, identified by its base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddress {
    base_url: String,
}

impl BackendAddress {
    /// Create an address from a base URL. A trailing slash is trimmed so
    /// request paths can be appended directly.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full request URL for a path (with optional query string).
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

/// Rotation state guarded by a single lock: the active subset and the
/// round-robin cursor always change together.
#[derive(Debug)]
struct Rotation {
    active: Vec<BackendAddress>,
    cursor: usize,
}

/// Registry of candidate backends.
///
/// `all` is fixed at startup. The active subset starts equal to `all` (the
/// balancer serves before the first probe cycle completes) and is replaced
/// wholesale by the health checker; workers advance the shared cursor on
/// every selection. Both operations run under the same mutex, so no two
/// selections ever observe the same pre-increment cursor.
#[derive(Debug)]
pub struct BackendRegistry {
    all: Vec<BackendAddress>,
    rotation: Mutex<Rotation>,
}

impl BackendRegistry {
    pub fn new(all: Vec<BackendAddress>) -> Self {
        let active = all.clone();
        Self {
            all,
            rotation: Mutex::new(Rotation { active, cursor: 0 }),
        }
    }

    /// Every configured candidate, healthy or not.
    pub fn all(&self) -> &[BackendAddress] {
        &self.all
    }

    /// Pick the next backend in round-robin order, or `None` when the
    /// active set is empty.
    ///
    /// The modulo is recomputed on every call rather than stored
    /// pre-wrapped, so a set that shrank since the last call can never
    /// produce an out-of-range index.
    pub async fn select_next(&self) -> Option<BackendAddress> {
        let mut rotation = self.rotation.lock().await;
        if rotation.active.is_empty() {
            return None;
        }
        rotation.cursor %= rotation.active.len();
        let chosen = rotation.active[rotation.cursor].clone();
        rotation.cursor += 1;
        Some(chosen)
    }

    /// Swap in a new active set and reset the cursor.
    ///
    /// Called only by the health checker. The cursor resets even when the
    /// set is unchanged; the old position is meaningless for a set that may
    /// have a different length or order.
    pub async fn replace_active(&self, active: Vec<BackendAddress>) {
        let mut rotation = self.rotation.lock().await;
        rotation.active = active;
        rotation.cursor = 0;
    }

    /// Current active set and cursor, atomic with respect to replacement.
    pub async fn snapshot_active(&self) -> (Vec<BackendAddress>, usize) {
        let rotation = self.rotation.lock().await;
        (rotation.active.clone(), rotation.cursor)
    }
}
