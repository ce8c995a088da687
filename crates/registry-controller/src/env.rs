//! Env cache - ordered environment of the registry container
//!
//! Entries keep their position across ticks: new names are appended, updates stay
//! in place, and merging the live container adopts its order. Writing the cache
//! back onto the Deployment therefore never causes a spurious diff.
//! Managed entries belong to the operator; unmanaged entries were discovered on
//! the live object and are carried through untouched.

use indexmap::IndexMap;
use k8s_openapi::api::core::v1::EnvVar;

/// One environment variable and its provenance
#[derive(Clone, Debug, PartialEq)]
pub struct EnvCacheEntry {
    var: EnvVar,
    managed: bool,
}

impl EnvCacheEntry {
    /// An operator-owned variable with a literal value
    pub fn managed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: EnvVar {
                name: name.into(),
                value: Some(value.into()),
                ..Default::default()
            },
            managed: true,
        }
    }

    /// A variable discovered on the live object
    pub fn unmanaged(var: EnvVar) -> Self {
        Self {
            var,
            managed: false,
        }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.var.name
    }

    /// Literal value, if the variable has one
    pub fn value(&self) -> Option<&str> {
        self.var.value.as_deref()
    }

    /// The full variable, including `valueFrom` sources
    pub fn var(&self) -> &EnvVar {
        &self.var
    }

    /// Whether the operator owns this variable
    pub fn is_managed(&self) -> bool {
        self.managed
    }
}

/// Ordered, per-instance store of environment variables with a dirty flag
#[derive(Clone, Debug, Default)]
pub struct EnvCache {
    entries: IndexMap<String, EnvCacheEntry>,
    changed: bool,
}

impl EnvCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by variable name
    pub fn get(&self, name: &str) -> Option<&EnvCacheEntry> {
        self.entries.get(name)
    }

    /// Insert or update an entry, keeping the position of an existing name
    ///
    /// Setting identical content leaves the dirty flag alone.
    pub fn set(&mut self, entry: EnvCacheEntry) {
        if self.entries.get(entry.name()) == Some(&entry) {
            return;
        }
        self.entries.insert(entry.name().to_string(), entry);
        self.changed = true;
    }

    /// Remove an entry, keeping the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<EnvCacheEntry> {
        let removed = self.entries.shift_remove(name);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    /// All variables in cache order
    pub fn sorted(&self) -> Vec<EnvVar> {
        self.entries.values().map(|e| e.var.clone()).collect()
    }

    /// Whether the content changed since the last reset
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Clear the dirty flag, keeping the content
    pub fn reset_changed(&mut self) {
        self.changed = false;
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether some managed entry is missing from, or differs on, the live list
    pub fn has_unapplied(&self, live: &[EnvVar]) -> bool {
        self.entries
            .values()
            .filter(|entry| entry.managed)
            .any(|entry| !live.contains(&entry.var))
    }

    /// Capture the live container environment
    ///
    /// Every live variable the cache doesn't know yet, or knows only as
    /// unmanaged, is (re)inserted as unmanaged; managed entries win over the
    /// live value. Variables present on the live object keep their live order
    /// and managed entries the live object lacks follow in cache order, so
    /// writing the result back never reorders what is already deployed.
    /// Unmanaged entries missing from the live object were deleted there and
    /// are dropped.
    pub fn merge_live(&mut self, live: &[EnvVar]) {
        let mut merged = IndexMap::with_capacity(self.entries.len() + live.len());
        for var in live {
            let entry = match self.entries.get(&var.name) {
                Some(existing) if existing.is_managed() => existing.clone(),
                _ => EnvCacheEntry::unmanaged(var.clone()),
            };
            merged.insert(var.name.clone(), entry);
        }
        for (name, entry) in &self.entries {
            if entry.is_managed() && !merged.contains_key(name) {
                merged.insert(name.clone(), entry.clone());
            }
        }

        if !self.entries.iter().eq(merged.iter()) {
            self.entries = merged;
            self.changed = true;
        }
    }
}
