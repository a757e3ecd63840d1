#![forbid(unsafe_code)]

//! Admin authorization: an allow-list of email addresses loaded once and kept
//! for the lifetime of the gate.

use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use parking_lot::RwLock;
use serde_json::Value;

pub const DEFAULT_ADMINS_FILE: &str = "admins.json";

/// Where the raw allow-list comes from.
pub trait AllowListSource: Send + Sync {
    fn read_entries(&self) -> Result<Vec<String>>;
}

/// Reads a JSON array of email strings from disk. Entries that are not
/// strings are skipped; anything other than an array is an error.
#[derive(Debug, Clone)]
pub struct JsonFileAllowList {
    path: PathBuf,
}

impl JsonFileAllowList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AllowListSource for JsonFileAllowList {
    fn read_entries(&self) -> Result<Vec<String>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Reading {}", self.path.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Parsing {}", self.path.display()))?;
        let Value::Array(items) = parsed else {
            bail!("{} must contain a JSON array of emails", self.path.display());
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(email) => Some(email),
                _ => None,
            })
            .collect())
    }
}

/// Decides whether an identity may perform admin actions.
///
/// The allow-list is read from its source on first use and cached for good.
/// A source that cannot be read or parsed caches an empty list, so every
/// check denies until the process restarts.
pub struct AccessGate {
    source: Box<dyn AllowListSource>,
    cached: RwLock<Option<Arc<HashSet<String>>>>,
}

impl AccessGate {
    pub fn new(source: impl AllowListSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: RwLock::new(None),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonFileAllowList::new(path))
    }

    /// Returns the cached allow-list, loading it on the first call.
    pub fn load_allow_list(&self) -> Arc<HashSet<String>> {
        if let Some(set) = self.cached.read().as_ref() {
            return Arc::clone(set);
        }

        let mut slot = self.cached.write();
        if let Some(set) = slot.as_ref() {
            return Arc::clone(set);
        }
        let set = Arc::new(self.read_source());
        *slot = Some(Arc::clone(&set));
        set
    }

    pub fn is_email_allowed(&self, email: Option<&str>) -> bool {
        let Some(email) = email.filter(|value| !value.is_empty()) else {
            return false;
        };
        self.load_allow_list().contains(&email.to_lowercase())
    }

    pub fn is_loaded(&self) -> bool {
        self.cached.read().is_some()
    }

    fn read_source(&self) -> HashSet<String> {
        match self.source.read_entries() {
            Ok(entries) => {
                let set: HashSet<String> = entries
                    .into_iter()
                    .map(|email| email.to_lowercase())
                    .collect();
                tracing::info!(admins = set.len(), "admin allow-list loaded");
                set
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "admin allow-list unavailable; denying all admin access");
                HashSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingSource {
        entries: Option<Vec<String>>,
        reads: Arc<AtomicUsize>,
    }

    impl CountingSource {
        fn new(entries: Option<&[&str]>) -> (Self, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            let source = Self {
                entries: entries.map(|list| list.iter().map(|e| e.to_string()).collect()),
                reads: Arc::clone(&reads),
            };
            (source, reads)
        }
    }

    impl AllowListSource for CountingSource {
        fn read_entries(&self) -> Result<Vec<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match &self.entries {
                Some(list) => Ok(list.clone()),
                None => bail!("source offline"),
            }
        }
    }

    fn gate_with_file(contents: &str) -> (tempfile::TempDir, AccessGate) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("admins.json");
        std::fs::write(&path, contents).unwrap();
        (dir, AccessGate::from_file(path))
    }

    #[test]
    fn missing_email_is_denied_without_loading() {
        let (source, reads) = CountingSource::new(Some(&["admin@example.com"]));
        let gate = AccessGate::new(source);
        assert!(!gate.is_email_allowed(None));
        assert!(!gate.is_email_allowed(Some("")));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(!gate.is_loaded());
    }

    #[test]
    fn membership_ignores_case() {
        let (_dir, gate) = gate_with_file(r#"["Admin@Example.com", "editor@studio.test"]"#);
        assert!(gate.is_email_allowed(Some("Admin@Example.com")));
        assert!(gate.is_email_allowed(Some("admin@example.com")));
        assert!(gate.is_email_allowed(Some("EDITOR@STUDIO.TEST")));
        assert!(!gate.is_email_allowed(Some("someone@else.test")));
    }

    #[test]
    fn entries_are_lowercased_and_deduplicated() {
        let (source, _) = CountingSource::new(Some(&["A@x.test", "a@X.TEST", "b@x.test"]));
        let gate = AccessGate::new(source);
        let set = gate.load_allow_list();
        assert_eq!(set.len(), 2);
        assert!(set.contains("a@x.test"));
    }

    #[test]
    fn non_string_entries_are_skipped() {
        let (_dir, gate) = gate_with_file(r#"["ok@x.test", 42, null, {"email": "no@x.test"}]"#);
        let set = gate.load_allow_list();
        assert_eq!(set.len(), 1);
        assert!(gate.is_email_allowed(Some("ok@x.test")));
        assert!(!gate.is_email_allowed(Some("no@x.test")));
    }

    #[test]
    fn missing_file_denies_everyone() {
        let dir = tempdir().unwrap();
        let gate = AccessGate::from_file(dir.path().join("absent.json"));
        assert!(!gate.is_email_allowed(Some("admin@example.com")));
        assert!(gate.load_allow_list().is_empty());
    }

    #[test]
    fn malformed_file_denies_everyone() {
        for contents in ["{not json", r#"{"admins": ["admin@example.com"]}"#, r#""admin@example.com""#] {
            let (_dir, gate) = gate_with_file(contents);
            assert!(
                !gate.is_email_allowed(Some("admin@example.com")),
                "contents: {contents}"
            );
        }
    }

    #[test]
    fn failed_load_is_not_retried() {
        let (source, reads) = CountingSource::new(None);
        let gate = AccessGate::new(source);
        for _ in 0..3 {
            assert!(!gate.is_email_allowed(Some("admin@example.com")));
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(gate.is_loaded());
    }

    #[test]
    fn allow_list_is_read_once_and_shared() {
        let (source, reads) = CountingSource::new(Some(&["admin@example.com"]));
        let gate = AccessGate::new(source);
        let first = gate.load_allow_list();
        let second = gate.load_allow_list();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(gate.is_email_allowed(Some("ADMIN@example.com")));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_is_not_reread_after_first_load() {
        let (dir, gate) = gate_with_file(r#"["first@x.test"]"#);
        assert!(gate.is_email_allowed(Some("first@x.test")));
        std::fs::write(dir.path().join("admins.json"), r#"["second@x.test"]"#).unwrap();
        assert!(gate.is_email_allowed(Some("first@x.test")));
        assert!(!gate.is_email_allowed(Some("second@x.test")));
    }

    #[test]
    fn concurrent_first_access_reads_source_once() {
        let (source, reads) = CountingSource::new(Some(&["admin@example.com"]));
        let gate = Arc::new(AccessGate::new(source));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.is_email_allowed(Some("admin@example.com")))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }
}
