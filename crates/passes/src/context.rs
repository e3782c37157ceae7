//! Per-run state shared by the pipeline and every pass.

use crate::config::{Configuration, EncryptionAlgorithm};
use crate::diagnostics::{Diagnostic, Severity};
use crate::preservation::PreservationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;
use umbra_core::{Rand, Seed};

/// Association from pre-transform full name to post-transform name.
/// Insertion order is kept so mapping emission is stable under a fixed seed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameMap {
    entries: Vec<(String, String)>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rename. The first record for a key wins; a second record
    /// for the same key is a pass bug and is dropped with a log line.
    pub fn record(&mut self, original: impl Into<String>, renamed: impl Into<String>) {
        let original = original.into();
        if self.index.contains_key(&original) {
            debug!("rename map already holds '{original}', keeping first entry");
            return;
        }
        self.index.insert(original.clone(), self.entries.len());
        self.entries.push((original, renamed.into()));
    }

    pub fn renamed(&self, original: &str) -> Option<&str> {
        self.index
            .get(original)
            .map(|&i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, original: &str) -> bool {
        self.index.contains_key(original)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(o, n)| (o.as_str(), n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One encrypted literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedString {
    pub plaintext: String,
    pub ciphertext: Vec<u8>,
    pub key: Vec<u8>,
    pub algorithm: EncryptionAlgorithm,
}

/// Registry of encrypted literals, keyed by plaintext so repeated occurrences
/// share one ciphertext. Iteration follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct StringRegistry {
    entries: Vec<EncryptedString>,
    index: HashMap<String, usize>,
}

impl StringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `plaintext`, inserting via `encrypt` on first sight.
    pub fn intern(
        &mut self,
        plaintext: &str,
        encrypt: impl FnOnce(&str) -> EncryptedString,
    ) -> usize {
        if let Some(&i) = self.index.get(plaintext) {
            return i;
        }
        let i = self.entries.len();
        self.index.insert(plaintext.to_string(), i);
        self.entries.push(encrypt(plaintext));
        i
    }

    /// Inserts a prepared entry; an existing entry for the same plaintext
    /// wins.
    pub fn insert(&mut self, entry: EncryptedString) -> usize {
        if let Some(&i) = self.index.get(&entry.plaintext) {
            return i;
        }
        let i = self.entries.len();
        self.index.insert(entry.plaintext.clone(), i);
        self.entries.push(entry);
        i
    }

    pub fn get(&self, index: usize) -> Option<&EncryptedString> {
        self.entries.get(index)
    }

    pub fn lookup(&self, plaintext: &str) -> Option<&EncryptedString> {
        self.index.get(plaintext).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncryptedString> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collaborators owned by the run: the seeded random source and the
/// preservation policy. Typed slots, populated at start-up; lookup of a
/// missing service cannot be expressed.
#[derive(Debug, Clone)]
pub struct Services {
    pub rand: Rand,
    pub preservation: PreservationPolicy,
}

/// Mutable state threaded through one protection run. Not shared across
/// runs; `fork` supports speculative execution.
#[derive(Debug)]
pub struct RunState {
    pub config: Configuration,
    pub services: Services,
    pub rename_map: RenameMap,
    pub strings: StringRegistry,
    /// Seed actually driving this run (the configured one, or a generated
    /// one for unseeded runs). Recorded for the watermark.
    pub seed: Seed,
    diagnostics: Vec<Diagnostic>,
    applied: BTreeSet<String>,
    pub pass_timings: Vec<(String, Duration)>,
}

impl RunState {
    pub fn new(config: Configuration) -> Self {
        let seed = config.seed.clone().unwrap_or_else(Seed::generate);
        let services = Services {
            rand: Rand::from_seed(&seed),
            preservation: PreservationPolicy::from_config(&config),
        };
        Self {
            config,
            services,
            rename_map: RenameMap::new(),
            strings: StringRegistry::new(),
            seed,
            diagnostics: Vec::new(),
            applied: BTreeSet::new(),
            pass_timings: Vec::new(),
        }
    }

    pub fn rand(&mut self) -> &mut Rand {
        &mut self.services.rand
    }

    pub fn preservation(&self) -> &PreservationPolicy {
        &self.services.preservation
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        debug!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Idempotent.
    pub fn mark_applied(&mut self, pass_id: impl Into<String>) {
        self.applied.insert(pass_id.into());
    }

    pub fn is_applied(&self, pass_id: &str) -> bool {
        self.applied.contains(pass_id)
    }

    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }

    /// Child state for speculative pass execution: same configuration, a
    /// copy of the service table and applied set. Mutations to the child do
    /// not propagate back; the module itself stays with the caller.
    pub fn fork(&self) -> RunState {
        RunState {
            config: self.config.clone(),
            services: self.services.clone(),
            rename_map: self.rename_map.clone(),
            strings: self.strings.clone(),
            seed: self.seed.clone(),
            diagnostics: self.diagnostics.clone(),
            applied: self.applied.clone(),
            pass_timings: self.pass_timings.clone(),
        }
    }
}
