//! Application state: configuration plus the content library, loaded once.
//!
//! This module owns:
//!   - the configuration (from TOML or defaults)
//!   - every parsed topic, keyed by id, and the labelled parse diagnostics
//!   - opening the learner's progress on the configured data directory
//!
//! Content files are parsed exactly once here and handed out by reference; nothing
//! else in the crate keeps global content state.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::config::{load_config_from_env, PumpkinConfig};
use crate::domain::Topic;
use crate::parser::parse_topic_file;
use crate::seeds::{SAMPLE_SOURCE, SAMPLE_TOPIC};
use crate::session::Progress;
use crate::store::{FileStore, StoreError};

/// Content files are recognised by this suffix.
pub const CONTENT_SUFFIX: &str = ".pumpkin.txt";

/// A parse diagnostic tagged with the topic (or file) it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryDiagnostic {
    pub source: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LibraryDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] Line {}: {}", self.source, self.line, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentLibrary {
    topics: Vec<Topic>,
    diagnostics: Vec<LibraryDiagnostic>,
}

impl ContentLibrary {
    /// Parse `(label, raw text)` pairs in order. A topic whose id was already loaded is
    /// skipped with a diagnostic; a topic left without concepts is skipped (its parse
    /// diagnostics say why).
    pub fn from_sources<'a, I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut lib = ContentLibrary::default();
        for (label, raw) in sources {
            lib.add(label, raw);
        }
        lib
    }

    /// Only the built-in sample topic.
    pub fn builtin() -> Self {
        Self::from_sources([(SAMPLE_SOURCE, SAMPLE_TOPIC)])
    }

    /// Every `*.pumpkin.txt` file directly under `dir`, in file-name order. Unreadable
    /// files become diagnostics; an unreadable directory is an error.
    #[instrument(level = "info", target = "pumpkin", skip(dir), fields(dir = %dir.display()))]
    pub fn load_dir(dir: &Path) -> std::io::Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.file_name().and_then(|n| n.to_str()).map_or(false, |n| n.ends_with(CONTENT_SUFFIX)))
            .collect();
        paths.sort();

        let mut lib = ContentLibrary::default();
        for path in paths {
            let label = path.file_name().and_then(|n| n.to_str()).unwrap_or("?").to_string();
            match fs::read_to_string(&path) {
                Ok(raw) => lib.add(&label, &raw),
                Err(e) => {
                    error!(target: "pumpkin", file = %label, error = %e, "Failed to read content file");
                    lib.diagnostics.push(LibraryDiagnostic { source: label, line: 1, message: format!("Could not read file: {e}") });
                }
            }
        }
        info!(target: "pumpkin", topics = lib.topics.len(), diagnostics = lib.diagnostics.len(), "Content library loaded");
        Ok(lib)
    }

    fn add(&mut self, label: &str, raw: &str) {
        let parsed = parse_topic_file(raw);
        let source = parsed.topic.as_ref().map_or_else(|| label.to_string(), |t| t.title.clone());
        self.diagnostics.extend(parsed.errors.into_iter().map(|e| LibraryDiagnostic {
            source: source.clone(),
            line: e.line,
            message: e.message,
        }));
        let Some(topic) = parsed.topic else {
            warn!(target: "pumpkin", %label, "Content file rejected");
            return;
        };
        if topic.concepts.is_empty() {
            warn!(target: "pumpkin", %label, topic = %topic.id, "Topic has no practicable concepts; skipping");
            return;
        }
        if self.topic(&topic.id).is_some() {
            warn!(target: "pumpkin", %label, topic = %topic.id, "Duplicate topic id; skipping");
            self.diagnostics.push(LibraryDiagnostic {
                source,
                line: 1,
                message: format!("Topic id `{}` is already loaded from another file; skipped.", topic.id),
            });
            return;
        }
        self.topics.push(topic);
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn diagnostics(&self) -> &[LibraryDiagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: PumpkinConfig,
    pub library: ContentLibrary,
}

impl AppState {
    /// Build state from env: load config, then parse every content file once.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_config_from_env().unwrap_or_default();
        Self::with_config(config)
    }

    pub fn with_config(config: PumpkinConfig) -> Self {
        let mut library = match &config.content_dir {
            Some(dir) => ContentLibrary::load_dir(dir).unwrap_or_else(|e| {
                error!(target: "pumpkin", dir = %dir.display(), error = %e, "Cannot read content directory; using built-in topic");
                ContentLibrary::default()
            }),
            None => ContentLibrary::default(),
        };
        if library.is_empty() {
            info!(target: "pumpkin", "No topics loaded; falling back to the built-in topic");
            let rejected = std::mem::take(&mut library.diagnostics);
            library = ContentLibrary::builtin();
            library.diagnostics = rejected.into_iter().chain(std::mem::take(&mut library.diagnostics)).collect();
        }
        Self { config, library }
    }

    /// Progress stored as JSON files under `data_dir`.
    pub fn open_progress(&self) -> Result<Progress<FileStore>, StoreError> {
        let store = FileStore::new(&self.config.data_dir)?;
        Progress::load(store)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_config(PumpkinConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = "#TOPIC: Queues\n#DESC: Messaging\n##CONCEPT: Ack\nQ: What is an ack?\nANS: A\n---\n";

    #[test]
    fn builtin_topic_parses_cleanly() {
        let lib = ContentLibrary::builtin();
        assert!(lib.diagnostics().is_empty(), "{:?}", lib.diagnostics());
        let topic = lib.topic("caching").expect("caching topic");
        assert_eq!(topic.concept_ids().collect::<Vec<_>>(), vec!["ttl", "eviction", "write-policies"]);
        assert_eq!(topic.questions().count(), 7);
    }

    #[test]
    fn diagnostics_are_labelled_and_duplicates_skipped() {
        let lib = ContentLibrary::from_sources([
            ("a.pumpkin.txt", SAMPLE_TOPIC),
            ("b.pumpkin.txt", SAMPLE_TOPIC),
            ("queues.pumpkin.txt", BROKEN),
        ]);
        assert_eq!(lib.topics().len(), 1);
        let rendered: Vec<String> = lib.diagnostics().iter().map(ToString::to_string).collect();
        assert!(rendered[0].starts_with("[Caching] Line 1: Topic id `caching`"), "{rendered:?}");
        assert!(rendered.iter().any(|d| d.starts_with("[Queues] Line 4:")), "{rendered:?}");
        assert!(lib.topic("queues").is_none());
    }

    #[test]
    fn content_dir_is_scanned_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("caching.pumpkin.txt"), SAMPLE_TOPIC).expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");
        let cfg = PumpkinConfig { content_dir: Some(dir.path().to_path_buf()), ..PumpkinConfig::default() };
        let state = AppState::with_config(cfg);
        assert_eq!(state.library.topics().len(), 1);
    }

    #[test]
    fn empty_library_falls_back_to_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("bad.pumpkin.txt"), BROKEN).expect("write");
        let cfg = PumpkinConfig { content_dir: Some(dir.path().to_path_buf()), ..PumpkinConfig::default() };
        let state = AppState::with_config(cfg);
        assert!(state.library.topic("caching").is_some());
        assert!(state.library.diagnostics().iter().all(|d| d.source == "Queues"));
        assert!(!state.library.diagnostics().is_empty());
    }
}
