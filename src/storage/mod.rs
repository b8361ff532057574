//! Local store for mirrored pull requests.
//!
//! One JSON file per identifier, named `<number>.json`, directly under the
//! store root. File presence is the only existence signal; there is no
//! index beyond the directory listing. Writes go through a temp file in the
//! same directory followed by a rename, so a reader never sees a partially
//! written entry and a later write fully replaces the earlier content.
//!
//! `last_run_info.json` is reserved for the run record and is never parsed
//! as an identifier.
//!
//! The store assumes a single writer process.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::models::{Record, RunInfo};
use crate::{Error, Result};

/// Extension of record files.
pub const RECORD_EXTENSION: &str = "json";

/// Reserved run-record filename.
pub const RUN_INFO_FILE: &str = "last_run_info.json";

/// What a local lookup found.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEntry {
    /// No file for this identifier.
    Absent,
    /// A file exists but could not be parsed as a record.
    Unreadable(String),
    /// A parsed record.
    Present(Record),
}

impl LocalEntry {
    pub fn exists(&self) -> bool {
        !matches!(self, LocalEntry::Absent)
    }
}

/// Result of a record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No entry existed before.
    Created,
    /// An entry existed and its content changed.
    Replaced,
    /// An entry with identical content (ignoring `collected_at`) existed and
    /// was left byte-for-byte untouched.
    Unchanged,
}

/// File-per-identifier record store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open the store, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self::at(root))
    }

    /// Refer to a store without touching the filesystem. Read operations on
    /// a missing directory behave as an empty store.
    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry file for `number`.
    pub fn path_for(&self, number: u64) -> PathBuf {
        self.root.join(format!("{}.{}", number, RECORD_EXTENSION))
    }

    pub fn exists(&self, number: u64) -> bool {
        self.path_for(number).is_file()
    }

    /// Look up an entry, classifying unparseable files instead of failing.
    pub fn load(&self, number: u64) -> Result<LocalEntry> {
        match self.read(number) {
            Ok(Some(record)) => Ok(LocalEntry::Present(record)),
            Ok(None) => Ok(LocalEntry::Absent),
            Err(Error::MalformedLocalData { reason, .. }) => Ok(LocalEntry::Unreadable(reason)),
            Err(e) => Err(e),
        }
    }

    /// Read an entry. `Ok(None)` when absent, `MalformedLocalData` when the
    /// file does not parse as a record.
    pub fn read(&self, number: u64) -> Result<Option<Record>> {
        let path = self.path_for(number);
        if !path.is_file() {
            return Ok(None);
        }
        read_record_file(&path, number).map(Some)
    }

    /// Persist a record, replacing any previous entry for its identifier.
    pub fn write(&self, record: &Record) -> Result<WriteOutcome> {
        let number = record.number();
        if number == 0 {
            return Err(Error::InvalidInput(
                "record identifier must be positive".to_string(),
            ));
        }

        let outcome = match self.read(number) {
            Ok(Some(existing)) if existing.same_content(record) => return Ok(WriteOutcome::Unchanged),
            Ok(Some(_)) | Err(Error::MalformedLocalData { .. }) => WriteOutcome::Replaced,
            Ok(None) => WriteOutcome::Created,
            Err(e) => return Err(e),
        };

        let bytes = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.path_for(number), &bytes)?;
        Ok(outcome)
    }

    /// Identifiers of all entries, ascending.
    pub fn identifiers(&self) -> Result<BTreeSet<u64>> {
        Ok(self.entry_files()?.into_iter().map(|(n, _)| n).collect())
    }

    /// Largest identifier present locally.
    pub fn max_identifier(&self) -> Result<Option<u64>> {
        Ok(self.identifiers()?.last().copied())
    }

    /// Entry files with their identifiers, ascending by identifier.
    pub fn entry_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if let Some(number) = parse_entry_name(&path) {
                files.push((number, path));
            }
        }
        files.sort_by_key(|(n, _)| *n);
        Ok(files)
    }

    /// Read an entry file found through [`entry_files`](Self::entry_files).
    pub fn read_path(&self, number: u64, path: &Path) -> Result<Record> {
        read_record_file(path, number)
    }

    /// Write the run record. Called once at the end of each sync.
    pub fn write_run_info(&self, info: &RunInfo) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(info)?;
        self.write_atomic(&self.root.join(RUN_INFO_FILE), &bytes)
    }

    pub fn read_run_info(&self) -> Result<Option<RunInfo>> {
        let path = self.root.join(RUN_INFO_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut temp = NamedTempFile::new_in(&self.root)?;
        temp.write_all(bytes)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// `<positive integer>.json`, excluding the reserved run-record file.
fn parse_entry_name(path: &Path) -> Option<u64> {
    if path.file_name()?.to_str()? == RUN_INFO_FILE {
        return None;
    }
    if path.extension()?.to_str()? != RECORD_EXTENSION {
        return None;
    }
    let number: u64 = path.file_stem()?.to_str()?.parse().ok()?;
    (number > 0).then_some(number)
}

fn read_record_file(path: &Path, number: u64) -> Result<Record> {
    let bytes = fs::read(path)?;
    let record: Record =
        serde_json::from_slice(&bytes).map_err(|e| Error::MalformedLocalData {
            id: number,
            reason: e.to_string(),
        })?;
    if record.number() != number {
        return Err(Error::MalformedLocalData {
            id: number,
            reason: format!("file holds #{}", record.number()),
        });
    }
    Ok(record)
}
