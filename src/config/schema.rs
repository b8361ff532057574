//! KDL schema for `prm.kdl`.
//!
//! Every node is optional; missing nodes fall back to environment variables
//! or built-in defaults during resolution.
//!
//! # KDL Schema
//!
//! ```kdl
//! api-base-url "https://api.github.com"
//! repository "owner/name"
//! data-dir "data/prs"
//! reports-dir "reports"
//! request-delay-ms 500
//! low-water-mark 10
//! page-size 100
//! max-scan-pages 100
//! reset-poll-secs 5
//! open-range-miss-limit 20
//! known-exceptions 181 182 194 215 802 931 1803
//! ```
//!
//! The API token is never read from or written to this file.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Owner and name of the mirrored repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    /// Parse `owner/name`.
    pub fn parse(s: &str) -> Option<Self> {
        let (owner, name) = s.trim().split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Values read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorFileConfig {
    pub api_base_url: Option<String>,
    pub repository: Option<Repository>,
    pub data_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub request_delay_ms: Option<u64>,
    pub low_water_mark: Option<u64>,
    pub page_size: Option<u32>,
    pub max_scan_pages: Option<u32>,
    pub reset_poll_secs: Option<u64>,
    pub open_range_miss_limit: Option<u64>,
    pub known_exceptions: Option<BTreeSet<u64>>,
}

impl MirrorFileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse()?;
        let config = Self::from_kdl(&doc)?;
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(page_size) = self.page_size {
            if !(1..=100).contains(&page_size) {
                return Err(format!("page-size must be 1-100, got {}", page_size));
            }
        }
        if self.max_scan_pages == Some(0) {
            return Err("max-scan-pages must be positive".to_string());
        }
        if self.open_range_miss_limit == Some(0) {
            return Err("open-range-miss-limit must be positive".to_string());
        }
        if let Some(ref exceptions) = self.known_exceptions {
            if exceptions.contains(&0) {
                return Err("known-exceptions must be positive identifiers".to_string());
            }
        }
        if let Some(ref url) = self.api_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("api-base-url must be an http(s) URL, got {}", url));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Result<Self> {
        let mut config = Self::new();

        config.api_base_url = string_node(doc, "api-base-url");
        if let Some(repo) = string_node(doc, "repository") {
            config.repository = Some(Repository::parse(&repo).ok_or_else(|| {
                Error::Config(format!("repository must be owner/name, got {}", repo))
            })?);
        }
        config.data_dir = string_node(doc, "data-dir").map(PathBuf::from);
        config.reports_dir = string_node(doc, "reports-dir").map(PathBuf::from);
        config.request_delay_ms = integer_node(doc, "request-delay-ms")?;
        config.low_water_mark = integer_node(doc, "low-water-mark")?;
        config.page_size = integer_node(doc, "page-size")?;
        config.max_scan_pages = integer_node(doc, "max-scan-pages")?;
        config.reset_poll_secs = integer_node(doc, "reset-poll-secs")?;
        config.open_range_miss_limit = integer_node(doc, "open-range-miss-limit")?;

        if let Some(node) = doc.get("known-exceptions") {
            let mut exceptions = BTreeSet::new();
            for entry in node.entries() {
                let id = entry
                    .value()
                    .as_integer()
                    .and_then(|i| u64::try_from(i).ok())
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "known-exceptions expects integers, got {}",
                            entry.value()
                        ))
                    })?;
                exceptions.insert(id);
            }
            config.known_exceptions = Some(exceptions);
        }

        Ok(config)
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref url) = self.api_base_url {
            push_string(&mut doc, "api-base-url", url.clone());
        }
        if let Some(ref repo) = self.repository {
            push_string(&mut doc, "repository", repo.to_string());
        }
        if let Some(ref dir) = self.data_dir {
            push_string(&mut doc, "data-dir", dir.display().to_string());
        }
        if let Some(ref dir) = self.reports_dir {
            push_string(&mut doc, "reports-dir", dir.display().to_string());
        }
        let integers = [
            ("request-delay-ms", self.request_delay_ms),
            ("low-water-mark", self.low_water_mark),
            ("page-size", self.page_size.map(u64::from)),
            ("max-scan-pages", self.max_scan_pages.map(u64::from)),
            ("reset-poll-secs", self.reset_poll_secs),
            ("open-range-miss-limit", self.open_range_miss_limit),
        ];
        for (name, value) in integers {
            if let Some(value) = value {
                let mut node = KdlNode::new(name);
                node.push(KdlEntry::new(KdlValue::Integer(value as i128)));
                doc.nodes_mut().push(node);
            }
        }
        if let Some(ref exceptions) = self.known_exceptions {
            let mut node = KdlNode::new("known-exceptions");
            for id in exceptions {
                node.push(KdlEntry::new(KdlValue::Integer(*id as i128)));
            }
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &MirrorFileConfig) {
        if other.api_base_url.is_some() {
            self.api_base_url = other.api_base_url.clone();
        }
        if other.repository.is_some() {
            self.repository = other.repository.clone();
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir.clone();
        }
        if other.reports_dir.is_some() {
            self.reports_dir = other.reports_dir.clone();
        }
        if other.request_delay_ms.is_some() {
            self.request_delay_ms = other.request_delay_ms;
        }
        if other.low_water_mark.is_some() {
            self.low_water_mark = other.low_water_mark;
        }
        if other.page_size.is_some() {
            self.page_size = other.page_size;
        }
        if other.max_scan_pages.is_some() {
            self.max_scan_pages = other.max_scan_pages;
        }
        if other.reset_poll_secs.is_some() {
            self.reset_poll_secs = other.reset_poll_secs;
        }
        if other.open_range_miss_limit.is_some() {
            self.open_range_miss_limit = other.open_range_miss_limit;
        }
        if other.known_exceptions.is_some() {
            self.known_exceptions = other.known_exceptions.clone();
        }
    }
}

fn string_node(doc: &KdlDocument, name: &str) -> Option<String> {
    let node = doc.get(name)?;
    let entry = node.entries().first()?;
    entry.value().as_string().map(str::to_string)
}

fn integer_node<T: TryFrom<i128>>(doc: &KdlDocument, name: &str) -> Result<Option<T>> {
    let Some(node) = doc.get(name) else {
        return Ok(None);
    };
    let Some(entry) = node.entries().first() else {
        return Ok(None);
    };
    entry
        .value()
        .as_integer()
        .and_then(|i| T::try_from(i).ok())
        .map(Some)
        .ok_or_else(|| {
            Error::Config(format!(
                "{} expects a non-negative integer, got {}",
                name,
                entry.value()
            ))
        })
}

fn push_string(doc: &mut KdlDocument, name: &str, value: String) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value)));
    doc.nodes_mut().push(node);
}
