//! Precedence resolution for the mirror configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`PRM_REPOSITORY`, `PRM_DATA_DIR`,
//!    `PRM_API_BASE_URL`, `GITHUB_TOKEN`)
//! 3. Config file (`--config` / `PRM_CONFIG`, else `./prm.kdl`)
//! 4. Built-in defaults
//!
//! Environment lookups go through a caller-supplied function so resolution
//! can be tested without touching the process environment.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::config::schema::{MirrorFileConfig, Repository};
use crate::config::{DEFAULT_API_BASE_URL, DEFAULT_KNOWN_EXCEPTIONS, MirrorConfig};
use crate::{Error, Result};

/// Environment variable naming the repository (`owner/name`).
pub const REPOSITORY_ENV: &str = "PRM_REPOSITORY";
/// Environment variable overriding the local store root.
pub const DATA_DIR_ENV: &str = "PRM_DATA_DIR";
/// Environment variable overriding the API base URL.
pub const API_BASE_URL_ENV: &str = "PRM_API_BASE_URL";
/// Environment variable holding the API token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "prm.kdl";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config file
    File(PathBuf),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File(path) => write!(f, "file:{}", path.display()),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub repository: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub token: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Config file that was read, if any
    pub config_file: Option<PathBuf>,
    pub api_base_url: Resolved<String>,
    pub repository: Option<Resolved<Repository>>,
    pub data_dir: Resolved<PathBuf>,
    pub reports_dir: Resolved<PathBuf>,
    pub request_delay_ms: Resolved<u64>,
    pub low_water_mark: Resolved<u64>,
    pub page_size: Resolved<u32>,
    pub max_scan_pages: Resolved<u32>,
    pub reset_poll_secs: Resolved<u64>,
    pub open_range_miss_limit: Resolved<u64>,
    pub known_exceptions: Resolved<BTreeSet<u64>>,
    #[serde(skip)]
    pub token: Option<Resolved<String>>,
}

impl ResolvedConfig {
    /// Get the masked token for display purposes.
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_ref().map(|r| mask_token(&r.value))
    }

    pub fn token_source(&self) -> Option<&ValueSource> {
        self.token.as_ref().map(|r| &r.source)
    }

    /// Drop source tracking.
    pub fn into_config(self) -> MirrorConfig {
        MirrorConfig {
            api_base_url: self.api_base_url.value,
            repository: self.repository.map(|r| r.value),
            token: self.token.map(|r| r.value),
            data_dir: self.data_dir.value,
            reports_dir: self.reports_dir.value,
            request_delay: Duration::from_millis(self.request_delay_ms.value),
            low_water_mark: self.low_water_mark.value,
            page_size: self.page_size.value,
            max_scan_pages: self.max_scan_pages.value,
            reset_poll: Duration::from_secs(self.reset_poll_secs.value),
            open_range_miss_limit: self.open_range_miss_limit.value,
            known_exceptions: self.known_exceptions.value,
        }
    }
}

/// Show the first and last four characters only.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        format!("{}...", chars.iter().take(4).collect::<String>())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Locate the config file: explicit path (must exist), else `./prm.kdl` if present.
pub fn locate_config_file(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) if path.is_file() => Ok(Some(path.to_path_buf())),
        Some(path) => Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        ))),
        None => {
            let candidate = cwd.join(DEFAULT_CONFIG_FILE);
            Ok(candidate.is_file().then_some(candidate))
        }
    }
}

/// Resolve from the process environment and working directory.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir()?;
    let file = locate_config_file(overrides.config_path.as_deref(), &cwd)?;
    let file_config = match file {
        Some(ref path) => MirrorFileConfig::load(path)?,
        None => MirrorFileConfig::new(),
    };
    resolve_with(overrides, file.as_deref(), &file_config, &|name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    })
}

/// Resolve with an explicit file config and environment lookup.
pub fn resolve_with(
    overrides: &ConfigOverrides,
    file_path: Option<&Path>,
    file: &MirrorFileConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file_source = || match file_path {
        Some(path) => ValueSource::File(path.to_path_buf()),
        None => ValueSource::Default,
    };
    let env_source = |name: &str| ValueSource::EnvVar(name.to_string());

    let api_base_url = if let Some(ref url) = overrides.api_base_url {
        Resolved::new(url.clone(), ValueSource::CliFlag)
    } else if let Some(url) = env(API_BASE_URL_ENV) {
        Resolved::new(url, env_source(API_BASE_URL_ENV))
    } else if let Some(ref url) = file.api_base_url {
        Resolved::new(url.clone(), file_source())
    } else {
        Resolved::new(DEFAULT_API_BASE_URL.to_string(), ValueSource::Default)
    };
    let api_base_url = Resolved::new(
        api_base_url.value.trim_end_matches('/').to_string(),
        api_base_url.source,
    );

    let repository = if let Some(ref repo) = overrides.repository {
        Some(Resolved::new(parse_repository(repo)?, ValueSource::CliFlag))
    } else if let Some(repo) = env(REPOSITORY_ENV) {
        Some(Resolved::new(parse_repository(&repo)?, env_source(REPOSITORY_ENV)))
    } else {
        file.repository
            .clone()
            .map(|repo| Resolved::new(repo, file_source()))
    };

    let data_dir = if let Some(ref dir) = overrides.data_dir {
        Resolved::new(dir.clone(), ValueSource::CliFlag)
    } else if let Some(dir) = env(DATA_DIR_ENV) {
        Resolved::new(PathBuf::from(dir), env_source(DATA_DIR_ENV))
    } else {
        from_file(file.data_dir.clone(), file_source, PathBuf::from("data/prs"))
    };

    let token = if let Some(ref token) = overrides.token {
        Some(Resolved::new(token.clone(), ValueSource::CliFlag))
    } else {
        env(GITHUB_TOKEN_ENV).map(|t| Resolved::new(t, env_source(GITHUB_TOKEN_ENV)))
    };

    Ok(ResolvedConfig {
        config_file: file_path.map(Path::to_path_buf),
        api_base_url,
        repository,
        data_dir,
        reports_dir: from_file(file.reports_dir.clone(), file_source, PathBuf::from("reports")),
        request_delay_ms: from_file(file.request_delay_ms, file_source, 500),
        low_water_mark: from_file(file.low_water_mark, file_source, 10),
        page_size: from_file(file.page_size, file_source, 100),
        max_scan_pages: from_file(file.max_scan_pages, file_source, 100),
        reset_poll_secs: from_file(file.reset_poll_secs, file_source, 5),
        open_range_miss_limit: from_file(file.open_range_miss_limit, file_source, 20),
        known_exceptions: from_file(
            file.known_exceptions.clone(),
            file_source,
            DEFAULT_KNOWN_EXCEPTIONS.into_iter().collect(),
        ),
        token,
    })
}

fn from_file<T>(value: Option<T>, source: impl Fn() -> ValueSource, default: T) -> Resolved<T> {
    match value {
        Some(value) => Resolved::new(value, source()),
        None => Resolved::new(default, ValueSource::Default),
    }
}

fn parse_repository(s: &str) -> Result<Repository> {
    Repository::parse(s)
        .ok_or_else(|| Error::Config(format!("repository must be owner/name, got {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_value_source_display() {
        assert_eq!(ValueSource::CliFlag.to_string(), "cli");
        assert_eq!(
            ValueSource::EnvVar("PRM_DATA_DIR".into()).to_string(),
            "env:PRM_DATA_DIR"
        );
        assert_eq!(ValueSource::File("prm.kdl".into()).to_string(), "file:prm.kdl");
        assert_eq!(ValueSource::Default.to_string(), "default");
    }

    #[test]
    fn test_resolve_defaults() {
        let resolved =
            resolve_with(&ConfigOverrides::new(), None, &MirrorFileConfig::new(), &env_of(&[]))
                .unwrap();

        assert_eq!(resolved.api_base_url.value, "https://api.github.com");
        assert_eq!(resolved.api_base_url.source, ValueSource::Default);
        assert!(resolved.repository.is_none());
        assert!(resolved.token.is_none());
        assert_eq!(resolved.low_water_mark.value, 10);
        assert_eq!(resolved.page_size.value, 100);
        assert_eq!(resolved.open_range_miss_limit.value, 20);
        assert_eq!(
            resolved.known_exceptions.value,
            [181, 182, 194, 215, 802, 931, 1803].into_iter().collect()
        );

        let config = resolved.into_config();
        assert_eq!(config.request_delay, Duration::from_millis(500));
        assert_eq!(config.reset_poll, Duration::from_secs(5));
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let path = PathBuf::from("/etc/prm.kdl");
        let file = MirrorFileConfig {
            repository: Repository::parse("file/repo"),
            data_dir: Some(PathBuf::from("file-dir")),
            api_base_url: Some("http://file".to_string()),
            low_water_mark: Some(25),
            ..Default::default()
        };
        let env = env_of(&[
            (REPOSITORY_ENV, "env/repo"),
            (DATA_DIR_ENV, "env-dir"),
        ]);
        let overrides = ConfigOverrides::new().with_repository("cli/repo");

        let resolved = resolve_with(&overrides, Some(&path), &file, &env).unwrap();

        let repo = resolved.repository.unwrap();
        assert_eq!(repo.value.to_string(), "cli/repo");
        assert_eq!(repo.source, ValueSource::CliFlag);
        assert_eq!(resolved.data_dir.value, PathBuf::from("env-dir"));
        assert_eq!(resolved.data_dir.source, ValueSource::EnvVar(DATA_DIR_ENV.into()));
        assert_eq!(resolved.api_base_url.value, "http://file");
        assert_eq!(resolved.api_base_url.source, ValueSource::File(path.clone()));
        assert_eq!(resolved.low_water_mark.value, 25);
        assert_eq!(resolved.page_size.source, ValueSource::Default);
    }

    #[test]
    fn test_api_base_url_trailing_slash_trimmed() {
        let overrides = ConfigOverrides::new().with_api_base_url("http://localhost:9000/");
        let resolved =
            resolve_with(&overrides, None, &MirrorFileConfig::new(), &env_of(&[])).unwrap();
        assert_eq!(resolved.api_base_url.value, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_repository_from_env_is_error() {
        let result = resolve_with(
            &ConfigOverrides::new(),
            None,
            &MirrorFileConfig::new(),
            &env_of(&[(REPOSITORY_ENV, "bad")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_token_from_env_and_cli() {
        let env = env_of(&[(GITHUB_TOKEN_ENV, "ghp_abcdefghijklmnop")]);
        let resolved =
            resolve_with(&ConfigOverrides::new(), None, &MirrorFileConfig::new(), &env).unwrap();
        assert_eq!(
            resolved.token_source(),
            Some(&ValueSource::EnvVar(GITHUB_TOKEN_ENV.into()))
        );
        assert_eq!(resolved.masked_token().unwrap(), "ghp_...mnop");

        let overrides = ConfigOverrides::new().with_token("short");
        let resolved = resolve_with(&overrides, None, &MirrorFileConfig::new(), &env).unwrap();
        assert_eq!(resolved.token_source(), Some(&ValueSource::CliFlag));
        assert_eq!(resolved.masked_token().unwrap(), "shor...");
    }

    #[test]
    fn test_token_never_serialized() {
        let overrides = ConfigOverrides::new().with_token("ghp_secretsecretsecret");
        let resolved =
            resolve_with(&overrides, None, &MirrorFileConfig::new(), &env_of(&[])).unwrap();
        let json = serde_json::to_string(&resolved).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_locate_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(locate_config_file(None, dir.path()).unwrap(), None);

        let missing = dir.path().join("missing.kdl");
        assert!(matches!(
            locate_config_file(Some(&missing), dir.path()),
            Err(Error::Config(_))
        ));

        let default = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&default, "page-size 10\n").unwrap();
        assert_eq!(locate_config_file(None, dir.path()).unwrap(), Some(default));
    }
}
