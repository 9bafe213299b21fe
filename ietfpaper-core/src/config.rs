//! Configuration system for ietfpaper.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> environment -> explicit overrides. The workspace
//! file lives at `.ietfpaper/config.toml` next to the paper sources.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable the `ietfdata` tooling reads to point at a
/// datatracker mirror. Honoured here too.
pub const DATATRACKER_URL_ENV: &str = "IETFDATA_DT_URL";

/// Top-level configuration for a paper build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperConfig {
    pub paths: PathsConfig,
    pub datatracker: DatatrackerConfig,
    pub rfc_index: RfcIndexConfig,
    pub mail: MailConfig,
    pub http: HttpConfig,
    pub build: BuildConfig,
    pub document: DocumentConfig,
}

/// Where artifacts live, relative to the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub downloads_dir: PathBuf,
    pub results_dir: PathBuf,
    pub figures_dir: PathBuf,
    /// Pipeline definition overriding the built-in one, if present.
    pub pipeline_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            results_dir: PathBuf::from("results"),
            figures_dir: PathBuf::from("figures"),
            pipeline_file: PathBuf::from("paper.yaml"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatatrackerConfig {
    pub base_url: String,
    /// How long a paged API dump stays valid before it is fetched again.
    pub cache_max_age_secs: u64,
}

impl Default for DatatrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://datatracker.ietf.org/".to_string(),
            cache_max_age_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfcIndexConfig {
    pub url: String,
}

impl Default for RfcIndexConfig {
    fn default() -> Self {
        Self {
            url: "https://www.rfc-editor.org/rfc-index.xml".to_string(),
        }
    }
}

/// IMAP mail archive settings. The IETF archive accepts anonymous logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    /// Number of messages requested per FETCH command.
    pub fetch_chunk: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_host: "imap.ietf.org".to_string(),
            imap_port: 993,
            username: "anonymous".to_string(),
            password: "anonymous".to_string(),
            fetch_chunk: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 15,
            user_agent: format!("ietfpaper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum number of rules running at once. Downloads are always serial.
    pub jobs: usize,
    /// Default timeout for external commands in seconds.
    pub command_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            command_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// LaTeX sources scanned by the document checks.
    pub sources: Vec<PathBuf>,
    /// Anonymous submissions must not carry an acknowledgements section.
    pub anonymous: bool,
    /// Check report, written by `ietfpaper check` and the `check-paper` rule.
    pub report: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            sources: vec![PathBuf::from("paper.tex")],
            anonymous: false,
            report: PathBuf::from("results/paper-checks.txt"),
        }
    }
}

impl PaperConfig {
    /// Check the configuration for values that will not work, returning
    /// one human-readable warning per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.build.jobs == 0 {
            warnings.push("build.jobs must be at least 1".to_string());
        }
        if self.mail.fetch_chunk == 0 {
            warnings.push("mail.fetch_chunk must be at least 1".to_string());
        }
        if url::Url::parse(&self.datatracker.base_url).is_err() {
            warnings.push(format!(
                "datatracker.base_url is not a valid URL: {}",
                self.datatracker.base_url
            ));
        }
        if !self.datatracker.base_url.ends_with('/') {
            warnings.push("datatracker.base_url should end with '/'".to_string());
        }
        if url::Url::parse(&self.rfc_index.url).is_err() {
            warnings.push(format!(
                "rfc_index.url is not a valid URL: {}",
                self.rfc_index.url
            ));
        }
        if self.document.sources.is_empty() {
            warnings.push("document.sources is empty; document checks will fail".to_string());
        }
        warnings
    }
}

/// Load configuration by merging all sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `IETFPAPER_`, plus `IETFDATA_DT_URL`)
/// 3. Workspace-local config (`.ietfpaper/config.toml`)
/// 4. User config (`~/.config/ietfpaper/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&PaperConfig>,
) -> Result<PaperConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(PaperConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("org", "ietfpaper", "ietfpaper") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".ietfpaper").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // IETFDATA_DT_URL=... -> datatracker.base_url
    if let Ok(url) = std::env::var(DATATRACKER_URL_ENV) {
        figment = figment.merge(Serialized::default("datatracker.base_url", url));
    }

    // IETFPAPER_BUILD__JOBS, IETFPAPER_MAIL__IMAP_HOST, etc.
    figment = figment.merge(Env::prefixed("IETFPAPER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load a configuration from an explicit TOML file layered over defaults.
pub fn load_config_file(path: &Path) -> Result<PaperConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(PaperConfig::default()))
        .merge(Toml::file(path))
        .extract()
        .map_err(Box::new)
}
