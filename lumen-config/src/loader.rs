use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};

use crate::models::LumenConfig;

pub const CONFIG_PATH_VAR: &str = "LUMEN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "LUMEN_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "lumen.toml",
    "lumen.json",
    "config/lumen.toml",
    "config/lumen.json",
];

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("defaults"),
            ConfigSource::EnvPath(path) => write!(f, "${CONFIG_PATH_VAR} ({})", path.display()),
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_VAR}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl LumenConfig {
    /// Loads the configuration.
    /// Evaluation order:
    /// 1) `$LUMEN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$LUMEN_CONFIG_JSON` (inline JSON),
    /// 3) the first default file found in the working directory,
    /// 4) defaults.
    ///
    /// The result is validated before it is returned.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|name| env::var(name).ok(), Path::new("."))
    }

    /// Same as [`LumenConfig::load_from_env`] with an injectable variable
    /// lookup and search directory.
    pub fn load_with(
        var: impl Fn(&str) -> Option<String>,
        search_dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        let (config, source) = Self::load_unvalidated(var, search_dir)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration from {source}"))?;
        log::debug!("configuration loaded; source={}", source);
        Ok((config, source))
    }

    fn load_unvalidated(
        var: impl Fn(&str) -> Option<String>,
        search_dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path_str) = var(CONFIG_PATH_VAR)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = var(CONFIG_JSON_VAR)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(search_dir) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid config {}", path.display()))?,
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err))?,
            _ => Self::parse_from_str(&contents, &path.display().to_string())?,
        };

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to render config as toml")
    }

    fn find_default_file(search_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| search_dir.join(candidate))
            .find(|path| path.exists())
    }
}
