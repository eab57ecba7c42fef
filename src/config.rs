use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

/// Which render path turns raw capture bytes into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RenderEngine {
    /// Full terminal emulation (source of truth).
    Emulator,
    /// Escape-stripping heuristic (lower fidelity, faster).
    Strip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_engine")]
    pub engine: RenderEngine,
    #[serde(default = "default_cols")]
    pub cols: usize,
    #[serde(default = "default_rows")]
    pub rows: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// Top-level configuration: where session logs live, how captures are
/// rendered, and which prompt markers delimit user turns.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub render: RenderConfig,
    /// Prompt marker prefixes, in priority order (first match wins).
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            render: RenderConfig::default(),
            markers: default_markers(),
        }
    }
}

fn default_engine() -> RenderEngine {
    RenderEngine::Emulator
}

fn default_cols() -> usize {
    120
}

fn default_rows() -> usize {
    50
}

fn default_markers() -> Vec<String> {
    vec!["❯".to_string(), "> ".to_string()]
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ai_shell_logs")
}

pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ttyscribe")
        .join("config.toml")
}

/// Load `~/.config/ttyscribe/config.toml`, falling back to defaults when it
/// does not exist. A present-but-broken config is an error, not a silent
/// fallback.
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config at {}", path.display()))
}

impl Config {
    pub fn app_dir(&self, app: &str) -> PathBuf {
        self.base_dir.join(app)
    }

    pub fn sessions_dir(&self, app: &str) -> PathBuf {
        self.app_dir(app).join("sessions")
    }

    /// Archive directory for raw captures after successful conversion.
    pub fn raw_dir(&self, app: &str) -> PathBuf {
        self.app_dir(app).join("raw")
    }

    pub fn index_path(&self, app: &str) -> PathBuf {
        self.app_dir(app).join("sessions-index.json")
    }

    pub fn ensure_app_dirs(&self, app: &str) -> Result<()> {
        for dir in [self.app_dir(app), self.sessions_dir(app), self.raw_dir(app)] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.render.engine, RenderEngine::Emulator);
        assert_eq!(config.render.cols, 120);
        assert_eq!(config.render.rows, 50);
        assert_eq!(config.markers, vec!["❯", "> "]);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [render]
            engine = "strip"
            cols = 80
            "#,
        )
        .unwrap();
        assert_eq!(config.render.engine, RenderEngine::Strip);
        assert_eq!(config.render.cols, 80);
        assert_eq!(config.render.rows, 50);
        assert_eq!(config.markers, vec!["❯", "> "]);
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.render.cols, 120);
    }

    #[test]
    fn test_broken_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "render = 5").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn test_app_paths() {
        let mut config = Config::default();
        config.base_dir = PathBuf::from("/data/logs");
        assert_eq!(
            config.index_path("ollama"),
            PathBuf::from("/data/logs/ollama/sessions-index.json")
        );
        assert_eq!(
            config.sessions_dir("ollama"),
            PathBuf::from("/data/logs/ollama/sessions")
        );
    }
}
