use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ops::{SortMode, StatusFilter};

const DEFAULT_RECENT_LIMIT: usize = 5;
const DEFAULT_UPCOMING_DAYS: u64 = 3;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory relative paths resolve against: the config file's directory.
    #[serde(skip)]
    dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub trash_dir: Option<PathBuf>,
    pub default_filter: Option<String>,
    pub default_sort: Option<String>,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    pub recent_limit: Option<usize>,
    pub upcoming_days: Option<u64>,
}

/// `$HOME/.taskpad`, where the database, trash and config live by default.
pub fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".taskpad"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(home_dir()?.join("config.toml"))
}

impl Config {
    /// Load config from `path`, or `~/.taskpad/config.toml` when `None`.
    /// Returns default config if the file doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => Self::load_from(&default_config_path()?),
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        config.dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        // Validate eagerly so a typo surfaces on startup, not on first list.
        config.status_filter()?;
        config.sort_mode()?;
        Ok(config)
    }

    fn resolve(&self, configured: Option<&Path>, default_name: &str) -> PathBuf {
        match configured {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.dir.join(p),
            None => self.dir.join(default_name),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(self.db_path.as_deref(), "taskpad.db")
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.resolve(self.trash_dir.as_deref(), "trash")
    }

    pub fn status_filter(&self) -> Result<StatusFilter> {
        self.default_filter
            .as_deref()
            .map(StatusFilter::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn sort_mode(&self) -> Result<SortMode> {
        self.default_sort
            .as_deref()
            .map(SortMode::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn recent_limit(&self) -> usize {
        self.report.recent_limit.unwrap_or(DEFAULT_RECENT_LIMIT)
    }

    pub fn upcoming_days(&self) -> u64 {
        self.report.upcoming_days.unwrap_or(DEFAULT_UPCOMING_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_returns_default() {
        let config = Config::load_from(Path::new("/nonexistent/taskpad/config.toml")).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/nonexistent/taskpad/taskpad.db"));
        assert_eq!(config.trash_dir(), PathBuf::from("/nonexistent/taskpad/trash"));
        assert_eq!(config.status_filter().unwrap(), StatusFilter::Open);
        assert_eq!(config.sort_mode().unwrap(), SortMode::Auto);
        assert_eq!(config.recent_limit(), 5);
        assert_eq!(config.upcoming_days(), 3);
    }

    #[test]
    fn parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
db_path = "data/todo.db"
trash_dir = "/var/tmp/taskpad-trash"
default_filter = "all"
default_sort = "priority"

[report]
recent_limit = 10
upcoming_days = 7
"#
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.db_path(), dir.path().join("data/todo.db"));
        assert_eq!(config.trash_dir(), PathBuf::from("/var/tmp/taskpad-trash"));
        assert_eq!(config.status_filter().unwrap(), StatusFilter::All);
        assert_eq!(config.sort_mode().unwrap(), SortMode::Priority);
        assert_eq!(config.recent_limit(), 10);
        assert_eq!(config.upcoming_days(), 7);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_pth = \"x.db\"\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn invalid_default_sort_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_sort = \"random\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
