//! Configuration file management for fitplan.
//!
//! Provides a TOML-based config file at `~/.config/fitplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use fitplan_db::config::DbConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the fitplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/fitplan` or `~/.config/fitplan`,
/// including on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("fitplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("fitplan")
}

/// Return the path to the fitplan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file holds database credentials, so it is made owner-only on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct FitplanConfig {
    pub db_config: DbConfig,
    pub server: ServerSection,
}

impl FitplanConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `FITPLAN_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Pool size: `FITPLAN_DB_MAX_CONNECTIONS` (when it parses) > `database.max_connections` > default
    /// - Server: `[server]` section > `127.0.0.1:3000` (the `serve` flags override both)
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("FITPLAN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let mut db_config = DbConfig::new(db_url);
        let env_max = std::env::var("FITPLAN_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok());
        if let Some(n) = env_max.or(file_config.as_ref().and_then(|c| c.database.max_connections)) {
            db_config = db_config.with_max_connections(n);
        }

        let server = file_config.map(|c| c.server).unwrap_or_default();

        Ok(Self { db_config, server })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point `XDG_CONFIG_HOME` at `dir` for the duration of `f`.
    fn with_config_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let orig = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", dir) };
        let result = f();
        match orig {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        result
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();

        let loaded = with_config_home(tmp.path(), || {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://testhost:5432/testdb".to_string(),
                    max_connections: Some(12),
                },
                server: ServerSection {
                    bind: "0.0.0.0".into(),
                    port: 8080,
                },
            })
            .unwrap();
            load_config().unwrap()
        });

        assert_eq!(loaded.database.url, "postgresql://testhost:5432/testdb");
        assert_eq!(loaded.database.max_connections, Some(12));
        assert_eq!(loaded.server.port, 8080);
        assert!(tmp.path().join("fitplan/config.toml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();

        with_config_home(tmp.path(), || {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: DbConfig::DEFAULT_URL.to_string(),
                    max_connections: None,
                },
                server: ServerSection::default(),
            })
            .unwrap();
        });

        let meta = std::fs::metadata(tmp.path().join("fitplan/config.toml")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn server_section_is_optional() {
        let cfg: ConfigFile = toml::from_str("[database]\nurl = \"postgresql://x/y\"\n").unwrap();
        assert_eq!(cfg.server, ServerSection::default());
        assert_eq!(cfg.database.max_connections, None);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("FITPLAN_DATABASE_URL", "postgresql://env:5432/envdb") };
        let config = FitplanConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        unsafe { std::env::remove_var("FITPLAN_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::remove_var("FITPLAN_DB_MAX_CONNECTIONS") };

        let config = with_config_home(tmp.path(), || {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://file:5432/filedb".into(),
                    max_connections: Some(3),
                },
                server: ServerSection::default(),
            })
            .unwrap();
            unsafe { std::env::set_var("FITPLAN_DATABASE_URL", "postgresql://env:5432/envdb") };
            let config = FitplanConfig::resolve(None).unwrap();
            unsafe { std::env::remove_var("FITPLAN_DATABASE_URL") };
            config
        });

        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.db_config.max_connections, 3);
    }

    #[test]
    fn resolve_ignores_unparsable_pool_size_env() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::remove_var("FITPLAN_DATABASE_URL") };

        let config = with_config_home(tmp.path(), || {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://file:5432/filedb".into(),
                    max_connections: Some(7),
                },
                server: ServerSection::default(),
            })
            .unwrap();
            unsafe { std::env::set_var("FITPLAN_DB_MAX_CONNECTIONS", "lots") };
            let config = FitplanConfig::resolve(None).unwrap();
            unsafe { std::env::remove_var("FITPLAN_DB_MAX_CONNECTIONS") };
            config
        });

        assert_eq!(config.db_config.max_connections, 7);
    }

    #[test]
    fn resolve_reads_config_file() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::remove_var("FITPLAN_DATABASE_URL") };

        let config = with_config_home(tmp.path(), || {
            save_config(&ConfigFile {
                database: DatabaseSection {
                    url: "postgresql://file:5432/filedb".into(),
                    max_connections: None,
                },
                server: ServerSection {
                    bind: "0.0.0.0".into(),
                    port: 9000,
                },
            })
            .unwrap();
            FitplanConfig::resolve(None).unwrap()
        });

        assert_eq!(config.db_config.database_url, "postgresql://file:5432/filedb");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::remove_var("FITPLAN_DATABASE_URL") };
        unsafe { std::env::remove_var("FITPLAN_DB_MAX_CONNECTIONS") };

        let config = with_config_home(tmp.path(), || FitplanConfig::resolve(None).unwrap());
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.server, ServerSection::default());
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("fitplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
