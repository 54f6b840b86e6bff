use std::env;

/// Database configuration.
///
/// Reads from the `FITPLAN_DATABASE_URL` environment variable, falling back to
/// `postgresql://localhost:5432/fitplan` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/fitplan";

    /// Pool size used when `FITPLAN_DB_MAX_CONNECTIONS` is unset or invalid.
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

    /// Build a config from the environment.
    ///
    /// Priority: `FITPLAN_DATABASE_URL` env var, then the compile-time default.
    /// The pool size comes from `FITPLAN_DB_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let database_url = env::var("FITPLAN_DATABASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        let max_connections = env::var("FITPLAN_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_MAX_CONNECTIONS)
            .max(1);
        Self {
            database_url,
            max_connections,
        }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL cannot be parsed or has no path component.
    pub fn database_name(&self) -> Option<&str> {
        // URLs look like: postgresql://host:port/dbname or postgres://host:port/dbname
        self.database_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
    }

    /// Override the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// URL of the `postgres` maintenance database on the same server, used
    /// to issue `CREATE DATABASE`.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.database_url, "postgresql://localhost:5432/fitplan");
    }

    #[test]
    fn database_name_extraction() {
        let cfg = DbConfig::new("postgresql://localhost:5432/fitplan_dev");
        assert_eq!(cfg.database_name(), Some("fitplan_dev"));
    }

    #[test]
    fn maintenance_url_replaces_db() {
        let cfg = DbConfig::new("postgresql://localhost:5432/fitplan");
        assert_eq!(
            cfg.maintenance_url(),
            "postgresql://localhost:5432/postgres"
        );
    }

    #[test]
    fn max_connections_is_at_least_one() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL).with_max_connections(0);
        assert_eq!(cfg.max_connections, 1);
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn explicit_new() {
        let cfg = DbConfig::new("postgresql://remotehost:5433/other");
        assert_eq!(cfg.database_url, "postgresql://remotehost:5433/other");
        assert_eq!(cfg.database_name(), Some("other"));
    }
}
