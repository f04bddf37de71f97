//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use keel_core::audit::AuditConfig;
use keel_core::repo::Committer;
use keel_core::KeelConfig;

#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the repository, audit files and proposal index (KEEL_DATA_DIR)
    pub data_dir: PathBuf,
    /// HTTP port (KEEL_PORT)
    pub port: u16,
    /// Attempts per audit append (KEEL_AUDIT_RETRIES)
    pub audit_retries: u32,
    /// Base delay between audit attempts (KEEL_AUDIT_BACKOFF_MS)
    pub audit_backoff: Duration,
    /// Commit signature (KEEL_COMMIT_NAME, KEEL_COMMIT_EMAIL)
    pub committer: Committer,
    /// Bearer token required by the HTTP API when set (KEEL_API_KEY)
    pub api_key: Option<String>,
    /// Allowed CORS origins, comma-separated (KEEL_CORS_ORIGINS)
    pub cors_origins: Option<Vec<String>>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match var("KEEL_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let port = parse_var(&var, "KEEL_PORT")?.unwrap_or(3000);
        let audit_retries = parse_var(&var, "KEEL_AUDIT_RETRIES")?.unwrap_or(3);
        let backoff_ms: u64 = parse_var(&var, "KEEL_AUDIT_BACKOFF_MS")?.unwrap_or(25);

        let defaults = Committer::default();
        let committer = Committer {
            name: var("KEEL_COMMIT_NAME").unwrap_or(defaults.name),
            email: var("KEEL_COMMIT_EMAIL").unwrap_or(defaults.email),
        };

        let api_key = var("KEEL_API_KEY").filter(|k| !k.is_empty());
        let cors_origins = var("KEEL_CORS_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect());

        Ok(Self {
            data_dir,
            port,
            audit_retries,
            audit_backoff: Duration::from_millis(backoff_ms),
            committer,
            api_key,
            cors_origins,
        })
    }

    pub fn keel_config(&self) -> KeelConfig {
        KeelConfig {
            data_dir: self.data_dir.clone(),
            committer: self.committer.clone(),
            audit: AuditConfig {
                max_attempts: self.audit_retries.max(1),
                backoff: self.audit_backoff,
            },
        }
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "keel")
        .context("Could not determine data directory; set KEEL_DATA_DIR")?;
    Ok(dirs.data_dir().to_path_buf())
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("Invalid {name}: {raw:?}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[("KEEL_DATA_DIR", "/tmp/keel")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/keel"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.audit_retries, 3);
        assert_eq!(config.audit_backoff, Duration::from_millis(25));
        assert_eq!(config.committer.name, "keel");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("KEEL_DATA_DIR", "/srv/keel"),
            ("KEEL_PORT", "8080"),
            ("KEEL_AUDIT_RETRIES", "5"),
            ("KEEL_AUDIT_BACKOFF_MS", "10"),
            ("KEEL_COMMIT_NAME", "PMO Bot"),
            ("KEEL_COMMIT_EMAIL", "pmo@example.com"),
            ("KEEL_API_KEY", "secret"),
            ("KEEL_CORS_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.keel_config().audit.max_attempts, 5);
        assert_eq!(config.committer.email, "pmo@example.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(
            config.cors_origins,
            Some(vec!["https://a.example".to_string(), "https://b.example".to_string()])
        );
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = Config::from_lookup(lookup(&[("KEEL_DATA_DIR", "/x"), ("KEEL_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("KEEL_PORT"));
    }
}
