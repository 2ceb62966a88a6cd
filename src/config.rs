use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Runtime settings for the demo server.
///
/// Read from an optional YAML file named by `NETCORE_CONFIG`, then
/// overridden by `PORT`, `LOG_LEVEL`, `TLS_CERT` and `TLS_KEY`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            tls: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("NETCORE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Applies overrides from `lookup`. TLS is only overridden when both
    /// the certificate and the key are given.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("invalid PORT value {port:?}"))?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }

        match (lookup("TLS_CERT"), lookup("TLS_KEY")) {
            (Some(cert), Some(key)) => {
                self.tls = Some(TlsConfig {
                    cert_path: cert.into(),
                    key_path: key.into(),
                });
            }
            (None, None) => {}
            _ => anyhow::bail!("TLS_CERT and TLS_KEY must be set together"),
        }

        Ok(())
    }
}
