use crate::config::types::Config;
use anyhow::{Context, Result};
use log::{debug, trace};
use std::path::Path;

impl Config {
    /// Load and validate configuration from a JSON file.
    /// A missing, unreadable or invalid file is an error; there is no fallback config.
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading config from: {}", path.display());
        let content = tokio::fs::read_to_string(path).await.with_context(|| format!("Cannot read config file {}", path.display()))?;
        let mut config = Self::from_json(&content).with_context(|| format!("Invalid config file {}", path.display()))?;
        config.path = path.to_owned();
        trace!("Loaded config: {:#?}", config);
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config = serde_json::from_str::<Config>(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_try_load_sets_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "forward_table": [ {{ "match": "default", "host": "127.0.0.1", "port": 8080 }} ] }}"#).unwrap();

        let config = Config::try_load(file.path()).await.unwrap();
        assert_eq!(config.get_path(), file.path());
        assert_eq!(config.get_forward_table().len(), 1);
    }

    #[tokio::test]
    async fn test_try_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::try_load(dir.path().join("absent.json")).await.unwrap_err();
        assert!(err.to_string().contains("Cannot read config file"));
    }

    #[tokio::test]
    async fn test_try_load_without_default_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "forward_table": [ {{ "match": "a.example.com", "port": 8081 }} ] }}"#).unwrap();

        let err = Config::try_load(file.path()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("default"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(Config::from_json("not json").is_err());
    }
}
