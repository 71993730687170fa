use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub project_dir: Option<String>,
    pub db_file: Option<String>,
    pub reference_taxonomy: Option<String>,
    pub visibility_file: Option<String>,
    pub all_categories: Option<bool>,
    pub read_pool_size: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let config: FileConfig = toml::from_str(
            r#"
            project_dir = "/data/project"
            all_categories = true
            "#,
        )
        .unwrap();
        assert_eq!(config.project_dir.as_deref(), Some("/data/project"));
        assert_eq!(config.all_categories, Some(true));
        assert!(config.db_file.is_none());
        assert!(config.read_pool_size.is_none());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/catalog.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
