mod file_config;

pub use file_config::FileConfig;

use crate::taxonomy::{IncludelistFile, ReferenceTaxonomy, INCLUDELIST_FILE_NAME};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

pub const DEFAULT_DB_FILE_NAME: &str = "catalog.db";
pub const DEFAULT_READ_POOL_SIZE: usize = 2;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub project_dir: Option<PathBuf>,
    pub db_file: Option<PathBuf>,
    pub reference_taxonomy: Option<PathBuf>,
    pub visibility_file: Option<PathBuf>,
    pub all_categories: bool,
    pub read_pool_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_dir: PathBuf,
    pub db_file: PathBuf,
    /// Explicit reference taxonomy file. When unset the newer of the
    /// built-in taxonomy and the project's `lb_taxonomy.yaml` is used.
    pub reference_taxonomy: Option<PathBuf>,
    pub visibility_file: PathBuf,
    pub all_categories: bool,
    pub read_pool_size: usize,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let project_dir = file
            .project_dir
            .map(PathBuf::from)
            .or_else(|| cli.project_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "project_dir must be specified via --project-dir or in config file"
                )
            })?;

        if !project_dir.exists() {
            bail!("Project directory does not exist: {:?}", project_dir);
        }
        if !project_dir.is_dir() {
            bail!("project_dir is not a directory: {:?}", project_dir);
        }

        let db_file = file
            .db_file
            .map(PathBuf::from)
            .or_else(|| cli.db_file.clone())
            .unwrap_or_else(|| project_dir.join(DEFAULT_DB_FILE_NAME));

        let reference_taxonomy = file
            .reference_taxonomy
            .map(PathBuf::from)
            .or_else(|| cli.reference_taxonomy.clone());
        if let Some(path) = &reference_taxonomy {
            if !path.is_file() {
                bail!("Reference taxonomy file not found: {:?}", path);
            }
        }

        let visibility_file = file
            .visibility_file
            .map(PathBuf::from)
            .or_else(|| cli.visibility_file.clone())
            .unwrap_or_else(|| project_dir.join(INCLUDELIST_FILE_NAME));

        let all_categories = file.all_categories.unwrap_or(cli.all_categories);

        let read_pool_size = file
            .read_pool_size
            .or(cli.read_pool_size)
            .unwrap_or(DEFAULT_READ_POOL_SIZE);
        if read_pool_size == 0 {
            bail!("read_pool_size must be at least 1");
        }

        Ok(Self {
            project_dir,
            db_file,
            reference_taxonomy,
            visibility_file,
            all_categories,
            read_pool_size,
        })
    }

    pub fn load_reference_taxonomy(&self) -> Result<ReferenceTaxonomy> {
        match &self.reference_taxonomy {
            Some(path) => ReferenceTaxonomy::load_file(path)
                .with_context(|| format!("Failed to load reference taxonomy {:?}", path)),
            None => ReferenceTaxonomy::load_latest(Some(&self.project_dir))
                .context("Failed to load reference taxonomy"),
        }
    }

    pub fn visibility_overlay(&self) -> IncludelistFile {
        IncludelistFile::new(self.visibility_file.clone())
    }
}
