use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use talkingbook_catalog::config::{AppConfig, CliConfig, FileConfig};
use talkingbook_catalog::metadata_store::{MetadataStore, SqliteMetadataStore};
use talkingbook_catalog::search::{FacetIndex, SearchQuery};
use talkingbook_catalog::taxonomy::{
    MigrationStatus, Taxonomy, TaxonomyHandle, VisibilityOverlay,
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Project directory holding the catalog database and overlay files.
    #[clap(long, value_parser = parse_path)]
    pub project_dir: Option<PathBuf>,

    /// Path to the SQLite catalog database, defaults to catalog.db in the project directory.
    #[clap(long, value_parser = parse_path)]
    pub db_file: Option<PathBuf>,

    /// Reference taxonomy YAML to migrate to instead of the built-in one.
    #[clap(long, value_parser = parse_path)]
    pub reference_taxonomy: Option<PathBuf>,

    /// Category visibility overlay file.
    #[clap(long, value_parser = parse_path)]
    pub visibility_file: Option<PathBuf>,

    /// Show every category, ignoring the visibility overlay.
    #[clap(long)]
    pub all_categories: bool,

    /// Number of read connections to the database.
    #[clap(long)]
    pub read_pool_size: Option<usize>,

    /// Print results as JSON.
    #[clap(long)]
    pub json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the category tree.
    Tree {
        /// Locale of the titles to print.
        #[clap(long)]
        locale: Option<String>,
    },

    /// Creates the taxonomy or migrates it to the reference revision.
    Migrate,

    /// Prints per-category and per-language counts of matching audio items.
    Facets {
        #[clap(long)]
        text: Option<String>,
        #[clap(long = "category")]
        categories: Vec<String>,
        #[clap(long = "language")]
        languages: Vec<String>,
        #[clap(long)]
        playlist: Option<String>,
    },

    /// Lists playlists and their audio items in order.
    Playlists,

    /// Makes a category and its descendants visible.
    Show { category_id: String },

    /// Hides a category and its descendants.
    Hide { category_id: String },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            project_dir: self.project_dir.clone(),
            db_file: self.db_file.clone(),
            reference_taxonomy: self.reference_taxonomy.clone(),
            visibility_file: self.visibility_file.clone(),
            all_categories: self.all_categories,
            read_pool_size: self.read_pool_size,
        }
    }
}

fn print_tree(taxonomy: &Taxonomy, id: &str, depth: usize, locale: Option<&str>) {
    let Some(category) = taxonomy.get(id) else {
        return;
    };
    let title = match locale {
        Some(locale) => category.title_for(locale),
        None => category.title.as_str(),
    };
    let mut flags = String::new();
    if !category.visible {
        flags.push_str(" (hidden)");
    }
    if category.non_assignable {
        flags.push_str(" (not assignable)");
    }
    println!("{}{} {}{}", "  ".repeat(depth), category.id, title, flags);
    for child in taxonomy.children(id) {
        print_tree(taxonomy, &child.id, depth + 1, locale);
    }
}

fn set_visibility(
    handle: &mut TaxonomyHandle,
    store: &SqliteMetadataStore,
    overlay: &dyn VisibilityOverlay,
    category_id: &str,
    visible: bool,
) -> Result<()> {
    // A reload after a concurrent commit drops the overlay applied at
    // startup, so every attempt applies it again.
    let entries = overlay.load()?;
    handle.update(store, |taxonomy| {
        if !entries.is_empty() {
            taxonomy.apply_visibility_overlay(&entries);
        }
        taxonomy.set_visible(category_id, visible)
    })?;
    let taxonomy = handle.taxonomy();
    overlay.persist(&taxonomy.visibility_overlay(), taxonomy)?;
    info!(
        "Category {} is now {}",
        category_id,
        if visible { "visible" } else { "hidden" }
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening SQLite catalog database at {:?}...", config.db_file);
    let store = SqliteMetadataStore::new(&config.db_file, config.read_pool_size)?;

    let reference = config.load_reference_taxonomy()?;
    let (mut handle, status) = TaxonomyHandle::load_or_migrate(&store, &reference)?;
    if let MigrationStatus::Failed { reason, .. } = &status {
        warn!("Continuing with the stored taxonomy: {}", reason);
    }

    let overlay = config.visibility_overlay();
    handle.apply_visibility(&overlay, config.all_categories)?;

    match cli_args.command {
        Command::Tree { locale } => {
            let taxonomy = handle.taxonomy();
            print_tree(taxonomy, taxonomy.root_id(), 0, locale.as_deref());
        }
        Command::Migrate => match status {
            MigrationStatus::UpToDate { revision } => {
                println!("Taxonomy is up to date at revision {}", revision)
            }
            MigrationStatus::Created { revision } => {
                println!("Created taxonomy at revision {}", revision)
            }
            MigrationStatus::Migrated { from, to } => {
                println!("Migrated taxonomy from revision {} to {}", from, to)
            }
            MigrationStatus::Failed { from, to, reason } => {
                bail!("Migration from revision {} to {} failed: {}", from, to, reason)
            }
        },
        Command::Facets {
            text,
            categories,
            languages,
            playlist,
        } => {
            let mut query = SearchQuery {
                text,
                playlist,
                ..Default::default()
            };
            for category in categories {
                query = query.with_category(category);
            }
            for language in languages {
                query = query.with_language(language);
            }
            let mut facets = FacetIndex::new(query);
            let result = facets.result(&store)?;
            if cli_args.json {
                println!("{}", serde_json::to_string_pretty(result)?);
            } else {
                println!("{} matching audio items", result.len());
                let taxonomy = handle.taxonomy();
                for category in taxonomy.iter() {
                    let count = result.facet_count(&category.id);
                    if count > 0 && taxonomy.is_displayable(&category.id) {
                        println!("  {:<12} {:>6}  {}", category.id, count, category.title);
                    }
                }
                for (language, count) in result.language_facets() {
                    println!("  [{}] {:>6}", language, count);
                }
            }
        }
        Command::Playlists => {
            let playlists = store.get_playlists()?;
            if cli_args.json {
                println!("{}", serde_json::to_string_pretty(&playlists)?);
            } else {
                for playlist in playlists {
                    println!("{} ({}, {} items)", playlist.name, playlist.id, playlist.len());
                    for (audio_item_id, position) in playlist.positions() {
                        let title = store
                            .get_audio_item(audio_item_id)?
                            .map(|item| item.title().to_string())
                            .unwrap_or_default();
                        println!("  {:>3}. {} {}", position + 1, audio_item_id, title);
                    }
                }
            }
        }
        Command::Show { category_id } | Command::Hide { category_id } if config.all_categories => {
            bail!(
                "Cannot change visibility of {} while showing all categories",
                category_id
            );
        }
        Command::Show { category_id } => {
            set_visibility(&mut handle, &store, &overlay, &category_id, true)?;
        }
        Command::Hide { category_id } => {
            set_visibility(&mut handle, &store, &overlay, &category_id, false)?;
        }
    }

    Ok(())
}
