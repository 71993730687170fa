use super::tree::Taxonomy;
use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INCLUDELIST_FILE_NAME: &str = "category.includelist";

/// Persisted category visibility, keyed by category id.
pub trait VisibilityOverlay: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, bool>>;
    fn persist(&self, entries: &BTreeMap<String, bool>, taxonomy: &Taxonomy) -> Result<()>;
}

/// Plain text overlay file. Each line is `id` (shown) or `~ id` (hidden),
/// optionally followed by a `# comment`. A missing file is an empty overlay.
#[derive(Clone, Debug)]
pub struct IncludelistFile {
    path: PathBuf,
}

impl IncludelistFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(INCLUDELIST_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn parse_includelist(text: &str) -> BTreeMap<String, bool> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = match line.find('#') {
            Some(index) => &line[..index],
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        match line.strip_prefix('~') {
            Some(rest) => {
                let id = rest.trim();
                if id.is_empty() {
                    warn!("Ignoring includelist line without id: {:?}", line);
                } else {
                    entries.insert(id.to_string(), false);
                }
            }
            None => {
                entries.insert(line.to_string(), true);
            }
        }
    }
    entries
}

impl VisibilityOverlay for IncludelistFile {
    fn load(&self) -> Result<BTreeMap<String, bool>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let entries = parse_includelist(&text);
        debug!("Loaded {} visibility entries from {:?}", entries.len(), self.path);
        Ok(entries)
    }

    fn persist(&self, entries: &BTreeMap<String, bool>, taxonomy: &Taxonomy) -> Result<()> {
        let mut text = String::new();
        for (id, visible) in entries {
            let marker = if *visible { "" } else { "~ " };
            match taxonomy.get(id) {
                Some(category) => {
                    let _ = writeln!(text, "{}{}  # {}", marker, id, category.title);
                }
                None => {
                    let _ = writeln!(text, "{}{}", marker, id);
                }
            }
        }
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{Category, ROOT_CATEGORY_ID};
    use tempfile::TempDir;

    #[test]
    fn parse_handles_comments_and_hidden_markers() {
        let entries = parse_includelist(
            "# header\n2  # Health\n~ 2-1  # HIV/Aids\n\n~3\n   \n",
        );
        assert_eq!(entries.get("2"), Some(&true));
        assert_eq!(entries.get("2-1"), Some(&false));
        assert_eq!(entries.get("3"), Some(&false));
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn persist_then_load() {
        let dir = TempDir::new().unwrap();
        let file = IncludelistFile::in_dir(dir.path());
        assert!(file.load().unwrap().is_empty());

        let mut taxonomy = Taxonomy::new(ROOT_CATEGORY_ID, 1);
        taxonomy
            .add_child(ROOT_CATEGORY_ID, Category::new("2", "Health"))
            .unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("2".to_string(), false);
        entries.insert("unknown".to_string(), true);
        file.persist(&entries, &taxonomy).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("~ 2  # Health"));
        assert_eq!(file.load().unwrap(), entries);
    }
}
