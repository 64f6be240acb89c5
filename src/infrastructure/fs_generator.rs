//! Directory listing generator backed by walkdir.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};
use walkdir::{DirEntry, WalkDir};

use crate::config::{EntryFilter, Settings};
use crate::domain::generator::DEFAULT_INITIAL_EXPANSION_DEPTH;
use crate::domain::{empty_stream, EntityKey, GeneratorError, Item, ItemStream, TreeGenerator, Value};
use crate::infrastructure::error::{InfraError, InfraResult};

pub const COLUMN_NAME: usize = 0;
pub const COLUMN_KIND: usize = 1;
pub const COLUMN_SIZE: usize = 2;

const COLUMN_TITLES: [&str; 3] = ["Name", "Kind", "Size"];

/// Lists one directory level per call.
///
/// Keys are entry paths below the canonical base directory; an entry whose
/// canonical path differs (a symlink) carries it as alias, so links
/// deduplicate against their targets.
#[derive(Debug, Clone)]
pub struct FsGenerator {
    base: PathBuf,
    filter: EntryFilter,
    initial_depth: usize,
    dirs_first: bool,
}

impl FsGenerator {
    pub fn new(base: &Path) -> InfraResult<Self> {
        if !base.is_dir() {
            return Err(InfraError::NotADirectory(base.to_path_buf()));
        }
        let base = base
            .canonicalize()
            .map_err(|e| InfraError::io(format!("canonicalize {}", base.display()), e))?;
        Ok(Self {
            base,
            filter: EntryFilter::default(),
            initial_depth: DEFAULT_INITIAL_EXPANSION_DEPTH,
            dirs_first: false,
        })
    }

    pub fn from_settings(base: &Path, settings: &Settings) -> InfraResult<Self> {
        Ok(Self {
            filter: settings.entry_filter(),
            initial_depth: settings.initial_depth,
            ..Self::new(base)?
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn with_initial_depth(mut self, depth: usize) -> Self {
        self.initial_depth = depth;
        self
    }

    /// Keep directories ahead of files (sorts by the kind column).
    pub fn with_dirs_first(mut self, enabled: bool) -> Self {
        self.dirs_first = enabled;
        self
    }

    pub fn with_hidden(mut self, show: bool) -> Self {
        self.filter.show_hidden = show;
        self
    }

    fn directory_of(&self, key: &EntityKey) -> Option<PathBuf> {
        match key {
            EntityKey::Null => Some(self.base.clone()),
            EntityKey::Name(path) => Some(PathBuf::from(path.as_ref())),
            EntityKey::Id(_) => None,
        }
    }
}

fn to_item(entry: &DirEntry) -> Item {
    let path = entry.path();
    let name = entry.file_name().to_string_lossy().to_string();
    let file_type = entry.file_type();

    let (kind, size) = if file_type.is_dir() {
        ("dir", Value::Empty)
    } else if file_type.is_symlink() {
        ("link", Value::Empty)
    } else {
        let size = entry
            .metadata()
            .map(|m| Value::Int(i64::try_from(m.len()).unwrap_or(i64::MAX)))
            .unwrap_or_default();
        ("file", size)
    };

    let item = Item::new(path, vec![Value::Text(name), kind.into(), size]);
    match fs::canonicalize(path) {
        Ok(canonical) if canonical != path => {
            trace!(path = %path.display(), canonical = %canonical.display(), "aliased entry");
            item.with_alias(canonical.as_path())
        }
        _ => item,
    }
}

impl TreeGenerator for FsGenerator {
    fn num_columns(&self) -> usize {
        COLUMN_TITLES.len()
    }

    fn column_title(&self, column: usize) -> String {
        COLUMN_TITLES
            .get(column)
            .map(|t| t.to_string())
            .unwrap_or_default()
    }

    fn name(&self) -> String {
        self.base.display().to_string()
    }

    #[instrument(level = "debug", skip(self))]
    fn children(&self, parent: &EntityKey) -> ItemStream {
        let Some(dir) = self.directory_of(parent) else {
            return empty_stream();
        };
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "not a directory, no children");
            return empty_stream();
        }

        let filter = self.filter.clone();
        let entries = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => {
                    let skipped = filter.is_ignored(&entry.file_name().to_string_lossy());
                    (!skipped).then(|| Ok(to_item(&entry)))
                }
                Err(e) => Some(Err(GeneratorError::new(e.to_string()))),
            });
        Box::new(entries)
    }

    fn initial_expansion_depth(&self) -> usize {
        self.initial_depth
    }

    fn sort_column(&self) -> Option<usize> {
        self.dirs_first.then_some(COLUMN_KIND)
    }
}
