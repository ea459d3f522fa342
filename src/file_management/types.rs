use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workspace directory tree: name to `None` for a file, or the nested tree of a directory.
///
/// Serializes as a bare JSON object, e.g. `{"src": {"main.js": null}, "app.js": null}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileTree {
    entries: BTreeMap<String, Option<FileTree>>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&Option<FileTree>> {
        self.entries.get(name)
    }

    /// Adds an entry at `components`, creating missing parent directories.
    ///
    /// A directory never turns back into a file.
    pub fn insert(&mut self, components: &[&str], is_dir: bool) {
        let Some((last, parents)) = components.split_last() else {
            return;
        };

        let mut current = self;
        for part in parents {
            let slot = current
                .entries
                .entry(part.to_string())
                .or_insert_with(|| Some(FileTree::new()));
            if slot.is_none() {
                *slot = Some(FileTree::new());
            }
            current = match slot {
                Some(tree) => tree,
                None => return,
            };
        }

        let slot = current.entries.entry(last.to_string()).or_insert(None);
        if is_dir && slot.is_none() {
            *slot = Some(FileTree::new());
        }
    }

    /// Looks an entry up by a `/`-separated path relative to the root.
    pub fn lookup(&self, path: &str) -> Option<&Option<FileTree>> {
        let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
        let mut current = self;
        while let Some(part) = parts.next() {
            let entry = current.entries.get(part)?;
            if parts.peek().is_none() {
                return Some(entry);
            }
            current = entry.as_ref()?;
        }
        None
    }
}

/// What `create` makes at the requested path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    #[serde(alias = "directory")]
    Folder,
}
