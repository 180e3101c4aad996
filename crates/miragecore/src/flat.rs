//! Flattened lookup structure built once from a redirection trie.
//!
//! Deployments root every redirected path under one common base (the game's
//! install directory), so most of the trie's depth is a single-child chain.
//! Collapsing that chain into one stored prefix turns the per-segment walk
//! into a prefix compare plus one flat map probe. This matters on the hot path
//! of every intercepted file operation.

use std::collections::HashMap;

use crate::paths::{self, SEPARATOR};
use crate::tree::{RedirectionTree, TreeNode};

/// Outcome of a fast append into an already-built [`FlatLookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastAppend {
    /// Entry inserted; no rebuild needed.
    Inserted,
    /// The file name already exists at that directory. Priority between the
    /// old and new entry cannot be decided locally; the caller must rebuild.
    Collision,
    /// The directory is outside the stored prefix; the prefix would need to
    /// be recomputed. The caller must rebuild.
    OutsidePrefix,
}

/// Immutable-by-convention flat lookup: a shared path prefix plus a map from
/// relative subfolder to its file map. Lookups never mutate; the only write
/// path is [`FlatLookup::try_append`], invoked under the owner's write lock.
#[derive(Debug, Clone)]
pub struct FlatLookup<T> {
    prefix: String,
    folders: HashMap<String, HashMap<String, T>>,
}

impl<T: Clone> FlatLookup<T> {
    /// Flatten a trie: walk down while each node has exactly one child and no
    /// files, accumulating the shared prefix, then flatten every remaining
    /// subtree that holds files.
    pub fn from_tree(tree: &RedirectionTree<T>) -> Self {
        let mut prefix = String::new();
        let mut node = tree.root();
        while node.items().is_empty() && node.children().len() == 1 {
            let (segment, child) = node.children().iter().next().expect("len checked");
            if !prefix.is_empty() {
                prefix.push(SEPARATOR);
            }
            prefix.push_str(segment);
            node = child;
        }

        let mut folders = HashMap::new();
        Self::flatten(node, String::new(), &mut folders);
        FlatLookup { prefix, folders }
    }

    fn flatten(node: &TreeNode<T>, relative: String, out: &mut HashMap<String, HashMap<String, T>>) {
        if !node.items().is_empty() {
            out.insert(relative.clone(), node.items().clone());
        }
        for (segment, child) in node.children() {
            Self::flatten(child, paths::join(&relative, segment), out);
        }
    }
}

impl<T> FlatLookup<T> {
    /// The longest path common to every stored path.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of stored subfolder keys.
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Relative key of `dir` below the prefix, or `None` if `dir` is not
    /// under it. The match must end on a segment boundary: `C:\KITTENS` is
    /// not under the prefix `C:\KITTEN`.
    fn relative<'a>(&self, dir: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(dir);
        }
        let rest = dir.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("")
        } else {
            rest.strip_prefix(SEPARATOR)
        }
    }

    /// The file map of a canonical directory path.
    pub fn try_get_folder(&self, dir: &str) -> Option<&HashMap<String, T>> {
        self.folders.get(self.relative(dir)?)
    }

    /// Resolve one canonical file path.
    pub fn try_get_file(&self, path: &str) -> Option<&T> {
        let (dir, name) = paths::split_file(path);
        self.try_get_folder(dir)?.get(name)
    }

    /// Append one file without a rebuild, when that is provably safe: the
    /// directory must sit under the stored prefix (known or new subfolder
    /// key alike) and the name must not collide with an existing entry.
    pub fn try_append(&mut self, dir: &str, name: &str, value: T) -> FastAppend {
        let relative = match self.relative(dir) {
            Some(rel) => rel.to_string(),
            None => return FastAppend::OutsidePrefix,
        };
        let files = self.folders.entry(relative).or_default();
        if files.contains_key(name) {
            return FastAppend::Collision;
        }
        files.insert(name.to_string(), value);
        FastAppend::Inserted
    }
}
