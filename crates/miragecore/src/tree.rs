//! Mutable prefix trie from canonical path segments to redirection values.
//!
//! One node per path segment (drive, then subdirectories); each node carries
//! a map of file names to values. Lookup cost is one map probe per segment.
//! Paths must already be canonical (see [`crate::paths`]); the trie does no
//! folding of its own.

use std::collections::HashMap;

use crate::paths;

/// One trie level: child segments and the files stored at this directory.
#[derive(Debug, Clone, Default)]
pub struct TreeNode<T> {
    children: HashMap<String, TreeNode<T>>,
    items: HashMap<String, T>,
}

impl<T> TreeNode<T> {
    fn new() -> Self {
        TreeNode {
            children: HashMap::new(),
            items: HashMap::new(),
        }
    }

    pub fn children(&self) -> &HashMap<String, TreeNode<T>> {
        &self.children
    }

    pub fn items(&self) -> &HashMap<String, T> {
        &self.items
    }
}

/// Mutable redirection trie. The root represents the empty path.
#[derive(Debug, Clone)]
pub struct RedirectionTree<T> {
    root: TreeNode<T>,
}

impl<T> Default for RedirectionTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RedirectionTree<T> {
    pub fn new() -> Self {
        RedirectionTree {
            root: TreeNode::new(),
        }
    }

    pub fn root(&self) -> &TreeNode<T> {
        &self.root
    }

    /// Walk to the node for `dir`, creating levels as needed.
    fn walk_or_create(&mut self, dir: &str) -> &mut TreeNode<T> {
        let mut node = &mut self.root;
        for segment in paths::segments(dir) {
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(TreeNode::new);
        }
        node
    }

    /// Insert one full file path. The last segment is the file name; the
    /// segments before it are the directory walk.
    pub fn add_path(&mut self, path: &str, value: T) {
        let (dir, name) = paths::split_file(path);
        if name.is_empty() {
            return;
        }
        self.walk_or_create(dir).items.insert(name.to_string(), value);
    }

    /// Insert many files under one directory with a single walk. Bulk folder
    /// registration would otherwise re-walk the directory prefix per file.
    pub fn add_folder_paths(&mut self, dir: &str, files: impl IntoIterator<Item = (String, T)>) {
        let node = self.walk_or_create(dir);
        for (name, value) in files {
            node.items.insert(name, value);
        }
    }

    /// The file map of `dir`, or `None` if any segment is missing.
    pub fn try_get_folder(&self, dir: &str) -> Option<&HashMap<String, T>> {
        let mut node = &self.root;
        for segment in paths::segments(dir) {
            node = node.children.get(segment)?;
        }
        Some(&node.items)
    }

    /// Resolve one full file path.
    pub fn try_get_file(&self, path: &str) -> Option<&T> {
        let (dir, name) = paths::split_file(path);
        self.try_get_folder(dir)?.get(name)
    }

    /// Walk as far as segments match and return the deepest node reached,
    /// along with how many segments matched.
    pub fn resolve_partial(&self, path: &str) -> (&TreeNode<T>, usize) {
        let mut node = &self.root;
        let mut matched = 0;
        for segment in paths::segments(path) {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    matched += 1;
                }
                None => break,
            }
        }
        (node, matched)
    }

    /// Deepest item whose own path is a prefix of `path`.
    ///
    /// Used to find the registration covering a changed file: registrations
    /// are inserted as full paths (`add_path`), and a change event deep below
    /// one of them resolves to the innermost covering entry.
    pub fn longest_item_match(&self, path: &str) -> Option<&T> {
        let mut node = &self.root;
        let mut found = None;
        for segment in paths::segments(path) {
            if let Some(item) = node.items.get(segment) {
                found = Some(item);
            }
            match node.children.get(segment) {
                Some(child) => node = child,
                None => break,
            }
        }
        found
    }
}
