//! Redirection targets and directory-string interning.
//!
//! A target is where one logical file actually lives on disk. Mod folders
//! routinely contain thousands of files under a handful of subfolders, so
//! directory strings are interned: every target under the same subfolder
//! shares one allocation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The physical location a logical path resolves to.
///
/// `directory` is a native, case-preserved absolute directory path;
/// `file_name` is the case-preserved on-disk name. Joining the two always
/// yields a valid absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectionTarget {
    directory: Arc<str>,
    file_name: String,
}

impl RedirectionTarget {
    pub fn new(directory: Arc<str>, file_name: impl Into<String>) -> Self {
        RedirectionTarget {
            directory,
            file_name: file_name.into(),
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full native path to the real file.
    pub fn full_path(&self) -> PathBuf {
        PathBuf::from(&*self.directory).join(&self.file_name)
    }
}

/// Interning pool for target directory strings.
///
/// Unlike a global pool handing out `&'static str`, this one hands out
/// `Arc<str>`: a pool dropped together with its folder redirection releases
/// the strings once the last target is gone.
#[derive(Debug, Default)]
pub struct DirPool {
    entries: HashMap<String, Arc<str>>,
}

impl DirPool {
    pub fn new() -> Self {
        DirPool::default()
    }

    /// Intern a directory string, returning the shared copy.
    pub fn intern(&mut self, directory: &str) -> Arc<str> {
        if let Some(existing) = self.entries.get(directory) {
            return existing.clone();
        }
        let shared: Arc<str> = Arc::from(directory);
        self.entries.insert(directory.to_string(), shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path() {
        let mut pool = DirPool::new();
        let dir = pool.intern("/mods/x/Textures");
        let target = RedirectionTarget::new(dir, "Armor.dds");
        assert_eq!(target.full_path(), PathBuf::from("/mods/x/Textures/Armor.dds"));
    }

    #[test]
    fn test_intern_shares_allocation() {
        let mut pool = DirPool::new();
        let a = pool.intern("/mods/x/Textures");
        let b = pool.intern("/mods/x/Textures");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);

        let c = pool.intern("/mods/x/Meshes");
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }
}
