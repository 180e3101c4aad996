//! Canonical path handling for intercepted Windows-style paths.
//!
//! Games running under Wine/Proton issue file operations with Windows paths
//! (`C:\Game\Data\armor.dds`, case-insensitive). All lookup structures in this
//! crate key on one canonical form:
//! - NFC Unicode normalization (precomposed and decomposed forms must match)
//! - upper case (lookups are case-insensitive by contract)
//! - a single `\` separator
//! - no trailing separator
//!
//! Physical paths (mod folders on the host file system) are never folded;
//! the host file system may be case-sensitive. Only map keys are canonical.

use std::path::Path;

use unicode_normalization::UnicodeNormalization;

/// Canonical directory separator used by every map key.
pub const SEPARATOR: char = '\\';

/// Canonicalize a logical path: NFC, upper case, `\` separators, no trailing
/// separator. `c:/game/Data\` -> `C:\GAME\DATA`.
pub fn canonicalize(path: &str) -> String {
    let folded: String = path.nfc().collect::<String>().to_uppercase();
    let mut out = String::with_capacity(folded.len());
    for ch in folded.chars() {
        out.push(if ch == '/' { SEPARATOR } else { ch });
    }
    while out.ends_with(SEPARATOR) {
        out.pop();
    }
    out
}

/// Fold a single path component (file or folder name) into key form.
pub fn fold_component(name: &str) -> String {
    name.nfc().collect::<String>().to_uppercase()
}

/// Split a canonical path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Split a canonical path at the last separator into (directory, file name).
/// A path with no separator is all file name.
pub fn split_file(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Join a canonical directory and a component. Either side may be empty.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}{SEPARATOR}{name}")
    }
}

/// Split a native path string at its last separator (either kind) into
/// (directory, file name). Physical target paths are stored as given, so
/// both `/mods/x/a.dds` and `D:\Mods\X\a.dds` must split correctly.
pub fn split_native_file(path: &str) -> (&str, &str) {
    match path.rfind(['\\', '/']) {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Canonical relative key of `full` below `root`, both native paths.
/// Returns `None` if `full` does not sit under `root`.
/// `/mods/x` + `/mods/x/Textures/Armor` -> `TEXTURES\ARMOR`.
pub fn relative_key(root: &Path, full: &Path) -> Option<String> {
    let relative = full.strip_prefix(root).ok()?;
    let mut key = String::new();
    for component in relative.components() {
        let part = component.as_os_str().to_string_lossy();
        if !key.is_empty() {
            key.push(SEPARATOR);
        }
        key.push_str(&fold_component(&part));
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("c:/game/Data"), "C:\\GAME\\DATA");
        assert_eq!(canonicalize("C:\\Game\\data\\"), "C:\\GAME\\DATA");
        assert_eq!(canonicalize("armor.dds"), "ARMOR.DDS");
    }

    #[test]
    fn test_canonicalize_unicode_forms_match() {
        let precomposed = "C:\\Jeux\\Donn\u{00e9}es";
        let decomposed = "C:\\Jeux\\Donne\u{0301}es";
        assert_eq!(canonicalize(precomposed), canonicalize(decomposed));
    }

    #[test]
    fn test_segments() {
        let parts: Vec<&str> = segments("C:\\GAME\\DATA").collect();
        assert_eq!(parts, vec!["C:", "GAME", "DATA"]);
        assert_eq!(segments("").count(), 0);
    }

    #[test]
    fn test_split_file() {
        assert_eq!(split_file("C:\\GAME\\ARMOR.DDS"), ("C:\\GAME", "ARMOR.DDS"));
        assert_eq!(split_file("ARMOR.DDS"), ("", "ARMOR.DDS"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("C:\\GAME", "ARMOR.DDS"), "C:\\GAME\\ARMOR.DDS");
        assert_eq!(join("", "ARMOR.DDS"), "ARMOR.DDS");
        assert_eq!(join("C:\\GAME", ""), "C:\\GAME");
    }

    #[test]
    fn test_split_native_file() {
        assert_eq!(split_native_file("/mods/x/a.dds"), ("/mods/x", "a.dds"));
        assert_eq!(split_native_file("D:\\Mods\\a.dds"), ("D:\\Mods", "a.dds"));
        assert_eq!(split_native_file("a.dds"), ("", "a.dds"));
    }

    #[test]
    fn test_relative_key() {
        let root = PathBuf::from("/mods/x");
        let full = PathBuf::from("/mods/x/Textures/Armor");
        assert_eq!(
            relative_key(&root, &full),
            Some("TEXTURES\\ARMOR".to_string())
        );
        assert_eq!(relative_key(&root, &root), Some(String::new()));
        assert_eq!(relative_key(&root, &PathBuf::from("/other")), None);
    }
}
