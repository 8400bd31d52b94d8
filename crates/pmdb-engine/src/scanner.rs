//! File scanner (§4.D): walks a directory, classifies files by an ordered
//! glob rule set, and yields scan results without reading file content.

use std::path::Path;

use pmdb_core::{RuleSet, ScanEntry, ScannedFile};
use walkdir::WalkDir;

use crate::time::from_ms;

/// Walks `root`, applying `rules`' hidden/symlink/size-ceiling policy and
/// classification. Non-restartable: consumes the `WalkDir` iterator once.
pub fn scan(root: &Path, rules: &RuleSet) -> Vec<ScanEntry> {
    let mut out = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_hidden_and_disallowed(entry, root, rules));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                out.push(ScanEntry::Unreadable {
                    relative_path: path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        // Symlinks are never recorded, whether to a file or a directory.
        if entry.path_is_symlink() {
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = match entry.path().strip_prefix(root) {
            Ok(p) => path_to_slash(p),
            Err(_) => continue,
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                out.push(ScanEntry::Unreadable {
                    relative_path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        if metadata.len() > rules.max_file_bytes {
            continue;
        }

        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        out.push(ScanEntry::File(ScannedFile {
            type_tag: classify(&relative_path, rules),
            relative_path,
            absolute_path: entry.path().to_path_buf(),
            size: metadata.len(),
            mtime: from_ms(mtime_ms),
        }));
    }

    out
}

fn is_hidden_and_disallowed(entry: &walkdir::DirEntry, root: &Path, rules: &RuleSet) -> bool {
    if entry.path() == root {
        return false;
    }
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    if !name.starts_with('.') {
        return false;
    }
    !rules.hidden_allow_list.iter().any(|allowed| allowed == name)
}

fn path_to_slash(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// First-match classification on `rules.rules`. A pattern containing `/` is
/// matched against the full relative path with `**`/`*` glob semantics; a
/// bare pattern (no `/`) is matched against the basename only, at any depth.
pub fn classify(relative_path: &str, rules: &RuleSet) -> String {
    let basename = relative_path.rsplit('/').next().unwrap_or(relative_path);

    for (pattern, tag) in &rules.rules {
        let matched = if pattern.contains('/') {
            glob_match(pattern, relative_path)
        } else {
            match_segment(pattern, basename)
        };
        if matched {
            return tag.clone();
        }
    }

    "unknown".to_string()
}

/// Public-facing glob match used by `file.list(project, glob?)`; same
/// `**`/`*` semantics as classification, applied to the full path.
pub(crate) fn glob_match_public(pattern: &str, path: &str) -> bool {
    glob_match(pattern, path)
}

fn glob_match(pattern: &str, path: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let path_segs: Vec<&str> = path.split('/').collect();
    match_segments(&pat_segs, &path_segs)
}

fn match_segments(pat: &[&str], path: &[&str]) -> bool {
    match pat.first() {
        None => path.is_empty(),
        Some(&"**") => {
            if pat.len() == 1 {
                return true;
            }
            (0..=path.len()).any(|i| match_segments(&pat[1..], &path[i..]))
        }
        Some(seg) => {
            !path.is_empty() && match_segment(seg, path[0]) && match_segments(&pat[1..], &path[1..])
        }
    }
}

fn match_segment(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(ext) = pattern.strip_prefix("*.") {
        return value
            .rsplit_once('.')
            .is_some_and(|(_, actual_ext)| actual_ext == ext);
    }
    pattern == value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::RuleSet;
    use std::fs;

    #[test]
    fn classify_by_extension() {
        let rules = RuleSet::default_rules();
        assert_eq!(classify("src/main.rs", &rules), "source");
        assert_eq!(classify("README.md", &rules), "markup");
        assert_eq!(classify("vendor/Cargo.lock", &rules), "config");
        assert_eq!(classify("data.bin", &rules), "unknown");
    }

    #[test]
    fn skips_symlinks_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), b"ref").unwrap();
        fs::write(dir.path().join(".gitignore"), b"*.log").unwrap();

        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("a.txt"), dir.path().join("link.txt")).unwrap();

        let rules = RuleSet::default_rules();
        let entries = scan(dir.path(), &rules);
        let files: Vec<_> = entries
            .into_iter()
            .filter_map(|e| match e {
                ScanEntry::File(f) => Some(f.relative_path),
                ScanEntry::Unreadable { .. } => None,
            })
            .collect();

        assert!(files.contains(&"a.txt".to_string()));
        assert!(files.contains(&".gitignore".to_string()));
        assert!(!files.iter().any(|p| p.starts_with(".git/")));
        assert!(!files.contains(&"link.txt".to_string()));
    }

    #[test]
    fn skips_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), vec![0u8; 100]).unwrap();
        let mut rules = RuleSet::default_rules();
        rules.max_file_bytes = 10;
        let entries = scan(dir.path(), &rules);
        assert!(entries.is_empty());
    }
}
