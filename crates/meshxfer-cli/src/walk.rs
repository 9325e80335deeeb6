//! Turn CLI file/directory arguments into a flat list of send entries
//! with relative paths, skipping directory entries that match an
//! exclude pattern before they're ever laid out on the stream.

use meshxfer_core::SendEntry;
use std::path::Path;

/// Returns `true` if any path component matches one of `patterns`
/// exactly (the Python source's venv/cache skip list, generalized to
/// an arbitrary configurable list).
fn is_excluded(path: &Path, patterns: &[String]) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        patterns.iter().any(|p| p == name.as_ref())
    })
}

/// Collect every file under `root` (or just `root` itself if it's a
/// file) into `SendEntry` values, with paths relative to `root`'s
/// parent when `root` is a single file, or relative to `root` itself
/// when it's a directory.
pub fn collect_entries(root: &Path, exclude_patterns: &[String]) -> std::io::Result<Vec<SendEntry>> {
    let mut entries = Vec::new();

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let size = root.metadata()?.len();
        entries.push(SendEntry {
            absolute_path: root.to_path_buf(),
            relative_path: name,
            size,
        });
        return Ok(entries);
    }

    walk_dir(root, root, exclude_patterns, &mut entries)?;
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

fn walk_dir(
    base: &Path,
    dir: &Path,
    exclude_patterns: &[String],
    out: &mut Vec<SendEntry>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if is_excluded(&path, exclude_patterns) {
            tracing::debug!(path = %path.display(), "skipping excluded entry");
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(base, &path, exclude_patterns, out)?;
        } else if file_type.is_file() {
            let relative_path = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let size = entry.metadata()?.len();
            out.push(SendEntry {
                absolute_path: path,
                relative_path,
                size,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn single_file_yields_one_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hi").unwrap();

        let entries = collect_entries(&path, &[]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "note.txt");
        assert_eq!(entries[0].size, 2);
    }

    #[test]
    fn directory_recursion_is_sorted_and_relative() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), b"123").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();

        let entries = collect_entries(dir.path(), &[]).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a/b/c.txt", "top.txt"]);
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".venv/lib")).unwrap();
        std::fs::write(dir.path().join(".venv/lib/pkg.py"), b"x").unwrap();
        std::fs::write(dir.path().join("main.py"), b"y").unwrap();

        let entries = collect_entries(dir.path(), &[".venv".to_string()]).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["main.py"]);
    }
}
