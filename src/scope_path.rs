use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::AppError;

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', '\0', '\n', '\r'];

pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

fn is_absolute_like(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/') || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
}

/// A location inside the document root, in both of its forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPath {
    /// `/`-separated path relative to the root; empty for the root itself.
    pub relative: String,
    pub absolute: PathBuf,
}

impl ScopedPath {
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    pub fn name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or("")
    }
}

/// The boundary every store path is resolved against.
#[derive(Debug, Clone)]
pub struct ScopedRoot {
    root: PathBuf,
}

impl ScopedRoot {
    /// Creates the root directory if needed and pins its canonical location.
    pub fn open(root: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn root(&self) -> ScopedPath {
        ScopedPath {
            relative: String::new(),
            absolute: self.root.clone(),
        }
    }

    /// Resolves a caller-supplied location. Relative input is taken from the
    /// root; absolute input must already point inside it. `..` may not climb
    /// above the root and symlinks may not lead out of it.
    pub fn resolve(&self, path: &str) -> Result<ScopedPath, AppError> {
        if path.contains('\0') {
            return Err(AppError::InvalidArgument(format!(
                "path contains a NUL byte: {path:?}"
            )));
        }

        let normalized = normalize(path.trim());
        let relative_input = if is_absolute_like(&normalized) {
            let root = normalize(&self.root.to_string_lossy());
            if !is_within_scope(&normalized, &root) {
                return Err(AppError::OutOfBounds(path.to_string()));
            }
            normalized[root.len()..].trim_start_matches('/').to_string()
        } else {
            normalized
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in relative_input.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(AppError::OutOfBounds(path.to_string()));
                    }
                }
                name => parts.push(name),
            }
        }

        let absolute = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));
        self.ensure_no_escape(&absolute, path)?;

        Ok(ScopedPath {
            relative: parts.join("/"),
            absolute,
        })
    }

    /// Maps a filesystem location under the root back to its scoped form.
    pub fn scoped(&self, absolute: &Path) -> Result<ScopedPath, AppError> {
        let rest = absolute
            .strip_prefix(&self.root)
            .map_err(|_| AppError::OutOfBounds(absolute.to_string_lossy().to_string()))?;

        let mut parts = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(s) => parts.push(s.to_string_lossy().to_string()),
                Component::CurDir => {}
                _ => return Err(AppError::OutOfBounds(absolute.to_string_lossy().to_string())),
            }
        }

        Ok(ScopedPath {
            relative: parts.join("/"),
            absolute: absolute.to_path_buf(),
        })
    }

    pub fn child(&self, parent: &ScopedPath, name: &str) -> ScopedPath {
        ScopedPath {
            relative: join_relative(&parent.relative, name),
            absolute: parent.absolute.join(name),
        }
    }

    pub fn parent(&self, path: &ScopedPath) -> ScopedPath {
        match path.relative.rsplit_once('/') {
            Some((parent, _)) => ScopedPath {
                relative: parent.to_string(),
                absolute: self.root.join(parent),
            },
            None => self.root(),
        }
    }

    // The deepest existing ancestor decides where a symlink really points.
    fn ensure_no_escape(&self, absolute: &Path, original: &str) -> Result<(), AppError> {
        let mut probe = absolute;
        loop {
            if let Ok(real) = probe.canonicalize() {
                if real.starts_with(&self.root) {
                    return Ok(());
                }
                return Err(AppError::OutOfBounds(original.to_string()));
            }
            match probe.parent() {
                Some(parent) if parent.starts_with(&self.root) => probe = parent,
                _ => return Ok(()),
            }
        }
    }
}

pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Checks a single path segment supplied for a rename, upload or similar.
pub fn validate_file_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidArgument("file name is empty".to_string()));
    }
    if name == "." || name == ".." {
        return Err(AppError::InvalidArgument(format!(
            "file name is reserved: {name}"
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(AppError::InvalidArgument(format!(
            "file name contains forbidden character {c:?}: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scoped_root() -> (TempDir, ScopedRoot) {
        let tmp = TempDir::new().unwrap();
        let root = ScopedRoot::open(&tmp.path().join("dms")).unwrap();
        (tmp, root)
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize("/foo/bar/"), "/foo/bar");
        assert_eq!(normalize("/foo/bar///"), "/foo/bar");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn normalize_converts_backslashes() {
        assert_eq!(normalize("C:\\Users\\test"), "C:/Users/test");
    }

    #[test]
    fn within_scope_child_path() {
        assert!(is_within_scope("/foo/bar/baz", "/foo/bar"));
        assert!(is_within_scope("/foo/bar/", "/foo/bar"));
        assert!(!is_within_scope("/foo/barbaz", "/foo/bar"));
        assert!(!is_within_scope("/foo/other", "/foo/bar"));
    }

    #[test]
    fn open_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a").join("b");
        let root = ScopedRoot::open(&target).unwrap();
        assert!(target.is_dir());
        assert!(root.path().is_absolute());
    }

    #[test]
    fn resolve_relative_paths() {
        let (_tmp, root) = scoped_root();

        let resolved = root.resolve("invoices/2024/jan.pdf").unwrap();
        assert_eq!(resolved.relative, "invoices/2024/jan.pdf");
        assert_eq!(resolved.absolute, root.path().join("invoices/2024/jan.pdf"));
        assert_eq!(resolved.name(), "jan.pdf");

        assert!(root.resolve("").unwrap().is_root());
        assert!(root.resolve("/").is_err());
        assert_eq!(root.resolve("./a/../b\\c/").unwrap().relative, "b/c");
    }

    #[test]
    fn resolve_rejects_climbing_out() {
        let (_tmp, root) = scoped_root();
        assert!(matches!(root.resolve(".."), Err(AppError::OutOfBounds(_))));
        assert!(matches!(
            root.resolve("a/../../etc/passwd"),
            Err(AppError::OutOfBounds(_))
        ));
        assert!(matches!(
            root.resolve("/etc/passwd"),
            Err(AppError::OutOfBounds(_))
        ));
    }

    #[test]
    fn resolve_accepts_absolute_inside_root() {
        let (_tmp, root) = scoped_root();
        let inside = root.path().join("docs").join("a.pdf");
        let resolved = root.resolve(&inside.to_string_lossy()).unwrap();
        assert_eq!(resolved.relative, "docs/a.pdf");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let (tmp, root) = scoped_root();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.path().join("link")).unwrap();

        assert!(matches!(
            root.resolve("link/secret.pdf"),
            Err(AppError::OutOfBounds(_))
        ));
    }

    #[test]
    fn parent_and_child_round_trip() {
        let (_tmp, root) = scoped_root();
        let dir = root.resolve("a/b").unwrap();
        let child = root.child(&dir, "c.pdf");
        assert_eq!(child.relative, "a/b/c.pdf");
        assert_eq!(root.parent(&child), dir);
        assert!(root.parent(&root.resolve("a").unwrap()).is_root());
    }

    #[test]
    fn scoped_maps_absolute_back() {
        let (_tmp, root) = scoped_root();
        let abs = root.path().join("x").join("y.json");
        assert_eq!(root.scoped(&abs).unwrap().relative, "x/y.json");
        assert!(root.scoped(Path::new("/somewhere/else")).is_err());
    }

    #[test]
    fn file_name_validation() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("   ").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("a/b.pdf").is_err());
        assert!(validate_file_name("a\\b.pdf").is_err());
    }
}
