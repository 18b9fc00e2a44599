//! A document is one primary content file plus its OCR sidecar, sharing a
//! base name. Every mutation here sequences the two files so that a sidecar
//! never outlives its primary; a primary without a sidecar is fine and simply
//! reads as "not OCR'd yet".

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::StoreConfig;
use crate::error::AppError;
use crate::models::ocr::OcrCache;
use crate::scope_path::{join_relative, ScopedPath};

const COPY_SUFFIX: &str = " - copy";

/// The extensions that tell primaries and sidecars apart.
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    primary_extension: String,
    sidecar_extension: String,
}

impl DocumentLayout {
    pub fn new(primary_extension: &str, sidecar_extension: &str) -> Self {
        Self {
            primary_extension: primary_extension.to_lowercase(),
            sidecar_extension: sidecar_extension.to_lowercase(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.primary_extension, &config.sidecar_extension)
    }

    pub fn primary_extension(&self) -> &str {
        &self.primary_extension
    }

    pub fn is_primary(&self, path: &Path) -> bool {
        has_extension(path, &self.primary_extension)
    }

    pub fn is_sidecar(&self, path: &Path) -> bool {
        has_extension(path, &self.sidecar_extension)
    }

    /// `name` with the primary extension appended unless it already ends in it.
    pub fn with_primary_extension(&self, name: &str) -> String {
        if has_extension(Path::new(name), &self.primary_extension) {
            name.to_string()
        } else {
            format!("{name}.{}", self.primary_extension)
        }
    }

    /// The document a primary, a sidecar, or an extensionless base path refers to.
    pub fn locate(&self, path: &ScopedPath) -> Document {
        let name = path.name();
        let file = Path::new(name);
        let stem = if self.is_primary(file) || self.is_sidecar(file) {
            file.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| name.to_string())
        } else {
            name.to_string()
        };

        let parent_relative = match path.relative.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        let parent_absolute = path
            .absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.absolute.clone());

        self.in_directory(
            &ScopedPath {
                relative: parent_relative,
                absolute: parent_absolute,
            },
            &stem,
        )
    }

    pub fn in_directory(&self, dir: &ScopedPath, stem: &str) -> Document {
        Document {
            stem: stem.to_string(),
            primary: artifact_in(dir, stem, &self.primary_extension),
            sidecar: artifact_in(dir, stem, &self.sidecar_extension),
        }
    }

    /// The first free document slot for `stem` in `dir`: `stem`, then
    /// `stem - copy`, `stem - copy (2)`, `stem - copy (3)`, ...
    pub fn vacant_in(&self, dir: &ScopedPath, stem: &str) -> Document {
        let candidate = self.in_directory(dir, stem);
        if candidate.is_vacant() {
            return candidate;
        }

        let first = format!("{stem}{COPY_SUFFIX}");
        let candidate = self.in_directory(dir, &first);
        if candidate.is_vacant() {
            return candidate;
        }

        let mut n = 2u32;
        loop {
            let candidate = self.in_directory(dir, &format!("{stem}{COPY_SUFFIX} ({n})"));
            if candidate.is_vacant() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// `stem.ext` in `dir`. An existing file whose extension differs only in
/// case (`Scan.PDF`) is used under its real name.
fn artifact_in(dir: &ScopedPath, stem: &str, ext: &str) -> ScopedPath {
    let canonical = format!("{stem}.{ext}");
    let name = if dir.absolute.join(&canonical).is_file() {
        canonical
    } else {
        existing_spelling(&dir.absolute, stem, ext).unwrap_or(canonical)
    };
    ScopedPath {
        relative: join_relative(&dir.relative, &name),
        absolute: dir.absolute.join(&name),
    }
}

fn existing_spelling(dir: &Path, stem: &str, ext: &str) -> Option<String> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| {
            let path = Path::new(name);
            path.file_stem().and_then(|s| s.to_str()) == Some(stem) && has_extension(path, ext)
        })
        .min()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    stem: String,
    primary: ScopedPath,
    sidecar: ScopedPath,
}

impl Document {
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn primary(&self) -> &ScopedPath {
        &self.primary
    }

    pub fn sidecar(&self) -> &ScopedPath {
        &self.sidecar
    }

    pub fn exists(&self) -> bool {
        self.primary.absolute.is_file()
    }

    pub fn has_sidecar(&self) -> bool {
        self.sidecar.absolute.is_file()
    }

    fn is_vacant(&self) -> bool {
        !self.primary.absolute.exists() && !self.sidecar.absolute.exists()
    }

    /// Copies the primary, then the sidecar if there is one, and points the
    /// copied sidecar at its new primary.
    pub fn copy_to(&self, dest: &Document) -> Result<(), AppError> {
        fs::copy(&self.primary.absolute, &dest.primary.absolute)
            .map_err(|e| AppError::from_io(e, &self.primary.relative))?;

        if self.has_sidecar() {
            fs::copy(&self.sidecar.absolute, &dest.sidecar.absolute)
                .map_err(|e| AppError::from_io(e, &self.sidecar.relative))?;
            dest.sync_sidecar_path()?;
        }
        Ok(())
    }

    /// Renames both artifacts to `dest`. If the sidecar cannot follow, the
    /// primary is put back; if even that fails the stale sidecar is dropped.
    pub fn move_to(&self, dest: &Document) -> Result<(), AppError> {
        fs::rename(&self.primary.absolute, &dest.primary.absolute)
            .map_err(|e| AppError::from_io(e, &self.primary.relative))?;

        if self.has_sidecar() {
            if let Err(err) = fs::rename(&self.sidecar.absolute, &dest.sidecar.absolute) {
                if let Err(rollback) = fs::rename(&dest.primary.absolute, &self.primary.absolute) {
                    tracing::warn!(
                        path = %self.primary.relative,
                        error = %rollback,
                        "could not restore primary after failed sidecar move, dropping sidecar"
                    );
                    let _ = fs::remove_file(&self.sidecar.absolute);
                }
                return Err(AppError::from_io(err, &self.sidecar.relative));
            }
            dest.sync_sidecar_path()?;
        }
        Ok(())
    }

    /// Sidecar first, then primary. Nothing is removed when the primary is
    /// missing.
    pub fn delete(&self) -> Result<(), AppError> {
        if !self.exists() {
            return Err(AppError::NotFound(self.primary.relative.clone()));
        }
        if self.has_sidecar() {
            clear_readonly(&self.sidecar.absolute)?;
            fs::remove_file(&self.sidecar.absolute)
                .map_err(|e| AppError::from_io(e, &self.sidecar.relative))?;
        }
        clear_readonly(&self.primary.absolute)?;
        fs::remove_file(&self.primary.absolute)
            .map_err(|e| AppError::from_io(e, &self.primary.relative))
    }

    /// Makes the sidecar's recorded location match where the primary is now.
    pub fn sync_sidecar_path(&self) -> Result<(), AppError> {
        rewrite_sidecar_path(&self.sidecar.absolute, &self.primary.relative)
    }

    pub fn read_sidecar(&self) -> Result<OcrCache, AppError> {
        read_sidecar(&self.sidecar.absolute)
    }

    pub fn write_sidecar(&self, cache: &OcrCache) -> Result<(), AppError> {
        let bytes = serde_json::to_vec_pretty(cache)?;
        write_atomic(&self.sidecar.absolute, &bytes)
    }
}

pub fn read_sidecar(path: &Path) -> Result<OcrCache, AppError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Only the `path` field is touched; anything else in the file is preserved.
pub fn rewrite_sidecar_path(sidecar: &Path, primary_relative: &str) -> Result<(), AppError> {
    let bytes = fs::read(sidecar)?;
    let mut value: serde_json::Value = serde_json::from_slice(&bytes)?;
    let object = value.as_object_mut().ok_or_else(|| {
        AppError::InvalidArgument(format!(
            "sidecar is not a JSON object: {}",
            sidecar.display()
        ))
    })?;
    object.insert(
        "path".to_string(),
        serde_json::Value::String(primary_relative.to_string()),
    );
    write_atomic(sidecar, &serde_json::to_vec_pretty(&value)?)
}

/// Writes through a temp file in the target directory and renames it into
/// place, so concurrent readers see either the old or the new content. An
/// existing file keeps its permissions.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let permissions = match fs::metadata(path) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(_) => new_file_permissions(),
    };
    let tmp = staged(path, bytes, permissions)?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

/// Like [`write_atomic`] but never replaces an existing file.
pub fn write_new(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = staged(path, bytes, new_file_permissions())?;
    tmp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            AppError::Conflict(path.to_string_lossy().to_string())
        } else {
            AppError::Io(e.error)
        }
    })?;
    Ok(())
}

fn staged(
    path: &Path,
    bytes: &[u8],
    permissions: Option<fs::Permissions>,
) -> Result<tempfile::NamedTempFile, AppError> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::InvalidArgument(format!("no parent: {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if let Some(permissions) = permissions {
        tmp.as_file().set_permissions(permissions)?;
    }
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

// Temp files start out owner-only; documents are created world-readable.
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

pub fn clear_readonly(path: &Path) -> Result<(), AppError> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);

    fs::set_permissions(path, permissions).map_err(|e| AppError::from_io(e, &path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ocr::{Page, Rectangle, TextBox};
    use crate::scope_path::ScopedRoot;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ScopedRoot, DocumentLayout) {
        let tmp = TempDir::new().unwrap();
        let root = ScopedRoot::open(tmp.path()).unwrap();
        (tmp, root, DocumentLayout::new("pdf", "json"))
    }

    fn cache_for(path: &str) -> OcrCache {
        OcrCache {
            path: path.to_string(),
            pages: vec![Page {
                page_number: 1,
                boxes: vec![TextBox {
                    text: "hello".to_string(),
                    rectangle: Rectangle::default(),
                }],
            }],
        }
    }

    fn make_document(root: &ScopedRoot, layout: &DocumentLayout, rel: &str) -> Document {
        let doc = layout.locate(&root.resolve(rel).unwrap());
        fs::create_dir_all(doc.primary().absolute.parent().unwrap()).unwrap();
        fs::write(&doc.primary().absolute, b"%PDF-1.7").unwrap();
        doc.write_sidecar(&cache_for(&doc.primary().relative)).unwrap();
        doc
    }

    #[test]
    fn test_locate_from_any_artifact() {
        let (_tmp, root, layout) = setup();
        let from_primary = layout.locate(&root.resolve("a/scan.pdf").unwrap());
        let from_sidecar = layout.locate(&root.resolve("a/scan.json").unwrap());
        let from_base = layout.locate(&root.resolve("a/scan").unwrap());

        assert_eq!(from_primary, from_sidecar);
        assert_eq!(from_primary, from_base);
        assert_eq!(from_primary.stem(), "scan");
        assert_eq!(from_primary.primary().relative, "a/scan.pdf");
        assert_eq!(from_primary.sidecar().relative, "a/scan.json");
    }

    #[test]
    fn test_locate_keeps_dots_in_foreign_extensions() {
        let (_tmp, root, layout) = setup();
        let doc = layout.locate(&root.resolve("report.v2").unwrap());
        assert_eq!(doc.primary().relative, "report.v2.pdf");
    }

    #[test]
    fn test_with_primary_extension() {
        let layout = DocumentLayout::new("pdf", "json");
        assert_eq!(layout.with_primary_extension("scan"), "scan.pdf");
        assert_eq!(layout.with_primary_extension("scan.PDF"), "scan.PDF");
        assert_eq!(layout.with_primary_extension("scan.txt"), "scan.txt.pdf");
    }

    #[test]
    fn test_vacant_in_probes_copy_names_in_order() {
        let (_tmp, root, layout) = setup();
        let dir = root.root();

        make_document(&root, &layout, "x.pdf");
        assert_eq!(layout.vacant_in(&dir, "x").stem(), "x - copy");

        make_document(&root, &layout, "x - copy.pdf");
        assert_eq!(layout.vacant_in(&dir, "x").stem(), "x - copy (2)");

        make_document(&root, &layout, "x - copy (2).pdf");
        assert_eq!(layout.vacant_in(&dir, "x").stem(), "x - copy (3)");
    }

    #[test]
    fn test_vacant_in_treats_lone_sidecar_as_taken() {
        let (_tmp, root, layout) = setup();
        fs::write(root.path().join("y.json"), "{}").unwrap();
        assert_eq!(layout.vacant_in(&root.root(), "y").stem(), "y - copy");
    }

    #[test]
    fn test_copy_rewrites_sidecar_path() {
        let (_tmp, root, layout) = setup();
        let src = make_document(&root, &layout, "a.pdf");
        fs::create_dir_all(root.path().join("dest")).unwrap();
        let dest = layout.in_directory(&root.resolve("dest").unwrap(), "a");

        src.copy_to(&dest).unwrap();

        assert!(src.exists() && src.has_sidecar());
        assert_eq!(dest.read_sidecar().unwrap().path, "dest/a.pdf");
        assert_eq!(src.read_sidecar().unwrap().path, "a.pdf");
    }

    #[test]
    fn test_copy_without_sidecar() {
        let (_tmp, root, layout) = setup();
        fs::write(root.path().join("plain.pdf"), b"data").unwrap();
        let src = layout.locate(&root.resolve("plain.pdf").unwrap());
        let dest = layout.in_directory(&root.root(), "plain2");

        src.copy_to(&dest).unwrap();

        assert!(dest.exists());
        assert!(!dest.has_sidecar());
    }

    #[test]
    fn test_move_moves_both_artifacts() {
        let (_tmp, root, layout) = setup();
        let src = make_document(&root, &layout, "a.pdf");
        let dest = layout.in_directory(&root.root(), "b");

        src.move_to(&dest).unwrap();

        assert!(!src.exists() && !src.has_sidecar());
        assert!(dest.exists());
        assert_eq!(dest.read_sidecar().unwrap().path, "b.pdf");
    }

    #[test]
    fn test_delete_removes_sidecar_and_primary() {
        let (_tmp, root, layout) = setup();
        let doc = make_document(&root, &layout, "gone.pdf");
        doc.delete().unwrap();
        assert!(!doc.exists());
        assert!(!doc.has_sidecar());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_clears_readonly() {
        let (_tmp, root, layout) = setup();
        let doc = make_document(&root, &layout, "locked.pdf");
        let mut perms = fs::metadata(&doc.primary().absolute).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&doc.primary().absolute, perms).unwrap();

        doc.delete().unwrap();
        assert!(!doc.exists());
    }

    #[test]
    fn test_locate_uses_on_disk_extension_case() {
        let (_tmp, root, layout) = setup();
        fs::create_dir_all(root.path().join("case")).unwrap();
        fs::write(root.path().join("case/Scan.PDF"), b"%PDF").unwrap();
        fs::write(root.path().join("case/Scan.JSON"), "{}").unwrap();

        let from_primary = layout.locate(&root.resolve("case/Scan.PDF").unwrap());
        let from_sidecar = layout.locate(&root.resolve("case/Scan.JSON").unwrap());

        assert_eq!(from_primary, from_sidecar);
        assert_eq!(from_primary.primary().relative, "case/Scan.PDF");
        assert_eq!(from_primary.sidecar().relative, "case/Scan.JSON");
        assert!(from_primary.exists() && from_primary.has_sidecar());
        assert_eq!(layout.vacant_in(&root.resolve("case").unwrap(), "Scan").stem(), "Scan - copy");
    }

    #[test]
    fn test_delete_without_primary_keeps_sidecar() {
        let (_tmp, root, layout) = setup();
        let doc = make_document(&root, &layout, "orphan.pdf");
        fs::remove_file(&doc.primary().absolute).unwrap();

        assert!(matches!(doc.delete(), Err(AppError::NotFound(_))));
        assert!(doc.has_sidecar());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, root, layout) = setup();
        let doc = make_document(&root, &layout, "shared.pdf");
        assert_eq!(
            fs::metadata(&doc.sidecar().absolute).unwrap().permissions().mode() & 0o777,
            0o644
        );
        fs::set_permissions(&doc.sidecar().absolute, fs::Permissions::from_mode(0o664)).unwrap();

        doc.sync_sidecar_path().unwrap();

        let mode = fs::metadata(&doc.sidecar().absolute).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o664);
    }

    #[test]
    fn test_write_new_never_replaces() {
        let (_tmp, root, _layout) = setup();
        let target = root.path().join("taken.pdf");
        fs::write(&target, b"original").unwrap();

        assert!(matches!(
            write_new(&target, b"intruder"),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(fs::read(&target).unwrap(), b"original");

        let fresh = root.path().join("fresh.pdf");
        write_new(&fresh, b"new").unwrap();
        assert_eq!(fs::read(&fresh).unwrap(), b"new");
    }

    #[test]
    fn test_rewrite_preserves_unknown_fields() {
        let (_tmp, root, _layout) = setup();
        let sidecar = root.path().join("z.json");
        fs::write(&sidecar, r#"{"path":"old.pdf","pages":[],"engine":"v3"}"#).unwrap();

        rewrite_sidecar_path(&sidecar, "new.pdf").unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&sidecar).unwrap()).unwrap();
        assert_eq!(value["path"], "new.pdf");
        assert_eq!(value["engine"], "v3");
    }

    #[test]
    fn test_rewrite_rejects_non_object() {
        let (_tmp, root, _layout) = setup();
        let sidecar = root.path().join("bad.json");
        fs::write(&sidecar, "[1,2]").unwrap();
        assert!(matches!(
            rewrite_sidecar_path(&sidecar, "x.pdf"),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
