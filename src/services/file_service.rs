use std::fs;
use std::path::Path;

use crate::config::StoreConfig;
use crate::error::AppError;
use crate::models::document_node::DocumentNode;
use crate::models::file_content::FileContent;
use crate::scope_path::{validate_file_name, ScopedPath, ScopedRoot};
use crate::services::document::{clear_readonly, write_new, DocumentLayout};

const PARENT_ENTRY_NAME: &str = "..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copy,
    Move,
}

/// Hierarchical store of documents under a single root directory.
///
/// The store does no locking of its own: callers that mutate overlapping
/// subtrees concurrently must serialize those calls themselves.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: ScopedRoot,
    layout: DocumentLayout,
}

struct DirectoryListing {
    dirs: Vec<ScopedPath>,
    files: Vec<ScopedPath>,
}

struct PendingDir {
    node: DocumentNode,
    dir: ScopedPath,
    subdirs: Vec<usize>,
    files: Vec<DocumentNode>,
}

impl DocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self, AppError> {
        Ok(Self {
            root: ScopedRoot::open(&config.root)?,
            layout: DocumentLayout::from_config(config),
        })
    }

    pub fn root(&self) -> &ScopedRoot {
        &self.root
    }

    /// Immediate subdirectories and documents of `path`. Documents are found
    /// through their sidecars but reported under the primary name.
    pub fn list_children(&self, path: &str) -> Result<Vec<DocumentNode>, AppError> {
        let dir = self.existing_directory(path)?;
        let listing = self.read_directory(&dir)?;

        let mut entries = Vec::with_capacity(listing.dirs.len() + listing.files.len() + 1);
        if !dir.is_root() {
            let parent = self.root.parent(&dir);
            entries.push(DocumentNode::directory(PARENT_ENTRY_NAME, parent.relative));
        }

        for sub in &listing.dirs {
            entries.push(DocumentNode::directory(sub.name(), sub.relative.clone()));
        }

        for file in listing
            .files
            .iter()
            .filter(|f| self.layout.is_sidecar(&f.absolute))
        {
            let doc = self.layout.locate(file);
            entries.push(DocumentNode::file(
                doc.primary().name(),
                doc.primary().relative.clone(),
            ));
        }

        Ok(entries)
    }

    /// The whole hierarchy, subdirectories before documents at every level.
    pub fn full_tree(&self) -> Result<DocumentNode, AppError> {
        fs::create_dir_all(self.root.path())?;

        let root_name = self
            .root
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.path().to_string_lossy().to_string());

        let mut arena = vec![PendingDir {
            node: DocumentNode::expanded(root_name, ""),
            dir: self.root.root(),
            subdirs: Vec::new(),
            files: Vec::new(),
        }];
        let mut stack = vec![0usize];

        while let Some(idx) = stack.pop() {
            let listing = self.read_directory(&arena[idx].dir)?;

            arena[idx].files = listing
                .files
                .iter()
                .filter(|f| self.layout.is_primary(&f.absolute))
                .map(|f| DocumentNode::file(f.name(), f.relative.clone()))
                .collect();

            for sub in listing.dirs {
                let child_idx = arena.len();
                arena.push(PendingDir {
                    node: DocumentNode::expanded(sub.name(), sub.relative.clone()),
                    dir: sub,
                    subdirs: Vec::new(),
                    files: Vec::new(),
                });
                arena[idx].subdirs.push(child_idx);
                stack.push(child_idx);
            }
        }

        // Children always sit at higher indices than their parent, so a
        // reverse pass sees every subtree complete before it is attached.
        let mut built: Vec<Option<DocumentNode>> = vec![None; arena.len()];
        for (idx, pending) in arena.into_iter().enumerate().rev() {
            let mut children: Vec<DocumentNode> = pending
                .subdirs
                .iter()
                .filter_map(|&i| built[i].take())
                .collect();
            children.extend(pending.files);

            let mut node = pending.node;
            node.children = Some(children);
            built[idx] = Some(node);
        }

        built[0]
            .take()
            .ok_or_else(|| AppError::General("tree assembly lost the root".to_string()))
    }

    /// The primary file of a document. A sidecar or base path is accepted and
    /// resolves to the same primary.
    pub fn read_document(&self, path: &str) -> Result<FileContent, AppError> {
        let target = self.root.resolve(path)?;
        if target.absolute.is_dir() {
            return Err(AppError::InvalidArgument(format!(
                "not a document: {}",
                target.relative
            )));
        }

        let doc = self.layout.locate(&target);
        let primary = doc.primary();
        let bytes = fs::read(&primary.absolute).map_err(|e| AppError::from_io(e, &primary.relative))?;
        let content_type = mime_guess::from_path(&primary.absolute)
            .first_or_octet_stream()
            .to_string();

        tracing::debug!(path = %primary.relative, bytes = bytes.len(), "document read");
        Ok(FileContent {
            file_name: primary.name().to_string(),
            content_type,
            bytes,
        })
    }

    pub fn create_folder(&self, path: &str) -> Result<String, AppError> {
        let dir = self.root.resolve(path)?;
        fs::create_dir_all(&dir.absolute).map_err(|e| AppError::from_io(e, &dir.relative))?;
        tracing::info!(path = %dir.relative, "folder created");
        Ok(dir.relative)
    }

    /// Copies a document, or every document below a directory, into
    /// `destination_dir`. Returns the primary paths that were written.
    pub fn copy_document(
        &self,
        source: &str,
        destination_dir: &str,
    ) -> Result<Vec<String>, AppError> {
        let src = self.root.resolve(source)?;
        let dest_dir = self.existing_directory(destination_dir)?;

        if src.absolute.is_dir() {
            self.ensure_not_nested(&src, &dest_dir)?;
            let target = if self.root.parent(&src) == dest_dir {
                self.vacant_directory(&dest_dir, src.name())
            } else {
                self.root.child(&dest_dir, src.name())
            };
            let copied = self.transfer_tree(&src, &target, Transfer::Copy)?;
            tracing::info!(
                source = %src.relative,
                destination = %target.relative,
                documents = copied.len(),
                "directory copied"
            );
            return Ok(copied);
        }

        let doc = self.layout.locate(&src);
        if !doc.exists() {
            return Err(AppError::NotFound(src.relative));
        }
        let dest = self.layout.vacant_in(&dest_dir, doc.stem());
        doc.copy_to(&dest)?;
        tracing::info!(
            source = %doc.primary().relative,
            destination = %dest.primary().relative,
            "document copied"
        );
        Ok(vec![dest.primary().relative.clone()])
    }

    /// Moves a document or directory into `destination_dir`. A moved directory
    /// gets a fresh name (`Name (2)`, ...) if one already exists there, and the
    /// source subtree is removed once every document has been moved.
    pub fn move_document(
        &self,
        source: &str,
        destination_dir: &str,
    ) -> Result<Vec<String>, AppError> {
        let src = self.root.resolve(source)?;
        let dest_dir = self.existing_directory(destination_dir)?;

        if src.absolute.is_dir() {
            self.ensure_not_nested(&src, &dest_dir)?;
            if self.root.parent(&src) == dest_dir {
                return Ok(vec![src.relative]);
            }

            let target = self.vacant_directory(&dest_dir, src.name());
            let moved = self.transfer_tree(&src, &target, Transfer::Move)?;
            self.remove_tree(&src)?;
            tracing::info!(
                source = %src.relative,
                destination = %target.relative,
                documents = moved.len(),
                "directory moved"
            );
            return Ok(moved);
        }

        let doc = self.layout.locate(&src);
        if !doc.exists() {
            return Err(AppError::NotFound(src.relative));
        }
        let parent = self.root.parent(doc.primary());
        if parent == dest_dir {
            return Ok(vec![doc.primary().relative.clone()]);
        }

        let dest = self.layout.vacant_in(&dest_dir, doc.stem());
        doc.move_to(&dest)?;
        if !parent.is_root() && fs::remove_dir(&parent.absolute).is_ok() {
            tracing::debug!(path = %parent.relative, "removed emptied folder");
        }
        tracing::info!(
            source = %doc.primary().relative,
            destination = %dest.primary().relative,
            "document moved"
        );
        Ok(vec![dest.primary().relative.clone()])
    }

    pub fn delete_document(&self, path: &str) -> Result<String, AppError> {
        let target = self.root.resolve(path)?;
        if target.is_root() {
            return Err(AppError::InvalidArgument(
                "the document root cannot be deleted".to_string(),
            ));
        }

        if target.absolute.is_dir() {
            self.remove_tree(&target)?;
            tracing::info!(path = %target.relative, "folder deleted");
            return Ok(target.relative);
        }

        let doc = self.layout.locate(&target);
        doc.delete()?;
        tracing::info!(path = %doc.primary().relative, "document deleted");
        Ok(doc.primary().relative.clone())
    }

    /// Renames a document (both artifacts) or a directory in place. The
    /// sidecar paths of everything affected are rewritten to match.
    pub fn rename_document(&self, path: &str, new_name: &str) -> Result<String, AppError> {
        validate_file_name(new_name)?;
        let target = self.root.resolve(path)?;
        if target.is_root() {
            return Err(AppError::InvalidArgument(
                "the document root cannot be renamed".to_string(),
            ));
        }
        let parent = self.root.parent(&target);

        if target.absolute.is_dir() {
            let renamed = self.root.child(&parent, new_name);
            if renamed.absolute.exists() {
                return Err(AppError::Conflict(renamed.relative));
            }
            fs::rename(&target.absolute, &renamed.absolute)
                .map_err(|e| AppError::from_io(e, &target.relative))?;
            let rewritten = self.sync_sidecars_below(&renamed)?;
            tracing::info!(
                from = %target.relative,
                to = %renamed.relative,
                sidecars = rewritten,
                "folder renamed"
            );
            return Ok(renamed.relative);
        }

        let doc = self.layout.locate(&target);
        if !doc.exists() {
            return Err(AppError::NotFound(target.relative));
        }

        let file_name = self.layout.with_primary_extension(new_name);
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| AppError::InvalidArgument(format!("invalid file name: {new_name}")))?;
        let dest = self.layout.in_directory(&parent, &stem);
        if dest == doc {
            return Ok(doc.primary().relative.clone());
        }
        if dest.exists() || dest.has_sidecar() {
            return Err(AppError::Conflict(dest.primary().relative.clone()));
        }

        doc.move_to(&dest)?;
        tracing::info!(
            from = %doc.primary().relative,
            to = %dest.primary().relative,
            "document renamed"
        );
        Ok(dest.primary().relative.clone())
    }

    /// Stores uploaded primary content under a collision-free name.
    pub fn upload_document(
        &self,
        directory: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<String, AppError> {
        if content.is_empty() {
            return Err(AppError::InvalidArgument("uploaded file is empty".to_string()));
        }
        validate_file_name(file_name)?;
        if !self.layout.is_primary(Path::new(file_name)) {
            return Err(AppError::InvalidArgument(format!(
                "only .{} files can be uploaded: {file_name}",
                self.layout.primary_extension()
            )));
        }

        let dir = self.existing_directory(directory)?;
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| AppError::InvalidArgument(format!("invalid file name: {file_name}")))?;
        let dest = self.layout.vacant_in(&dir, &stem);

        write_new(&dest.primary().absolute, content)?;
        tracing::info!(
            path = %dest.primary().relative,
            bytes = content.len(),
            "document uploaded"
        );
        Ok(dest.primary().relative.clone())
    }

    fn existing_directory(&self, path: &str) -> Result<ScopedPath, AppError> {
        let dir = self.root.resolve(path)?;
        if !dir.absolute.exists() {
            return Err(AppError::NotFound(dir.relative));
        }
        if !dir.absolute.is_dir() {
            return Err(AppError::InvalidArgument(format!(
                "not a directory: {}",
                dir.relative
            )));
        }
        Ok(dir)
    }

    fn ensure_not_nested(&self, src: &ScopedPath, dest_dir: &ScopedPath) -> Result<(), AppError> {
        let nested = src.is_root()
            || dest_dir.relative == src.relative
            || dest_dir.relative.starts_with(&format!("{}/", src.relative));
        if nested {
            return Err(AppError::InvalidArgument(format!(
                "cannot place {} inside itself",
                if src.is_root() {
                    "the document root"
                } else {
                    src.relative.as_str()
                }
            )));
        }
        Ok(())
    }

    /// Real subdirectories and files of `dir`, each sorted by name
    /// case-insensitively. Symlinks are skipped.
    fn read_directory(&self, dir: &ScopedPath) -> Result<DirectoryListing, AppError> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        let entries = fs::read_dir(&dir.absolute).map_err(|e| AppError::from_io(e, &dir.relative))?;
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                dirs.push(self.root.child(dir, &name));
            } else if file_type.is_file() {
                files.push(self.root.child(dir, &name));
            }
        }

        let by_name = |a: &ScopedPath, b: &ScopedPath| {
            a.name()
                .to_lowercase()
                .cmp(&b.name().to_lowercase())
                .then_with(|| a.name().cmp(b.name()))
        };
        dirs.sort_by(by_name);
        files.sort_by(by_name);

        Ok(DirectoryListing { dirs, files })
    }

    /// Recreates `from` at `to` and copies or moves every document in it.
    /// Non-document files are left behind. Stops at the first failure.
    fn transfer_tree(
        &self,
        from: &ScopedPath,
        to: &ScopedPath,
        mode: Transfer,
    ) -> Result<Vec<String>, AppError> {
        let mut written = Vec::new();
        let mut stack = vec![(from.clone(), to.clone())];

        while let Some((src_dir, dest_dir)) = stack.pop() {
            fs::create_dir_all(&dest_dir.absolute)
                .map_err(|e| AppError::from_io(e, &dest_dir.relative))?;
            let listing = self.read_directory(&src_dir)?;

            for file in listing
                .files
                .iter()
                .filter(|f| self.layout.is_primary(&f.absolute))
            {
                let doc = self.layout.locate(file);
                let dest = self.layout.vacant_in(&dest_dir, doc.stem());
                match mode {
                    Transfer::Copy => doc.copy_to(&dest)?,
                    Transfer::Move => doc.move_to(&dest)?,
                }
                tracing::debug!(
                    from = %doc.primary().relative,
                    to = %dest.primary().relative,
                    ?mode,
                    "document transferred"
                );
                written.push(dest.primary().relative.clone());
            }

            for sub in listing.dirs.into_iter().rev() {
                let dest_sub = self.root.child(&dest_dir, sub.name());
                stack.push((sub, dest_sub));
            }
        }

        Ok(written)
    }

    /// `name`, then `name (2)`, `name (3)`, ... until nothing exists there.
    fn vacant_directory(&self, parent: &ScopedPath, name: &str) -> ScopedPath {
        let candidate = self.root.child(parent, name);
        if !candidate.absolute.exists() {
            return candidate;
        }
        let mut n = 2u32;
        loop {
            let candidate = self.root.child(parent, &format!("{name} ({n})"));
            if !candidate.absolute.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Clears read-only flags on every entry of the subtree, then removes it.
    fn remove_tree(&self, dir: &ScopedPath) -> Result<(), AppError> {
        let mut stack = vec![dir.absolute.clone()];
        while let Some(current) = stack.pop() {
            clear_readonly(&current)?;
            let entries = fs::read_dir(&current).map_err(|e| AppError::from_io(e, &dir.relative))?;
            for entry in entries {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else {
                    clear_readonly(&entry.path())?;
                }
            }
        }

        fs::remove_dir_all(&dir.absolute).map_err(|e| AppError::from_io(e, &dir.relative))
    }

    fn sync_sidecars_below(&self, dir: &ScopedPath) -> Result<usize, AppError> {
        let mut rewritten = 0;
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let listing = self.read_directory(&current)?;
            for file in listing
                .files
                .iter()
                .filter(|f| self.layout.is_sidecar(&f.absolute))
            {
                self.layout.locate(file).sync_sidecar_path()?;
                rewritten += 1;
            }
            stack.extend(listing.dirs);
        }
        Ok(rewritten)
    }
}
