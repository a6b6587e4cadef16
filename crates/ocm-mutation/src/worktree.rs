//! Filesystem mutation engine
//!
//! A [`WorkingTree`] is a uniquely named temporary directory holding the
//! extracted content of a tar archive. Substitution rules rewrite YAML files
//! in place; [`WorkingTree::archive`] packs the result back deterministically.
//! The directory is removed when the tree is dropped.

use crate::compression::decompress_auto;
use crate::error::WorkTreeError;
use crate::substitution::Substitution;
use crate::yaml;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocm_artifact::FieldPath;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tempfile::TempDir;
use walkdir::WalkDir;

const BLOCK_SIZE: usize = 512;
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// Whether `data` (optionally gzip-compressed) is a tar archive
///
/// Accepts the `ustar` magic at offset 257, or a first header whose
/// checksum validates (old-style v7 archives).
#[must_use]
pub fn is_archive(data: &[u8]) -> bool {
    match decompress_auto(data.to_vec()) {
        Ok(raw) => is_tar(&raw),
        Err(_) => false,
    }
}

fn is_tar(data: &[u8]) -> bool {
    if data.len() < BLOCK_SIZE {
        return false;
    }
    let header = &data[..BLOCK_SIZE];
    if header[USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()] == *USTAR_MAGIC {
        return true;
    }
    if header.iter().all(|b| *b == 0) {
        return false;
    }
    header_checksum_matches(header)
}

fn header_checksum_matches(header: &[u8]) -> bool {
    let field = &header[CHECKSUM_RANGE];
    let digits: String = field
        .iter()
        .map(|b| *b as char)
        .filter(|c| c.is_digit(8))
        .collect();
    let Ok(expected) = u32::from_str_radix(&digits, 8) else {
        return false;
    };
    let actual: u32 = header
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CHECKSUM_RANGE.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum();
    actual == expected
}

/// Extracted archive content on disk
#[derive(Debug)]
pub struct WorkingTree {
    dir: TempDir,
}

impl WorkingTree {
    /// Create an empty tree under `work_dir`, or the system temp directory
    ///
    /// # Errors
    /// Returns [`WorkTreeError::TempDir`] if the directory cannot be created
    pub fn create(work_dir: Option<&Path>) -> Result<Self, WorkTreeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ocm-mutation-");
        let dir = match work_dir {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(WorkTreeError::TempDir)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(WorkTreeError::TempDir)?;
        Ok(Self { dir })
    }

    /// Extract a (gzipped) tar archive into a new tree
    ///
    /// # Errors
    /// Returns [`WorkTreeError::NotAnArchive`] for anything that is not a tar
    /// archive, and extraction errors otherwise
    pub fn extract(data: &[u8], work_dir: Option<&Path>) -> Result<Self, WorkTreeError> {
        let raw = decompress_auto(data.to_vec()).map_err(|_| WorkTreeError::NotAnArchive)?;
        if !is_tar(&raw) {
            return Err(WorkTreeError::NotAnArchive);
        }

        let tree = Self::create(work_dir)?;
        let mut archive = Archive::new(Cursor::new(raw));
        archive.set_overwrite(true);
        archive
            .unpack(tree.path())
            .map_err(WorkTreeError::Extract)?;
        tracing::debug!(path = %tree.path().display(), "extracted working tree");
        Ok(tree)
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute location of a tree-relative file
    ///
    /// Symlinks are resolved: a location whose nearest existing ancestor (or
    /// itself) resolves outside the tree is refused, as is a dangling link.
    ///
    /// # Errors
    /// Returns [`WorkTreeError::InvalidFilePath`] for absolute paths and paths
    /// that leave the tree
    pub fn locate(&self, file: &str) -> Result<PathBuf, WorkTreeError> {
        let relative = Path::new(file);
        let mut normal = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkTreeError::InvalidFilePath(file.to_string()))
                }
            }
        }
        if !normal {
            return Err(WorkTreeError::InvalidFilePath(file.to_string()));
        }
        let location = self.path().join(relative);
        self.ensure_contained(&location, file)?;
        Ok(location)
    }

    fn ensure_contained(&self, location: &Path, file: &str) -> Result<(), WorkTreeError> {
        let root = self.path().canonicalize()?;
        let mut candidate = location;
        loop {
            match fs::symlink_metadata(candidate) {
                Ok(_) => {
                    let resolved = candidate
                        .canonicalize()
                        .map_err(|_| WorkTreeError::InvalidFilePath(file.to_string()))?;
                    if resolved.starts_with(&root) {
                        return Ok(());
                    }
                    tracing::warn!(file, resolved = %resolved.display(), "path escapes working tree");
                    return Err(WorkTreeError::InvalidFilePath(file.to_string()));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    candidate = candidate
                        .parent()
                        .ok_or_else(|| WorkTreeError::InvalidFilePath(file.to_string()))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read a file, refusing files larger than `limit` bytes
    ///
    /// # Errors
    /// Returns not-found, too-large, or I/O errors
    pub fn read_file(&self, file: &str, limit: u64) -> Result<Vec<u8>, WorkTreeError> {
        let location = self.locate(file)?;
        let metadata = match fs::metadata(&location) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(WorkTreeError::FileNotFound(file.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorkTreeError::FileNotFound(file.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > limit {
            return Err(WorkTreeError::FileTooLarge {
                file: file.to_string(),
                size: metadata.len(),
                limit,
            });
        }
        Ok(fs::read(location)?)
    }

    /// Write a file, creating parent directories
    ///
    /// # Errors
    /// Returns error on invalid paths or I/O failure
    pub fn write_file(&self, file: &str, data: &[u8]) -> Result<(), WorkTreeError> {
        let location = self.locate(file)?;
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(location, data)?;
        Ok(())
    }

    /// Apply rules in order; later rules see earlier rewrites
    ///
    /// # Errors
    /// Fails on the first rule whose file is missing, unparsable, too large,
    /// or whose path cannot be set
    pub fn apply_rules(
        &self,
        rules: &[Substitution],
        max_file_size: u64,
    ) -> Result<(), WorkTreeError> {
        if rules.is_empty() {
            tracing::info!(
                "no rules generated from the available config data; the generated snapshot will have no modifications"
            );
            return Ok(());
        }

        for rule in rules {
            self.apply_rule(rule, max_file_size)?;
        }
        Ok(())
    }

    fn apply_rule(&self, rule: &Substitution, max_file_size: u64) -> Result<(), WorkTreeError> {
        let file = rule.file.as_str();
        let content = self.read_file(file, max_file_size)?;

        let mut documents = yaml::parse_documents(&content).map_err(|source| {
            WorkTreeError::Parse {
                file: file.to_string(),
                source,
            }
        })?;
        let path: FieldPath = rule.path.parse().map_err(|source| WorkTreeError::RulePath {
            file: file.to_string(),
            source,
        })?;
        let value = serde_yaml::to_value(&rule.value).map_err(|source| {
            WorkTreeError::Serialize {
                file: file.to_string(),
                source,
            }
        })?;

        yaml::set_path(&mut documents[0], &path, value).map_err(|reason| {
            WorkTreeError::SetPath {
                file: file.to_string(),
                path: rule.path.clone(),
                reason,
            }
        })?;

        let rendered = yaml::render_documents(&documents).map_err(|source| {
            WorkTreeError::Serialize {
                file: file.to_string(),
                source,
            }
        })?;
        self.write_file(file, rendered.as_bytes())?;

        tracing::debug!(rule = %rule.id, file, path = %rule.path, "applied substitution");
        Ok(())
    }

    /// Pack the tree into a tar archive
    ///
    /// Entries are sorted by path and stamped with `mtime`, uid/gid 0 and
    /// fixed modes, so equal trees produce byte-identical archives.
    ///
    /// # Errors
    /// Returns [`WorkTreeError::Archive`] on I/O failure
    pub fn archive(&self, mtime: u64, compress: bool) -> Result<Vec<u8>, WorkTreeError> {
        let entries = collect_entries(self.path()).map_err(WorkTreeError::Archive)?;

        if compress {
            let encoder = GzEncoder::new(Vec::new(), Compression::default());
            let encoder = self
                .write_entries(Builder::new(encoder), &entries, mtime)
                .map_err(WorkTreeError::Archive)?;
            encoder.finish().map_err(WorkTreeError::Archive)
        } else {
            self.write_entries(Builder::new(Vec::new()), &entries, mtime)
                .map_err(WorkTreeError::Archive)
        }
    }

    fn write_entries<W: Write>(
        &self,
        mut builder: Builder<W>,
        entries: &[PathBuf],
        mtime: u64,
    ) -> io::Result<W> {
        for relative in entries {
            let location = self.path().join(relative);
            let metadata = fs::symlink_metadata(&location)?;

            let mut header = Header::new_gnu();
            header.set_mtime(mtime);
            header.set_uid(0);
            header.set_gid(0);

            if metadata.file_type().is_symlink() {
                let target = fs::read_link(&location)?;
                header.set_entry_type(EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                header.set_cksum();
                builder.append_link(&mut header, relative, target)?;
            } else if metadata.is_dir() {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, relative, io::empty())?;
            } else {
                let content = fs::read(&location)?;
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, relative, content.as_slice())?;
            }
        }
        builder.into_inner()
    }
}

/// Tree-relative paths in depth-first, name-sorted order
fn collect_entries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        entries.push(relative.to_path_buf());
    }
    Ok(entries)
}
