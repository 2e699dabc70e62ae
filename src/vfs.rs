//! The per-run virtual file system.
//!
//! All blueprint actions write into this in-memory buffer; nothing reaches
//! disk until [`Vfs::flush`] runs at the end of a successful run. Reads are
//! lazy: the first access to a path that is not buffered loads it from disk
//! and caches it, so modifiers always see the current on-disk content of
//! files they did not create themselves.
//!
//! Keys are normalized relative paths: forward slashes only, no doubled
//! separators, no leading slash and no project-root prefix. A path that
//! normalizes to empty or escapes the project root is rejected before it can
//! ever serialize.
//!
//! A double [`Vfs::write`] where both the buffered and the incoming content
//! parse as JSON objects performs a *shallow* key merge so that two actions
//! emitting the same JSON file compose idempotently. The merge is shallow on
//! purpose; structured deep merges go through the `json-merger` modifier.

use crate::error::{ArchitechError, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use path_slash::PathExt;
use serde_json::Value;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// A single buffered file.
#[derive(Debug, Clone)]
pub struct VfsEntry {
    pub content: String,
    pub last_modified: SystemTime,
}

impl VfsEntry {
    fn new(content: String) -> Self {
        Self { content, last_modified: SystemTime::now() }
    }
}

/// In-memory file buffer for a single run, rooted at the project directory.
#[derive(Debug)]
pub struct Vfs {
    root: PathBuf,
    root_slashed: String,
    entries: DashMap<String, VfsEntry>,
}

impl Vfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root_slashed = root.to_slash_lossy().trim_end_matches('/').to_string();
        Self { root, root_slashed, entries: DashMap::new() }
    }

    /// The project root all relative keys resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalizes a raw path into a buffer key.
    ///
    /// Backslashes become slashes, doubled separators collapse, a leading
    /// project-root prefix, `./` and `/` are stripped. Empty results and
    /// parent-directory traversal are errors.
    pub fn normalize(&self, path: &str) -> Result<String> {
        let mut p = path.replace('\\', "/");
        while p.contains("//") {
            p = p.replace("//", "/");
        }
        if !self.root_slashed.is_empty() && self.root_slashed != "." {
            if let Some(stripped) = p.strip_prefix(&self.root_slashed) {
                if stripped.is_empty() || stripped.starts_with('/') {
                    p = stripped.to_string();
                }
            }
        }
        let p = p.trim_start_matches("./").trim_start_matches('/');
        if p.is_empty() {
            return Err(ArchitechError::VfsPath {
                path: path.to_string(),
                reason: "normalizes to the empty path",
            });
        }
        if p.split('/').any(|seg| seg == "..") {
            return Err(ArchitechError::VfsPath {
                path: path.to_string(),
                reason: "escapes the project root",
            });
        }
        Ok(p.to_string())
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Reads the file at `key` from disk, distinguishing "not there" from a
    /// real io failure.
    fn load_disk(&self, key: &str) -> Result<Option<String>> {
        let path = self.disk_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ArchitechError::io(err, path)),
        }
    }

    /// Returns the buffered content, lazily loading from disk on first
    /// access. A path that exists neither buffered nor on disk is
    /// [`ArchitechError::FileNotFound`].
    pub fn read(&self, path: &str) -> Result<String> {
        self.try_read(path)?.ok_or_else(|| ArchitechError::FileNotFound(path.to_string()))
    }

    /// Like [`Self::read`] but maps a missing file to `None`.
    pub fn try_read(&self, path: &str) -> Result<Option<String>> {
        let key = self.normalize(path)?;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => Ok(Some(occupied.get().content.clone())),
            Entry::Vacant(vacant) => match self.load_disk(&key)? {
                Some(content) => {
                    trace!(path = %key, "vfs lazy-load from disk");
                    vacant.insert(VfsEntry::new(content.clone()));
                    Ok(Some(content))
                }
                None => Ok(None),
            },
        }
    }

    /// Whether the path is buffered or present on disk.
    pub fn exists(&self, path: &str) -> bool {
        match self.normalize(path) {
            Ok(key) => self.entries.contains_key(&key) || self.disk_path(&key).exists(),
            Err(_) => false,
        }
    }

    /// Buffers `content` under `path`.
    ///
    /// When both the current and the incoming content parse as JSON objects
    /// the keys are shallow-merged with the incoming value winning per key;
    /// otherwise the incoming content replaces the buffer.
    pub fn write(&self, path: &str, content: impl Into<String>) -> Result<()> {
        let key = self.normalize(path)?;
        let incoming = content.into();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let merged = merge_or_replace(&occupied.get().content, incoming)?;
                trace!(path = %key, "vfs write (buffered)");
                *occupied.get_mut() = VfsEntry::new(merged);
            }
            Entry::Vacant(vacant) => {
                let merged = match self.load_disk(&key)? {
                    Some(existing) => merge_or_replace(&existing, incoming)?,
                    None => incoming,
                };
                trace!(path = %key, "vfs write (new)");
                vacant.insert(VfsEntry::new(merged));
            }
        }
        Ok(())
    }

    /// Replaces the buffered content verbatim, bypassing the JSON
    /// auto-merge.
    pub fn overwrite(&self, path: &str, content: impl Into<String>) -> Result<()> {
        let key = self.normalize(path)?;
        self.entries.insert(key, VfsEntry::new(content.into()));
        Ok(())
    }

    /// Read-modify-write under the entry lock. `apply` receives the current
    /// content (`None` when the path exists neither buffered nor on disk)
    /// and returns the replacement. Concurrent updates of the same entry
    /// serialize, which is what makes parallel modules merging the same
    /// JSON file deterministic for disjoint keys.
    pub fn update(
        &self,
        path: &str,
        apply: impl FnOnce(Option<&str>) -> Result<String>,
    ) -> Result<()> {
        let key = self.normalize(path)?;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let next = apply(Some(occupied.get().content.as_str()))?;
                *occupied.get_mut() = VfsEntry::new(next);
            }
            Entry::Vacant(vacant) => {
                let current = self.load_disk(&key)?;
                let next = apply(current.as_deref())?;
                vacant.insert(VfsEntry::new(next));
            }
        }
        Ok(())
    }

    /// Buffers `content` under a path that must not already exist.
    ///
    /// Under concurrent creates of the same path one caller wins; the
    /// others observe [`ArchitechError::AlreadyExists`].
    pub fn create(&self, path: &str, content: impl Into<String>) -> Result<()> {
        let key = self.normalize(path)?;
        if self.disk_path(&key).exists() {
            return Err(ArchitechError::AlreadyExists(key));
        }
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                Err(ArchitechError::AlreadyExists(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                trace!(path = %vacant.key(), "vfs create");
                vacant.insert(VfsEntry::new(content.into()));
                Ok(())
            }
        }
    }

    /// Appends to the buffered content, lazily loading from disk first. A
    /// missing file starts empty.
    pub fn append(&self, path: &str, suffix: &str) -> Result<()> {
        self.edit(path, |content| content.push_str(suffix))
    }

    /// Prepends to the buffered content, lazily loading from disk first. A
    /// missing file starts empty.
    pub fn prepend(&self, path: &str, prefix: &str) -> Result<()> {
        self.edit(path, |content| content.insert_str(0, prefix))
    }

    fn edit(&self, path: &str, apply: impl FnOnce(&mut String)) -> Result<()> {
        let key = self.normalize(path)?;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let mut content = std::mem::take(&mut occupied.get_mut().content);
                apply(&mut content);
                *occupied.get_mut() = VfsEntry::new(content);
            }
            Entry::Vacant(vacant) => {
                let mut content = self.load_disk(&key)?.unwrap_or_default();
                apply(&mut content);
                vacant.insert(VfsEntry::new(content));
            }
        }
        Ok(())
    }

    /// Drops the buffered entry, returning whether one was present.
    pub fn remove(&self, path: &str) -> Result<bool> {
        let key = self.normalize(path)?;
        Ok(self.entries.remove(&key).is_some())
    }

    /// Snapshot of all buffered entries, sorted by path for deterministic
    /// iteration.
    pub fn all(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().content.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every buffered entry beneath the project root, creating parent
    /// directories as needed.
    ///
    /// Content is fixed up on the way out: a single trailing `%` artifact is
    /// trimmed and a final newline is guaranteed. The first write error
    /// aborts the remaining writes and surfaces as
    /// [`ArchitechError::FlushFailed`]. Returns the written paths.
    pub fn flush(&self) -> Result<Vec<PathBuf>> {
        let entries = self.all();
        debug!(files = entries.len(), root = %self.root.display(), "flushing vfs");
        let mut written = Vec::with_capacity(entries.len());
        for (key, content) in entries {
            let path = self.disk_path(&key);
            crate::utils::create_parent_dir_all(&path)?;
            let mut out = content;
            if out.ends_with('%') {
                out.pop();
            }
            if !out.ends_with('\n') {
                out.push('\n');
            }
            fs::write(&path, out)
                .map_err(|err| ArchitechError::FlushFailed { path: path.clone(), source: err })?;
            trace!(path = %path.display(), "flushed");
            written.push(path);
        }
        Ok(written)
    }
}

/// Shallow JSON-object merge with incoming-wins semantics, falling back to
/// plain replacement when either side is not a JSON object.
fn merge_or_replace(existing: &str, incoming: String) -> Result<String> {
    let (Ok(Value::Object(mut base)), Ok(Value::Object(patch))) = (
        serde_json::from_str::<Value>(existing),
        serde_json::from_str::<Value>(&incoming),
    ) else {
        return Ok(incoming);
    };
    for (key, value) in patch {
        base.insert(key, value);
    }
    Ok(serde_json::to_string_pretty(&Value::Object(base))?)
}
