use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{MemoRecord, file_timestamp, memo_filename};
use crate::error::{Error, Result};

/// Metadata file name inside the memo directory.
pub const METADATA_FILE: &str = "metadata.json";

/// In-memory memo collection backed by `metadata.json`.
///
/// Records are kept newest-first. Every mutation is applied in memory before
/// the collection is persisted; a `PersistenceFailure` does not undo it.
#[derive(Debug)]
pub struct MemoStore {
    dir: PathBuf,
    memos: Vec<MemoRecord>,
}

impl MemoStore {
    /// Open the memo directory, creating it if needed, and load its metadata.
    ///
    /// Records whose audio file no longer exists are dropped and sizes are
    /// refreshed from disk.
    ///
    /// # Errors
    /// `PersistenceFailure` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::PersistenceFailure(format!("cannot create {}: {}", dir.display(), e)))?;

        let memos = load(&dir);
        info!("Loaded {} memo(s) from {}", memos.len(), dir.display());
        Ok(Self { dir, memos })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All memos, newest first.
    pub fn memos(&self) -> &[MemoRecord] {
        &self.memos
    }

    pub fn get(&self, id: &str) -> Option<&MemoRecord> {
        self.memos.iter().find(|memo| memo.id == id)
    }

    /// Absolute path of a memo's audio file.
    pub fn path_of(&self, memo: &MemoRecord) -> PathBuf {
        self.dir.join(&memo.filename)
    }

    /// Audio path for a memo id.
    pub fn audio_path(&self, id: &str) -> Result<PathBuf> {
        self.get(id).map(|memo| self.path_of(memo)).ok_or_else(|| Error::MemoNotFound(id.to_string()))
    }

    /// A file name for a recording started at `at` that does not exist yet.
    ///
    /// Appends `_2`, `_3`, ... to the stem when two recordings start within
    /// the same second.
    pub fn unique_filename(&self, at: OffsetDateTime) -> String {
        let base = memo_filename(at);
        if !self.dir.join(&base).exists() {
            return base;
        }

        let stem = base.trim_end_matches(".wav").to_string();
        (2..)
            .map(|n| format!("{}_{}.wav", stem, n))
            .find(|candidate| !self.dir.join(candidate).exists())
            .unwrap_or(base)
    }

    /// Insert a new memo at the front and persist.
    pub fn prepend(&mut self, memo: MemoRecord) -> Result<()> {
        debug!("Adding memo {} ({})", memo.id, memo.filename);
        self.memos.insert(0, memo);
        self.save()
    }

    /// Replace the memo with the same id, moving it to the front, and persist.
    pub fn upsert_front(&mut self, memo: MemoRecord) -> Result<()> {
        self.memos.retain(|existing| existing.id != memo.id);
        self.prepend(memo)
    }

    /// Change a memo's display name. Returns `Ok(false)` for an empty title.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }

        let memo = self.get_mut(id)?;
        memo.display_name = title.to_string();
        self.save()?;
        Ok(true)
    }

    /// Add a tag. Returns `Ok(false)` if the tag is empty or already present.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(false);
        }

        let memo = self.get_mut(id)?;
        if memo.has_tag(tag) {
            return Ok(false);
        }
        memo.tags.push(tag.to_string());
        self.save()?;
        Ok(true)
    }

    /// Delete a memo's audio file and its record, then persist.
    ///
    /// A missing audio file is not an error.
    pub fn delete(&mut self, id: &str) -> Result<MemoRecord> {
        let index = self.memos.iter().position(|memo| memo.id == id).ok_or_else(|| Error::MemoNotFound(id.to_string()))?;

        let path = self.path_of(&self.memos[index]);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("Audio file already gone: {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }

        let removed = self.memos.remove(index);
        self.save()?;
        Ok(removed)
    }

    /// Copy a memo's audio file to `dest_dir` as `export_<timestamp>_<filename>`.
    ///
    /// # Returns
    /// The path of the exported copy.
    pub fn export(&self, id: &str, dest_dir: &Path, at: OffsetDateTime) -> Result<PathBuf> {
        let memo = self.get(id).ok_or_else(|| Error::MemoNotFound(id.to_string()))?;
        let source = self.path_of(memo);
        let dest = dest_dir.join(format!("export_{}_{}", file_timestamp(at), memo.filename));

        let mut input = fs::File::open(&source).map_err(|e| Error::unreadable(&source, e))?;
        fs::create_dir_all(dest_dir).map_err(|e| Error::export(dest_dir, e))?;
        let mut output = fs::File::create(&dest).map_err(|e| Error::export(&dest, e))?;
        io::copy(&mut input, &mut output).map_err(|e| Error::export(&dest, e))?;

        info!("Exported {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Write the whole collection, replacing the previous metadata atomically.
    pub fn save(&self) -> Result<()> {
        let path = self.dir.join(METADATA_FILE);
        let tmp = self.dir.join(format!("{}.tmp", METADATA_FILE));

        let data = serde_json::to_vec_pretty(&self.memos).map_err(|e| Error::PersistenceFailure(e.to_string()))?;
        fs::write(&tmp, data).map_err(|e| Error::PersistenceFailure(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| Error::PersistenceFailure(format!("{}: {}", path.display(), e)))?;

        debug!("Saved {} memo(s) to {}", self.memos.len(), path.display());
        Ok(())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut MemoRecord> {
        self.memos.iter_mut().find(|memo| memo.id == id).ok_or_else(|| Error::MemoNotFound(id.to_string()))
    }
}

/// Load and reconcile the metadata in `dir`. Never fails: unreadable
/// metadata yields an empty collection.
fn load(dir: &Path) -> Vec<MemoRecord> {
    let path = dir.join(METADATA_FILE);
    let memos: Vec<MemoRecord> = match fs::read(&path) {
        Ok(data) => serde_json::from_slice::<Option<Vec<MemoRecord>>>(&data)
            .unwrap_or_else(|e| {
                warn!("Error parsing {}: {}", path.display(), e);
                None
            })
            .unwrap_or_default(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!("Error reading {}: {}", path.display(), e);
            Vec::new()
        }
    };

    let mut valid: Vec<MemoRecord> = memos
        .into_iter()
        .filter_map(|mut memo| match fs::metadata(dir.join(&memo.filename)) {
            Ok(meta) => {
                memo.size_bytes = meta.len();
                Some(memo)
            }
            Err(_) => {
                debug!("Dropping memo {}: {} is missing", memo.id, memo.filename);
                None
            }
        })
        .collect();

    valid.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    valid
}
