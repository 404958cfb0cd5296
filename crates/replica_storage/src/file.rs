//! File-based journal backend.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// # Durability
///
/// - `sync()` calls `File::sync_all()`
/// - `rewrite()` writes a sibling temporary file, syncs it, renames it over
///   the journal and then syncs the parent directory
///
/// # Example
///
/// ```no_run
/// use replica_storage::{FileJournal, JournalBackend};
/// use std::path::Path;
///
/// let mut journal = FileJournal::open(Path::new("journal.log")).unwrap();
/// journal.append(b"frame").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileJournal {
    /// Opens or creates a journal file at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = open_journal_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Opens or creates a journal file, creating parent directories if needed.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut reader = &self.file;
        reader.seek(SeekFrom::Start(0))?;

        let mut buffer = Vec::with_capacity(self.size as usize);
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;

        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: self.size,
            });
        }

        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.size = new_size;
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        write_atomic(&self.path, data)?;

        // The old handle points at the replaced inode.
        self.file = open_journal_file(&self.path)?;
        self.size = data.len() as u64;
        Ok(())
    }
}

fn open_journal_file(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Replaces the file at `path` with `data` using write-then-rename.
///
/// 1. Write to `<path>.tmp`
/// 2. Sync the temporary file
/// 3. Rename it over `path`
/// 4. Sync the parent directory so the rename is durable
pub fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    // NTFS journals metadata updates; directory handles cannot be fsynced.
    Ok(())
}
