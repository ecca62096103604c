use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use md5::{Digest, Md5};
use tempfile::NamedTempFile;

use super::{now_millis, Entry, EntryList, EntryStore, EntryWrite, StoreError};
use crate::hashing;

/// File name of the entry manifest inside a document folder.
pub const MANIFEST_NAME: &str = "entries.txt";

/// A document folder: one physical file per content hash, plus a manifest
/// mapping logical names to current hashes.
///
/// Physical files are named `<basename>.<md5hex>.<ext>`. Writes go through a
/// temp file and finish with a rename; bytes whose hash is already stored
/// are discarded and the logical entry is simply repointed.
pub struct FolderEntryStore {
    dir: PathBuf,
    id: String,
    entries: Arc<RwLock<EntryList>>,
}

impl FolderEntryStore {
    /// Open a document folder, creating it if needed and loading the
    /// manifest if present.
    pub fn open(dir: impl AsRef<Path>) -> Result<FolderEntryStore, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let dir = std::fs::canonicalize(dir)?;

        let mut entries = EntryList::default();
        let manifest = dir.join(MANIFEST_NAME);
        if manifest.is_file() {
            let text = std::fs::read_to_string(&manifest)?;
            for line in text.lines() {
                if line.is_empty() {
                    continue;
                }
                match Entry::from_manifest_line(line) {
                    Some(entry) => {
                        entries.put(entry);
                    }
                    None => tracing::debug!("skipping malformed manifest line: {line:?}"),
                }
            }
        }

        Ok(FolderEntryStore {
            id: dir.display().to_string(),
            dir,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Number of current entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("entry list poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn physical_path(&self, entry: &Entry) -> PathBuf {
        self.dir.join(entry.physical_name())
    }

    /// Rewrite the manifest: the old one is renamed with a timestamp suffix,
    /// never deleted, and the new one lands via temp file + rename.
    fn write_manifest(&self) -> Result<(), StoreError> {
        let entries = self.entries.read().expect("entry list poisoned").all();

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        for entry in &entries {
            tmp.write_all(entry.to_manifest_line().as_bytes())?;
            tmp.write_all(b"\n")?;
        }
        tmp.flush()?;

        let manifest = self.dir.join(MANIFEST_NAME);
        if manifest.is_file() {
            let mut stamp = now_millis();
            let old = loop {
                let candidate = self.dir.join(format!("{MANIFEST_NAME}.{stamp}.old"));
                if !candidate.exists() {
                    break candidate;
                }
                stamp += 1;
            };
            std::fs::rename(&manifest, &old)?;
        }
        tmp.persist(&manifest).map_err(|e| e.error)?;
        Ok(())
    }
}

impl std::fmt::Debug for FolderEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderEntryStore")
            .field("dir", &self.dir)
            .field("entries", &self.len())
            .finish()
    }
}

impl EntryStore for FolderEntryStore {
    fn has_entry_data(&self, entry: &Entry) -> bool {
        self.physical_path(entry).is_file()
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.entries.read().expect("entry list poisoned").get(name)
    }

    fn entries(&self) -> Vec<Entry> {
        self.entries.read().expect("entry list poisoned").all()
    }

    fn put_entry(&self, entry: Entry) -> Option<Entry> {
        self.entries.write().expect("entry list poisoned").put(entry)
    }

    fn input_stream(&self, name: &str) -> Result<Box<dyn Read>, StoreError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| StoreError::EntryNotFound(name.to_string()))?;
        let file = File::open(self.physical_path(&entry))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn output_stream(
        &self,
        name: &str,
        write_directly: bool,
    ) -> Result<Box<dyn EntryWrite + '_>, StoreError> {
        let state = if write_directly {
            WriterState::Direct(NamedTempFile::new_in(&self.dir)?)
        } else {
            WriterState::Buffered(Vec::new())
        };
        Ok(Box::new(FolderEntryWriter {
            dir: self.dir.clone(),
            name: name.to_string(),
            entries: Arc::clone(&self.entries),
            digester: hashing::checkout_digester(),
            state,
            closed: false,
        }))
    }

    fn store_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn finalize(&self, entries: &[Entry]) -> Result<(), StoreError> {
        self.entries
            .write()
            .expect("entry list poisoned")
            .replace_all(entries);
        self.write_manifest()
    }
}

enum WriterState {
    Buffered(Vec<u8>),
    Direct(NamedTempFile),
    Closed,
}

struct FolderEntryWriter {
    dir: PathBuf,
    name: String,
    entries: Arc<RwLock<EntryList>>,
    digester: Md5,
    state: WriterState,
    closed: bool,
}

impl FolderEntryWriter {
    fn spill(&mut self) -> std::io::Result<()> {
        if let WriterState::Buffered(bytes) = &self.state {
            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(bytes)?;
            self.state = WriterState::Direct(tmp);
        }
        Ok(())
    }

    fn close_inner(&mut self) -> Result<Entry, StoreError> {
        self.closed = true;
        let hash = hex::encode(self.digester.finalize_reset());
        hashing::checkin_digester(mem::take(&mut self.digester));

        let entry = Entry::new(mem::take(&mut self.name), now_millis(), hash);
        let physical = self.dir.join(entry.physical_name());

        match mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Buffered(bytes) => {
                // Identical hash already stored: discard the bytes and only
                // repoint the logical entry.
                if !physical.is_file() {
                    let mut tmp = NamedTempFile::new_in(&self.dir)?;
                    tmp.write_all(&bytes)?;
                    tmp.flush()?;
                    tmp.persist(&physical).map_err(|e| e.error)?;
                }
            }
            WriterState::Direct(tmp) => {
                if physical.is_file() {
                    tmp.close()?;
                } else {
                    tmp.persist(&physical).map_err(|e| e.error)?;
                }
            }
            WriterState::Closed => {}
        }

        self.entries
            .write()
            .expect("entry list poisoned")
            .put(entry.clone());
        Ok(entry)
    }
}

impl Write for FolderEntryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.state {
            WriterState::Buffered(bytes) => {
                bytes.extend_from_slice(buf);
                self.digester.update(buf);
                Ok(buf.len())
            }
            WriterState::Direct(tmp) => {
                let n = tmp.write(buf)?;
                self.digester.update(&buf[..n]);
                Ok(n)
            }
            WriterState::Closed => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "entry stream already closed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // The first flush ends the buffering window.
        self.spill()?;
        match &mut self.state {
            WriterState::Direct(tmp) => tmp.flush(),
            _ => Ok(()),
        }
    }
}

impl EntryWrite for FolderEntryWriter {
    fn close(mut self: Box<Self>) -> Result<Entry, StoreError> {
        self.close_inner()
    }
}

impl Drop for FolderEntryWriter {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                "entry stream for {:?} dropped without close(), nothing registered",
                self.name
            );
        }
    }
}
