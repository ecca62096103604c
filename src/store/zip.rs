use std::io::{Read, Seek, Write};
use std::mem;
use std::sync::{Arc, Mutex, RwLock};

use md5::{Digest, Md5};
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipWriter};

use super::{now_millis, CacheEntryStore, Entry, EntryList, EntryStore, EntryWrite, StoreError};
use crate::hashing;

/// A read-once entry store over a ZIP archive stream.
///
/// The archive is consumed in a single streaming pass on construction; every
/// ZIP entry lands verbatim in a backing cache (memory or scratch folder),
/// which then serves all reads. Archives carry no content addressing, so the
/// store reports no identity.
pub struct ZipSourceEntryStore {
    cache: CacheEntryStore,
}

impl ZipSourceEntryStore {
    /// Stream an archive into an in-memory cache.
    pub fn read<R: Read>(reader: R) -> Result<ZipSourceEntryStore, StoreError> {
        Self::read_into(reader, CacheEntryStore::in_memory())
    }

    /// Stream an archive into a scratch-folder cache, for archives too large
    /// to hold in memory.
    pub fn read_to_scratch<R: Read>(reader: R) -> Result<ZipSourceEntryStore, StoreError> {
        Self::read_into(reader, CacheEntryStore::scratch()?)
    }

    /// Stream an archive into the given cache.
    pub fn read_into<R: Read>(
        mut reader: R,
        cache: CacheEntryStore,
    ) -> Result<ZipSourceEntryStore, StoreError> {
        while let Some(mut file) = ::zip::read::read_zipfile_from_stream(&mut reader)? {
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut sink = cache.output_stream(&name, true)?;
            std::io::copy(&mut file, &mut sink)?;
            sink.close()?;
        }
        Ok(ZipSourceEntryStore { cache })
    }

    /// Number of entries read from the archive.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for ZipSourceEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipSourceEntryStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl EntryStore for ZipSourceEntryStore {
    fn has_entry_data(&self, entry: &Entry) -> bool {
        self.cache.has_entry_data(entry)
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.cache.entry(name)
    }

    fn entries(&self) -> Vec<Entry> {
        self.cache.entries()
    }

    fn put_entry(&self, entry: Entry) -> Option<Entry> {
        tracing::debug!("ignoring put_entry({:?}) on a read-only archive", entry.name);
        None
    }

    fn input_stream(&self, name: &str) -> Result<Box<dyn Read>, StoreError> {
        self.cache.input_stream(name)
    }

    fn output_stream(
        &self,
        _name: &str,
        _write_directly: bool,
    ) -> Result<Box<dyn EntryWrite + '_>, StoreError> {
        Err(StoreError::ReadOnly)
    }

    fn store_id(&self) -> Option<String> {
        None
    }
}

struct ZipState<W: Write + Seek> {
    writer: Option<ZipWriter<W>>,
    sink: Option<W>,
}

/// A write-once entry store over an open ZIP archive writer.
///
/// Each logical name becomes a ZIP entry verbatim. Closing an entry stream
/// only ends that entry; [finalize][EntryStore::finalize] (or
/// [ZipTargetEntryStore::finish]) writes the central directory. Reads are an
/// error: the archive is an export target.
pub struct ZipTargetEntryStore<W: Write + Seek> {
    state: Arc<Mutex<ZipState<W>>>,
    entries: Arc<RwLock<EntryList>>,
}

impl<W: Write + Seek> ZipTargetEntryStore<W> {
    pub fn new(sink: W) -> ZipTargetEntryStore<W> {
        ZipTargetEntryStore {
            state: Arc::new(Mutex::new(ZipState {
                writer: Some(ZipWriter::new(sink)),
                sink: None,
            })),
            entries: Arc::new(RwLock::new(EntryList::default())),
        }
    }

    /// Write the central directory and end the archive. Idempotent.
    pub fn finish(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("archive writer poisoned");
        if let Some(writer) = state.writer.take() {
            state.sink = Some(writer.finish()?);
        }
        Ok(())
    }

    /// Retrieve the underlying sink after [finish][Self::finish].
    pub fn take_sink(&self) -> Option<W> {
        self.state.lock().expect("archive writer poisoned").sink.take()
    }
}

impl<W: Write + Seek> std::fmt::Debug for ZipTargetEntryStore<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipTargetEntryStore")
            .field("entries", &self.entries.read().expect("entry list poisoned").len())
            .finish_non_exhaustive()
    }
}

impl<W: Write + Seek> EntryStore for ZipTargetEntryStore<W> {
    fn has_entry_data(&self, _entry: &Entry) -> bool {
        // No content addressing in archives; exports always write in full.
        false
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

    fn input_stream(&self, _name: &str) -> Result<Box<dyn Read>, StoreError> {
        Err(StoreError::WriteOnly)
    }

    fn output_stream(
        &self,
        name: &str,
        _write_directly: bool,
    ) -> Result<Box<dyn EntryWrite + '_>, StoreError> {
        {
            let mut state = self.state.lock().expect("archive writer poisoned");
            let writer = state.writer.as_mut().ok_or(StoreError::WriteOnly)?;
            writer.start_file(
                name,
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            )?;
        }
        Ok(Box::new(ZipEntryWriter {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            entries: Arc::clone(&self.entries),
            digester: hashing::checkout_digester(),
        }))
    }

    fn store_id(&self) -> Option<String> {
        None
    }

    fn finalize(&self, entries: &[Entry]) -> Result<(), StoreError> {
        self.entries
            .write()
            .expect("entry list poisoned")
            .replace_all(entries);
        self.finish()
    }
}

struct ZipEntryWriter<W: Write + Seek> {
    name: String,
    state: Arc<Mutex<ZipState<W>>>,
    entries: Arc<RwLock<EntryList>>,
    digester: Md5,
}

impl<W: Write + Seek> Write for ZipEntryWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().expect("archive writer poisoned");
        let writer = state.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "archive already finished")
        })?;
        let n = writer.write(buf)?;
        self.digester.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("archive writer poisoned");
        match state.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write + Seek> EntryWrite for ZipEntryWriter<W> {
    fn close(mut self: Box<Self>) -> Result<Entry, StoreError> {
        // The ZIP entry itself ends when the next one starts or the archive
        // finishes; close only finalizes the hash and registers the entry.
        let hash = hex::encode(self.digester.finalize_reset());
        hashing::checkin_digester(mem::take(&mut self.digester));
        let entry = Entry::new(mem::take(&mut self.name), now_millis(), hash);
        self.entries
            .write()
            .expect("entry list poisoned")
            .put(entry.clone());
        Ok(entry)
    }
}
