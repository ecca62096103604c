//! Hashing wrappers for computing MD5 digests while reading or writing.
//!
//! Digesters come from a process-wide free list guarded by a single mutex:
//! check one out for a stream, check it back in when the stream closes. A
//! dropped, unfinished stream loses its digester; the next checkout creates
//! a fresh one.

use std::io::{Read, Result, Write};
use std::sync::Mutex;

use md5::{Digest, Md5};

const POOL_LIMIT: usize = 16;

static POOL: Mutex<Vec<Md5>> = Mutex::new(Vec::new());

/// Check a digester out of the process-wide pool.
pub fn checkout_digester() -> Md5 {
    POOL.lock()
        .expect("digester pool poisoned")
        .pop()
        .unwrap_or_default()
}

/// Return a digester to the pool. It is reset before reuse.
pub fn checkin_digester(mut digester: Md5) {
    Digest::reset(&mut digester);
    let mut pool = POOL.lock().expect("digester pool poisoned");
    if pool.len() < POOL_LIMIT {
        pool.push(digester);
    }
}

/// Hash a byte slice with a pooled digester, returning the lowercase hex
/// digest.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut digester = checkout_digester();
    digester.update(bytes);
    let hash = hex::encode(digester.finalize_reset());
    checkin_digester(digester);
    hash
}

/// A writer wrapper that computes an MD5 digest while data is written
/// through it.
pub struct HashingWriter<W> {
    inner: W,
    digester: Md5,
    bytes_written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Create a new hashing writer wrapping the given writer.
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            digester: checkout_digester(),
            bytes_written: 0,
        }
    }

    /// Total number of bytes written through this writer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Finish the stream: returns the inner writer, the hex digest, and the
    /// byte count. The digester goes back to the pool.
    pub fn finalize(mut self) -> (W, String, u64) {
        let hash = hex::encode(self.digester.finalize_reset());
        checkin_digester(self.digester);
        (self.inner, hash, self.bytes_written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.digester.update(&buf[..n]);
            self.bytes_written += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// A reader wrapper that computes an MD5 digest while data is read through
/// it.
pub struct HashingReader<R> {
    inner: R,
    digester: Md5,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    /// Create a new hashing reader wrapping the given reader.
    pub fn new(inner: R) -> Self {
        HashingReader {
            inner,
            digester: checkout_digester(),
            bytes_read: 0,
        }
    }

    /// Total number of bytes read through this reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish the stream: returns the inner reader, the hex digest, and the
    /// byte count. The digester goes back to the pool.
    pub fn finalize(mut self) -> (R, String, u64) {
        let hash = hex::encode(self.digester.finalize_reset());
        checkin_digester(self.digester);
        (self.inner, hash, self.bytes_read)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.digester.update(&buf[..n]);
            self.bytes_read += n as u64;
        }
        Ok(n)
    }
}
