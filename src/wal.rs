use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode one record as `[len][bincode][crc32]`.
fn encode_record<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or truncated end of file.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of `R` records.
///
/// Format per entry: `[u32: len][bincode: R][u32: crc32]`, little endian.
/// A torn last entry (crash mid-write) fails the length or CRC check and is
/// dropped on replay along with anything after it.
///
/// A failed append or flush rolls the file back to the end of the last
/// successful flush, so a write reported as failed is never replayed. If the
/// rollback itself fails the log is poisoned: every later write errors until
/// a compaction rewrites the file.
pub struct Wal<R> {
    /// `None` once poisoned.
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    /// File length covered by successful flushes.
    committed_len: u64,
    pending_bytes: u64,
    pending_records: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    faults: Faults,
    _record: PhantomData<fn(R)>,
}

/// Failures injected by tests.
#[cfg(test)]
#[derive(Default)]
struct Faults {
    /// Write the buffer out, then fail the fsync.
    sync: bool,
    /// Fail the rollback truncation.
    truncate: bool,
}

fn poisoned() -> io::Error {
    io::Error::other("WAL poisoned by an earlier failed rollback")
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            committed_len,
            pending_bytes: 0,
            pending_records: 0,
            appends_since_compact: 0,
            #[cfg(test)]
            faults: Faults::default(),
            _record: PhantomData,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without syncing. Follow with `flush_sync()` once per batch.
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        let mut frame = Vec::new();
        encode_record(&mut frame, record)?;
        let writer = self.writer.as_mut().ok_or_else(poisoned)?;
        if let Err(e) = writer.write_all(&frame) {
            self.rollback();
            return Err(e);
        }
        self.pending_bytes += frame.len() as u64;
        self.pending_records += 1;
        Ok(())
    }

    /// Make every buffered record durable, or none of them.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(poisoned)?;
        let result = writer.flush().and_then(|()| {
            #[cfg(test)]
            if std::mem::take(&mut self.faults.sync) {
                return Err(io::Error::other("injected fsync failure"));
            }
            writer.get_ref().sync_all()
        });
        match result {
            Ok(()) => {
                self.committed_len += self.pending_bytes;
                self.appends_since_compact += self.pending_records;
                self.pending_bytes = 0;
                self.pending_records = 0;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Discard unflushed bytes and cut the file back to `committed_len`.
    fn rollback(&mut self) {
        self.pending_bytes = 0;
        self.pending_records = 0;
        let Some(writer) = self.writer.take() else {
            return;
        };
        // into_parts hands back the buffer instead of flushing it.
        let (file, _unwritten) = writer.into_parts();
        match self.truncate(&file) {
            Ok(()) => self.writer = Some(BufWriter::new(file)),
            Err(e) => tracing::error!(
                "WAL {}: rollback to {} bytes failed, log poisoned: {e}",
                self.path.display(),
                self.committed_len
            ),
        }
    }

    fn truncate(&mut self, file: &File) -> io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.faults.truncate) {
            return Err(io::Error::other("injected truncate failure"));
        }
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.faults.sync = true;
    }

    #[cfg(test)]
    pub(crate) fn fail_next_rollback(&mut self) {
        self.faults.truncate = true;
    }

    #[cfg(test)]
    pub(crate) fn is_poisoned(&self) -> bool {
        self.writer.is_none()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `records`: write a temp file, fsync, then
    /// rename it over the live log and reopen. Clears a poisoned log.
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                encode_record(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        // Anything still buffered belongs to the replaced file.
        if let Some(old) = self.writer.take() {
            drop(old.into_parts());
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = Some(BufWriter::new(file));
        self.pending_bytes = 0;
        self.pending_records = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read back every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<R>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if !read_frame(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_frame(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("WAL {}: CRC mismatch after {} records, ignoring tail", path.display(), records.len());
                break;
            }

            match bincode::deserialize::<R>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        Ok(records)
    }
}
