//! Append-only per-chunk log of compressed deltas.
//!
//! File layout:
//!
//! ```text
//! [magic "VXDL"] [version: u32 LE] [depth: u8]
//! repeated: [len: u32 LE] [lz4 block, uncompressed size prepended]
//! ```
//!
//! Each record is one [`Chunk::delta_bytes`] stream; replaying every record in
//! order on top of the generated chunk restores the edited state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};
use crate::voxel::chunk::{Chunk, ChunkCoord};

const MAGIC: &[u8; 4] = b"VXDL";
const VERSION: u32 = 1;

/// File extension for delta logs
pub const DELTA_FILE_EXTENSION: &str = "vxd";

/// Serialize a chunk's pending edits and compress them; the chunk becomes clean
pub fn encode_chunk_delta(chunk: &mut Chunk) -> Result<Vec<u8>> {
    let bytes = chunk.encode_delta()?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decompress and apply one delta produced by [`encode_chunk_delta`]
pub fn apply_chunk_delta(chunk: &mut Chunk, data: &[u8]) -> Result<()> {
    let bytes = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Decode(format!("LZ4 decompression failed: {}", e)))?;
    chunk.apply_delta(&bytes)
}

/// Log file name for a chunk
pub fn delta_path(base_dir: &Path, coord: ChunkCoord) -> PathBuf {
    base_dir.join(format!(
        "chunk_{}_{}_{}.{}",
        coord.x, coord.y, coord.z, DELTA_FILE_EXTENSION
    ))
}

/// Directory of per-chunk delta logs
pub struct DeltaLog {
    base_dir: PathBuf,
}

impl DeltaLog {
    /// Open (and create if needed) a log directory
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, coord: ChunkCoord) -> PathBuf {
        delta_path(&self.base_dir, coord)
    }

    /// Whether any deltas were recorded for `coord`
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.path_for(coord).exists()
    }

    /// Append the chunk's pending edits as one record.
    ///
    /// Returns `false` without touching disk if the chunk is clean. The chunk
    /// is only marked clean once the record is flushed.
    pub fn append(&self, chunk: &mut Chunk) -> Result<bool> {
        if !chunk.is_dirty() {
            return Ok(false);
        }

        let record = lz4_flex::compress_prepend_size(&chunk.delta_bytes()?);
        let len = u32::try_from(record.len())
            .map_err(|_| Error::Decode(format!("delta record of {} bytes is too large", record.len())))?;

        let path = self.path_for(chunk.coord);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let start = file.metadata()?.len();
        let depth = chunk.depth();

        write_or_rollback(&path, &file, start, |file| {
            let mut writer = BufWriter::new(file);
            if start == 0 {
                writer.write_all(MAGIC)?;
                writer.write_all(&VERSION.to_le_bytes())?;
                writer.write_all(&[depth])?;
            }
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&record)?;
            writer.flush()
        })?;

        chunk.mark_clean();
        log::trace!("Appended {} byte delta for {:?}", len, chunk.coord);
        Ok(true)
    }

    /// Apply every recorded delta for the chunk, oldest first.
    ///
    /// Returns the number of records applied (0 if there is no log). All
    /// records are read and applied to a copy first, so a truncated or corrupt
    /// log fails without changing the chunk.
    pub fn replay(&self, chunk: &mut Chunk) -> Result<usize> {
        let path = self.path_for(chunk.coord);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        let depth = read_header(&mut reader)?;
        if depth != chunk.depth() {
            return Err(Error::ChunkDepthMismatch {
                expected: chunk.depth(),
                found: depth,
            });
        }

        let mut records = Vec::new();
        while let Some(record) = read_record(&mut reader)? {
            records.push(record);
        }
        if records.is_empty() {
            return Ok(0);
        }

        let mut staged = chunk.clone();
        for record in &records {
            apply_chunk_delta(&mut staged, record)?;
        }
        *chunk = staged;

        let applied = records.len();
        log::debug!("Replayed {} deltas for {:?}", applied, chunk.coord);
        Ok(applied)
    }

    /// Delete the log for a chunk, e.g. after its state was saved in full
    pub fn clear(&self, coord: ChunkCoord) -> Result<()> {
        match std::fs::remove_file(self.path_for(coord)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Run `write` against the log file, cutting it back to `start` bytes if it
/// fails so no torn record is left behind. A log that was empty is removed.
fn write_or_rollback<F>(path: &Path, file: &File, start: u64, write: F) -> Result<()>
where
    F: FnOnce(&File) -> io::Result<()>,
{
    let Err(e) = write(file) else {
        return Ok(());
    };

    let rollback = if start == 0 {
        std::fs::remove_file(path)
    } else {
        file.set_len(start)
    };
    if let Err(rollback_err) = rollback {
        log::warn!("Failed to roll back {}: {}", path.display(), rollback_err);
    }
    Err(e.into())
}

fn read_header(reader: &mut impl Read) -> Result<u8> {
    let mut header = [0u8; 9];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Decode("delta log header is truncated".into()),
        _ => Error::Io(e),
    })?;

    if &header[0..4] != MAGIC {
        return Err(Error::Decode("Invalid magic bytes".into()));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(Error::Decode(format!("Unsupported version: {}", version)));
    }
    Ok(header[8])
}

/// Next record, or `None` at a clean end of file
fn read_record(reader: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::Decode("delta log ends inside a record length".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut record = vec![0u8; len];
    reader.read_exact(&mut record).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            log::warn!("Delta log record of {} bytes is truncated", len);
            Error::Decode(format!("delta record of {} bytes is truncated", len))
        }
        _ => Error::Io(e),
    })?;
    Ok(Some(record))
}
