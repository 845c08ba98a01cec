//! Binary storage for vector embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian, 0 for an index that never held a vector)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - bookmark_id: u64 (little-endian)
//! - content_hash: u64 (little-endian)
//! - owner_len: u16 (little-endian)
//! - owner: [u8; owner_len] (UTF-8)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{VectorEntry, VectorIndex};

const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Upper bound on entries preallocated from the header's count.
const MAX_PREALLOCATED_ENTRIES: u64 = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

/// Persists a `VectorIndex` to a single file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the index, rejecting files written for another model.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<VectorIndex, VectorStorageError> {
        let mut reader = BufReader::new(File::open(&self.path)?);

        let header = read_header(&mut reader).map_err(|err| truncated(err, "header"))?;
        if header.version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(
                header.version,
                FORMAT_VERSION,
            ));
        }
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;
        if dimensions == 0 && header.entry_count > 0 {
            return Err(VectorStorageError::InvalidFormat(
                "entries present but dimensions is 0".to_string(),
            ));
        }

        let mut index = if dimensions == 0 {
            VectorIndex::new()
        } else {
            let capacity = header.entry_count.min(MAX_PREALLOCATED_ENTRIES) as usize;
            VectorIndex::with_dimensions(dimensions, capacity)
        };

        for n in 0..header.entry_count {
            let (id, entry) = read_entry(&mut reader, dimensions).map_err(|err| {
                truncated(err, &format!("entry {n} of {}", header.entry_count))
            })?;
            if let Err(err) = index.insert(id, &entry.owner, entry.content_hash, entry.embedding) {
                log::warn!("skipping stored vector for bookmark {id}: {err}");
            }
        }

        Ok(index)
    }

    /// Saves the index atomically (temp file, fsync, rename).
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let dimensions = index.dimensions().unwrap_or(0);
        let dimensions = u16::try_from(dimensions).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("{dimensions} dimensions do not fit in u16"))
        })?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = tempfile::NamedTempFile::new_in(dir)?;

        {
            let mut writer = BufWriter::new(temp.as_file());
            write_header(
                &mut writer,
                &Header {
                    version: FORMAT_VERSION,
                    model_id: *model_id,
                    dimensions,
                    entry_count: index.len() as u64,
                },
            )?;

            for (id, entry) in index.iter() {
                write_entry(&mut writer, id, entry)?;
            }

            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

/// A file that ends early is malformed, not an I/O failure.
fn truncated(err: VectorStorageError, at: &str) -> VectorStorageError {
    match err {
        VectorStorageError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat(format!("file ends inside {at}"))
        }
        other => other,
    }
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N], VectorStorageError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let bytes: [u8; HEADER_SIZE] = read_array(reader)?;

    let stored_checksum = u32::from_le_bytes([bytes[43], bytes[44], bytes[45], bytes[46]]);
    if crc32fast::hash(&bytes[0..43]) != stored_checksum {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);

    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[35..43]);

    Ok(Header {
        version: bytes[0],
        model_id,
        dimensions: u16::from_le_bytes([bytes[33], bytes[34]]),
        entry_count: u64::from_le_bytes(count),
    })
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut bytes = [0u8; HEADER_SIZE];

    bytes[0] = header.version;
    bytes[1..33].copy_from_slice(&header.model_id);
    bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&bytes[0..43]);
    bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&bytes)?;
    Ok(())
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<(u64, VectorEntry), VectorStorageError> {
    let id = u64::from_le_bytes(read_array(reader)?);
    let content_hash = u64::from_le_bytes(read_array(reader)?);

    let owner_len = u16::from_le_bytes(read_array(reader)?) as usize;
    let mut owner = vec![0u8; owner_len];
    reader.read_exact(&mut owner)?;
    let owner = String::from_utf8(owner)
        .map_err(|_| VectorStorageError::InvalidFormat(format!("owner of {id} is not utf8")))?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        embedding.push(f32::from_le_bytes(read_array(reader)?));
    }

    Ok((
        id,
        VectorEntry {
            owner,
            content_hash,
            embedding,
        },
    ))
}

fn write_entry(
    writer: &mut impl Write,
    id: u64,
    entry: &VectorEntry,
) -> Result<(), VectorStorageError> {
    let owner = entry.owner.as_bytes();
    let owner_len = u16::try_from(owner.len()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("owner of {id} is too long"))
    })?;

    writer.write_all(&id.to_le_bytes())?;
    writer.write_all(&entry.content_hash.to_le_bytes())?;
    writer.write_all(&owner_len.to_le_bytes())?;
    writer.write_all(owner)?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}
