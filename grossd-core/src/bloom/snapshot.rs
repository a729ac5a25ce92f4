//! Bloom ring snapshots.
//!
//! A snapshot is a small little-endian header (magic, version, parameters,
//! head index, rotation timestamp) followed by the raw bitmap
//! concatenation of every filter in ring order. A snapshot whose
//! parameters do not match the running configuration is discarded.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::{BloomFilter, BloomRing};

const MAGIC: [u8; 4] = *b"GRSB";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not a bloom ring snapshot (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    BadVersion(u32),

    #[error(
        "snapshot parameters mismatch: file has {found_bufs} buffers of 2^{found_bits} bits, \
         configured {expected_bufs} buffers of 2^{expected_bits} bits"
    )]
    ParameterMismatch {
        found_bufs: u32,
        found_bits: u32,
        expected_bufs: u32,
        expected_bits: u32,
    },
}

impl BloomRing {
    /// Write a snapshot atomically (temp file + rename).
    pub fn save(&self, path: &Path, rotated_at: SystemTime) -> Result<(), SnapshotError> {
        let tmp = path.with_extension("tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let state = self.state.read();

            out.write_all(&MAGIC)?;
            write_u32(&mut out, VERSION)?;
            write_u32(&mut out, self.num_bufs as u32)?;
            write_u32(&mut out, self.filter_bits)?;
            write_u32(&mut out, state.head as u32)?;
            let secs = rotated_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs();
            write_u64(&mut out, secs)?;

            for buf in &state.bufs {
                for word in buf.words() {
                    out.write_all(&word.load(Ordering::Relaxed).to_le_bytes())?;
                }
            }
            out.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a snapshot written with [`BloomRing::save`]. The configured
    /// parameters must match the ones in the file.
    pub fn load(
        path: &Path,
        num_bufs: usize,
        filter_bits: u32,
    ) -> Result<(Self, SystemTime), SnapshotError> {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_u32(&mut input)?;
        if version != VERSION {
            return Err(SnapshotError::BadVersion(version));
        }
        let found_bufs = read_u32(&mut input)?;
        let found_bits = read_u32(&mut input)?;
        if found_bufs as usize != num_bufs || found_bits != filter_bits {
            return Err(SnapshotError::ParameterMismatch {
                found_bufs,
                found_bits,
                expected_bufs: num_bufs as u32,
                expected_bits: filter_bits,
            });
        }
        let head = read_u32(&mut input)? as usize % num_bufs.max(1);
        let rotated_at = UNIX_EPOCH + Duration::from_secs(read_u64(&mut input)?);

        let ring = BloomRing::new(num_bufs, filter_bits);
        {
            let mut state = ring.state.write();
            for buf in &mut state.bufs {
                fill_filter(&mut input, buf)?;
            }
            state.head = head;
        }
        Ok((ring, rotated_at))
    }
}

fn fill_filter<R: Read>(input: &mut R, filter: &BloomFilter) -> Result<(), SnapshotError> {
    for idx in 0..filter.words().len() {
        let mut bytes = [0u8; 8];
        input.read_exact(&mut bytes)?;
        filter.load_word(idx, u64::from_le_bytes(bytes));
    }
    Ok(())
}

fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn write_u64<W: Write>(out: &mut W, value: u64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}
