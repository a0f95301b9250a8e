//! Checkpoint Format
//!
//! A checkpoint is a list of tagged parameter blocks, one per learnable
//! tensor. Each block names its layer, its slot (`WEIGHT` or `BIAS`), its 4-D
//! shape and its values in canonical N, C, H, W order, so a checkpoint does
//! not depend on the in-memory storage order of a blob.
//!
//! ## File Layout
//!
//! All integers are little-endian `u32`, all values little-endian `f64`:
//!
//! ```text
//! "BLOBNET_CKPT"                    magic (12 bytes)
//! 1                                 version (1 byte)
//! block count
//! per block:
//!     name length, name bytes       UTF-8 layer name
//!     kind length, kind bytes       "WEIGHT" or "BIAS"
//!     N, C, H, W                    shape
//!     value count                   must equal N*C*H*W
//!     values
//! ```

use crate::error::{NetError, Result};
use crate::params::ParamSlot;
use crate::tensor::Shape;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 12] = b"BLOBNET_CKPT";
const VERSION: u8 = 1;

/// Largest block accepted on read (the value count is a `u32`)
const MAX_BLOCK_VALUES: usize = u32::MAX as usize;

/// One learnable tensor of one layer
#[derive(Clone, Debug, PartialEq)]
pub struct ParamBlock {
    pub layer_name: String,
    pub kind: ParamSlot,
    pub shape: Shape,
    /// Values in N, C, H, W order
    pub values: Vec<f64>,
}

/// All parameter blocks of a network
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub blocks: Vec<ParamBlock>,
}

fn write_u32<W: Write>(out: &mut W, v: usize) -> Result<()> {
    let v = u32::try_from(v)
        .map_err(|_| NetError::Checkpoint(format!("value {} does not fit in u32", v)))?;
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_str<W: Write>(out: &mut W, s: &str) -> Result<()> {
    write_u32(out, s.len())?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(input: &mut R) -> Result<usize> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes) as usize)
}

fn read_str<R: Read>(input: &mut R) -> Result<String> {
    let len = read_u32(input)?;
    let mut bytes = Vec::new();
    input.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(NetError::Checkpoint(format!(
            "string truncated at {} of {} bytes",
            bytes.len(),
            len
        )));
    }
    String::from_utf8(bytes).map_err(|e| NetError::Checkpoint(format!("invalid UTF-8: {}", e)))
}

impl Snapshot {
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&[VERSION])?;
        write_u32(out, self.blocks.len())?;

        for block in &self.blocks {
            if block.values.len() != block.shape.len() {
                return Err(NetError::Checkpoint(format!(
                    "block {}:{} has {} values for shape {}",
                    block.layer_name,
                    block.kind,
                    block.values.len(),
                    block.shape
                )));
            }
            write_str(out, &block.layer_name)?;
            write_str(out, block.kind.as_str())?;
            let s = block.shape;
            for dim in [s.n, s.c, s.h, s.w] {
                write_u32(out, dim)?;
            }
            write_u32(out, block.values.len())?;
            for &v in &block.values {
                out.write_all(&v.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let mut header = [0u8; 12];
        input.read_exact(&mut header)?;
        if &header != MAGIC {
            return Err(NetError::Checkpoint(
                "invalid header, expected BLOBNET_CKPT".to_string(),
            ));
        }

        let mut version = [0u8; 1];
        input.read_exact(&mut version)?;
        if version[0] != VERSION {
            return Err(NetError::Checkpoint(format!(
                "unsupported version {}",
                version[0]
            )));
        }

        let count = read_u32(input)?;
        let mut blocks = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let layer_name = read_str(input)?;
            let tag = read_str(input)?;
            let kind = ParamSlot::parse(&tag).ok_or_else(|| {
                NetError::Checkpoint(format!("unknown parameter kind '{}'", tag))
            })?;

            let mut dims = [0usize; 4];
            for d in dims.iter_mut() {
                *d = read_u32(input)?;
            }
            let shape = Shape::new(dims[0], dims[1], dims[2], dims[3]);
            let expected = dims
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .filter(|&n| n <= MAX_BLOCK_VALUES)
                .ok_or_else(|| {
                    NetError::Checkpoint(format!(
                        "block {}:{} has oversized shape {}",
                        layer_name, kind, shape
                    ))
                })?;

            let len = read_u32(input)?;
            if len != expected {
                return Err(NetError::Checkpoint(format!(
                    "block {}:{} declares {} values for shape {}",
                    layer_name, kind, len, shape
                )));
            }
            // Grow from a bounded reservation; a short file fails on read
            let mut values = Vec::with_capacity(len.min(1 << 16));
            let mut bytes = [0u8; 8];
            for _ in 0..len {
                input.read_exact(&mut bytes)?;
                values.push(f64::from_le_bytes(bytes));
            }

            blocks.push(ParamBlock {
                layer_name,
                kind,
                shape,
                values,
            });
        }
        Ok(Snapshot { blocks })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut input = BufReader::new(File::open(path)?);
        Self::read_from(&mut input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            blocks: vec![
                ParamBlock {
                    layer_name: "conv1".to_string(),
                    kind: ParamSlot::Weight,
                    shape: Shape::new(2, 1, 1, 2),
                    values: vec![0.5, -1.25, 3.0, 1e-9],
                },
                ParamBlock {
                    layer_name: "conv1".to_string(),
                    kind: ParamSlot::Bias,
                    shape: Shape::new(2, 1, 1, 1),
                    values: vec![0.0, -0.0],
                },
            ],
        }
    }

    #[test]
    fn test_round_trip_in_memory() {
        let snap = sample();
        let mut buf = Vec::new();
        snap.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..12], MAGIC);
        let back = Snapshot::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_round_trip_file() {
        let path = std::env::temp_dir().join("blobnet_checkpoint_unit.blobnet");
        sample().save(&path).unwrap();
        let back = Snapshot::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_bad_header() {
        let mut buf = b"NOT_A_CKPT!!\x01\0\0\0\0".to_vec();
        assert!(matches!(
            Snapshot::read_from(&mut buf.as_slice()),
            Err(NetError::Checkpoint(_))
        ));
        buf.clear();
        assert!(matches!(Snapshot::read_from(&mut buf.as_slice()), Err(NetError::Io(_))));
    }

    #[test]
    fn test_bad_version() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf[12] = 7;
        assert!(Snapshot::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_file() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(Snapshot::read_from(&mut buf.as_slice()), Err(NetError::Io(_))));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&1u32.to_le_bytes());
        for s in ["fc1", "WEIGHT"] {
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        for _ in 0..4 {
            buf.extend_from_slice(&65536u32.to_le_bytes());
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Snapshot::read_from(&mut buf.as_slice()),
            Err(NetError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_value_count_must_match_shape() {
        let mut snap = sample();
        snap.blocks[0].values.pop();
        assert!(snap.write_to(&mut Vec::new()).is_err());
    }
}
