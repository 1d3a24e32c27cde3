//! SPIR-V shader blobs.

use std::path::Path;

use crate::error::{AssetError, AssetResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A compiled shader module as 32-bit words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpirvBlob {
    words: Vec<u32>,
}

impl SpirvBlob {
    /// Validates and converts raw bytes.
    ///
    /// The byte length must be a non-zero multiple of four and the first
    /// word must be the SPIR-V magic number in either byte order.
    pub fn from_bytes(bytes: &[u8]) -> AssetResult<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(AssetError::invalid(
                "SPIR-V",
                format!("length {} is not a non-zero multiple of 4", bytes.len()),
            ));
        }

        let mut words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        match words[0] {
            SPIRV_MAGIC => {}
            magic if magic.swap_bytes() == SPIRV_MAGIC => {
                words.iter_mut().for_each(|w| *w = w.swap_bytes());
            }
            magic => {
                return Err(AssetError::invalid(
                    "SPIR-V",
                    format!("bad magic number {:#010x}", magic),
                ));
            }
        }

        Ok(Self { words })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> AssetResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        tracing::debug!("Loaded SPIR-V {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(&bytes)
    }

    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_from_bytes_accepts_magic() {
        let blob = SpirvBlob::from_bytes(&module_bytes(&[SPIRV_MAGIC, 0x0001_0600, 0, 1, 0])).unwrap();
        assert_eq!(blob.words().len(), 5);
        assert_eq!(blob.words()[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_from_bytes_swaps_big_endian() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 7]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let blob = SpirvBlob::from_bytes(&bytes).unwrap();
        assert_eq!(blob.words(), &[SPIRV_MAGIC, 7]);
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(SpirvBlob::from_bytes(&[]).is_err());
        assert!(SpirvBlob::from_bytes(&[0x03, 0x02, 0x23]).is_err());
        assert!(SpirvBlob::from_bytes(&module_bytes(&[0xdead_beef])).is_err());
    }
}
