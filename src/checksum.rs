//! Checksum and hashing utilities backing COMPUTEHASH

use crate::error::{Result, VfsError};
use sha2::Digest;
use std::io::{Read, Seek, SeekFrom};

/// Available hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
    Blake3,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Blake3
    }
}

impl HashAlgorithm {
    pub const NAMES: &'static [&'static str] = &["md5", "sha256", "sha512", "blake3"];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(VfsError::invalid_value("algorithm", s)),
        }
    }
}

/// Incremental hasher over any supported algorithm
pub enum StreamHasher {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => StreamHasher::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(sha2::Sha512::new()),
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Md5(c) => c.consume(data),
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self {
            StreamHasher::Md5(c) => c.compute().0.to_vec(),
            StreamHasher::Sha256(h) => h.finalize().to_vec(),
            StreamHasher::Sha512(h) => h.finalize().to_vec(),
            StreamHasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Hash `length` bytes (or up to end of file) starting at `offset`.
///
/// Blocking; callers on the runtime go through `spawn_blocking`.
pub fn hash_range<R: Read + Seek>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    offset: u64,
    length: Option<u64>,
) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut hasher = StreamHasher::new(algorithm);
    let mut remaining = length.unwrap_or(u64::MAX);
    let mut buffer = vec![0u8; 64 * 1024]; // 64KB chunks
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = reader.read(&mut buffer[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }
    Ok(hasher.finish())
}

/// Compute strong checksum for in-memory data
pub fn strong_checksum(data: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(strong_checksum(b"abc", HashAlgorithm::Md5)),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex::encode(strong_checksum(b"abc", HashAlgorithm::Sha256)),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(strong_checksum(b"abc", HashAlgorithm::Sha512).len(), 64);
        assert_eq!(
            strong_checksum(b"abc", HashAlgorithm::Blake3),
            blake3::hash(b"abc").as_bytes().to_vec()
        );
    }

    #[test]
    fn test_hash_range_matches_slice() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut cursor = Cursor::new(data.clone());
        let h = hash_range(&mut cursor, HashAlgorithm::Sha256, 1000, Some(100_000)).unwrap();
        assert_eq!(h, strong_checksum(&data[1000..101_000], HashAlgorithm::Sha256));

        // Length past the end stops at end of data
        let h = hash_range(&mut cursor, HashAlgorithm::Md5, 199_990, Some(500)).unwrap();
        assert_eq!(h, strong_checksum(&data[199_990..], HashAlgorithm::Md5));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(HashAlgorithm::parse("SHA256").unwrap(), HashAlgorithm::Sha256);
        assert!(HashAlgorithm::parse("crc32").is_err());
    }
}
