//! Content-addressing primitives: V2 digests (`<algorithm>:<hex>`), the
//! streaming tarsum reader that computes one while bytes flow through
//! the applier, and random 64-hex-char V1 image ID generation.

use std::fmt::Display;
use std::io::{self, Read};
use std::str::FromStr;

use rand::RngCore;
use sha1::Digest as _;
use sha2::Digest as _;

/// Hash algorithm backing a tarsum digest label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarsumAlgorithm {
    Sha1,
    Sha256,
}

impl TarsumAlgorithm {
    /// Parse the algorithm component of a digest, e.g.
    /// `tarsum.dev+sha256`, `tarsum+sha1`, or plain `sha256`.
    pub fn from_label(label: &str) -> Option<Self> {
        if label.ends_with("sha256") {
            Some(Self::Sha256)
        } else if label.ends_with("sha1") {
            Some(Self::Sha1)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sha1 => "tarsum.dev+sha1",
            Self::Sha256 => "tarsum.dev+sha256",
        }
    }
}

/// A V2 content digest, `<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: String,
    pub hex: String,
}

impl Digest {
    /// The `TarsumAlgorithm` this digest's algorithm label names, if any.
    pub fn tarsum_algorithm(&self) -> Option<TarsumAlgorithm> {
        TarsumAlgorithm::from_label(&self.algorithm)
    }

    /// Case-insensitive comparison against a computed hex digest, per
    /// §4.4's "compare it (case-insensitively) against the expected
    /// digest".
    pub fn matches_hex(&self, computed_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(computed_hex)
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed digest (missing ':'): {s}"))?;
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Wraps a reader, accumulating a running hash of every byte that flows
/// through it. Used to compute the tarsum of a V2 layer's decompressed
/// bytes as the tar applier consumes them, without buffering the whole
/// stream.
enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn new(algorithm: TarsumAlgorithm) -> Self {
        match algorithm {
            TarsumAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            TarsumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

pub struct TarsumReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> TarsumReader<R> {
    pub fn new(inner: R, algorithm: TarsumAlgorithm) -> Self {
        TarsumReader {
            inner,
            hasher: Hasher::new(algorithm),
        }
    }

    /// Consume the reader and return the hex digest of everything read
    /// so far. Typically called once the applier has drained the
    /// stream to EOF.
    pub fn finalize(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl<R: Read> Read for TarsumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Generate a fresh random 64-hex-char V1 image ID.
pub fn generate_random_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_parses_algorithm_and_hex() {
        let d: Digest = "tarsum.dev+sha256:abc123".parse().unwrap();
        assert_eq!(d.algorithm, "tarsum.dev+sha256");
        assert_eq!(d.hex, "abc123");
        assert_eq!(d.tarsum_algorithm(), Some(TarsumAlgorithm::Sha256));
    }

    #[test]
    fn digest_without_colon_is_malformed() {
        assert!("notadigest".parse::<Digest>().is_err());
    }

    #[test]
    fn digest_hex_comparison_is_case_insensitive() {
        let d: Digest = "sha256:ABCDEF".parse().unwrap();
        assert!(d.matches_hex("abcdef"));
        assert!(!d.matches_hex("000000"));
    }

    #[test]
    fn tarsum_reader_computes_sha256_of_bytes_read() {
        let data = b"hello world";
        let mut reader = TarsumReader::new(&data[..], TarsumAlgorithm::Sha256);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        let digest = reader.finalize();

        let mut expected = sha2::Sha256::new();
        expected.update(data);
        assert_eq!(digest, hex::encode(expected.finalize()));
    }

    #[test]
    fn generated_ids_are_64_lowercase_hex_chars() {
        let id = generate_random_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(generate_random_id(), generate_random_id());
    }
}
