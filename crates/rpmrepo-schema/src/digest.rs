//! Checksum algorithms and hex digests.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use std::io::{self, Read};
use std::str::FromStr;

/// Checksum algorithm used for package identities and repomd entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Digest {
    /// SHA-256 (createrepo default).
    #[default]
    Sha256,
    /// SHA-1, kept for legacy repositories.
    Sha1,
}

impl Digest {
    /// Name written into `type` attributes (`sha256`, `sha1`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }

    /// Hash an in-memory buffer.
    pub fn compute(self, data: &[u8]) -> Checksum {
        let hex = match self {
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Sha1 => hex::encode(Sha1::digest(data)),
        };
        Checksum { digest: self, hex }
    }

    /// Hash everything readable from `reader` without buffering it whole.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading.
    pub fn compute_reader<R: Read>(self, mut reader: R) -> io::Result<Checksum> {
        let hex = match self {
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(&mut reader, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                io::copy(&mut reader, &mut hasher)?;
                hex::encode(hasher.finalize())
            }
        };
        Ok(Checksum { digest: self, hex })
    }

    fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
        }
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha1" | "sha" => Ok(Self::Sha1),
            other => Err(format!("Unsupported digest '{other}': expected sha256 or sha1")),
        }
    }
}

/// Algorithm tag plus lowercase hex digest.
///
/// The hex string is the record identity (`pkgid`) in every catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    digest: Digest,
    hex: String,
}

impl Checksum {
    /// Build a checksum from a precomputed hex digest, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns an error string if `hex` has the wrong length for `digest` or
    /// contains non-hex characters.
    pub fn new(digest: Digest, hex: &str) -> Result<Self, String> {
        if hex.len() != digest.hex_len() {
            return Err(format!(
                "Invalid {digest} digest: expected {} hex chars, got {} in '{hex}'",
                digest.hex_len(),
                hex.len()
            ));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid {digest} digest: non-hex characters in '{hex}'"));
        }
        Ok(Self {
            digest,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Algorithm that produced this checksum.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Lowercase hex digest.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.digest, self.hex)
    }
}
