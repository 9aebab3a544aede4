//! Upload checksums

use sha2::{Digest, Sha256};
use specimen_common::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Digest algorithms a client may confirm an upload with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMethod {
    Sha256,
}

impl ChecksumMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumMethod::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumMethod::Sha256),
            _ => Err(Error::UnsupportedChecksum(s.to_string())),
        }
    }
}

/// Lowercase hex digest of the file at `path`
pub fn generate_checksum(path: &Path, method: ChecksumMethod) -> Result<String> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 64 * 1024];

    match method {
        ChecksumMethod::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Fail with [`Error::ChecksumMismatch`] unless the file hashes to `received`
pub fn validate_checksum(path: &Path, method: ChecksumMethod, received: &str) -> Result<()> {
    let computed = generate_checksum(path, method)?;
    if !computed.eq_ignore_ascii_case(received.trim()) {
        return Err(Error::ChecksumMismatch {
            path: path.display().to_string(),
            method: method.to_string(),
            received: received.to_string(),
            computed,
        });
    }
    Ok(())
}
