//! Environment fingerprinting
//!
//! Derives the identity of a cached environment from the inputs that
//! determine its contents: interpreter selection, working directory and
//! the dependency manifest. Same inputs = same environment.

use crate::error::{WithEnvError, WithEnvResult};
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::Path;

/// Length of a hex-encoded fingerprint
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Content-addressed identity of a cached environment (SHA256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a hex-encoded fingerprint, e.g. a cache directory name.
    ///
    /// Only lowercase hex of the exact digest length is accepted.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == FINGERPRINT_HEX_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    /// Hex representation, also used as the entry directory name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frame one field as `<len>:<bytes>` so field boundaries are unambiguous
fn add_part(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update(bytes.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(bytes);
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(s.to_string_lossy().into_owned().into_bytes())
}

/// Fingerprint from already-loaded manifest contents
pub fn fingerprint_bytes(tool_selector: Option<&str>, cwd: &OsStr, manifest: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    add_part(&mut hasher, tool_selector.unwrap_or("").as_bytes());
    add_part(&mut hasher, &os_bytes(cwd));
    add_part(&mut hasher, manifest);
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Fingerprint an environment definition, reading the manifest from disk
pub fn fingerprint(
    tool_selector: Option<&str>,
    cwd: &OsStr,
    manifest_path: &Path,
) -> WithEnvResult<Fingerprint> {
    let manifest = fs::read(manifest_path).map_err(|e| WithEnvError::ManifestUnreadable {
        path: manifest_path.to_path_buf(),
        source: e,
    })?;

    Ok(fingerprint_bytes(tool_selector, cwd, &manifest))
}
