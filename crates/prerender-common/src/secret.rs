//! Shared-Secret Validation
//!
//! This module provides the shared-secret check applied to `/render` and
//! `/flush` requests. The secret is a single token stored in a file on disk;
//! upstream application servers send it in the request body.
//!
//! # Security Model
//!
//! - The secret file is read once and cached for the lifetime of the process
//! - Secrets are compared using constant-time comparison to prevent timing
//!   attacks
//! - In dev mode the check is skipped entirely
//!
//! # Example
//!
//! ```no_run
//! use prerender_common::secret::SecretStore;
//!
//! // Production: validate against a secret file
//! let store = SecretStore::from_file("/etc/prerender/secret");
//! assert!(store.verify(Some("the-secret")).is_err() || true);
//!
//! // Development: accept everything
//! let dev = SecretStore::dev();
//! assert!(dev.verify(None).is_ok());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::protocol::error::{RenderError, Result};

/// Validates request secrets against a shared-secret file.
///
/// The file content (trimmed of surrounding whitespace) is the expected
/// secret. The first successful read is cached; so are read failures, since
/// a missing or empty secret file is a deployment defect that will not heal
/// mid-process.
pub struct SecretStore {
    path: Option<PathBuf>,
    cached: OnceLock<std::result::Result<String, String>>,
}

impl SecretStore {
    /// Creates a store that validates against the secret at `path`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cached: OnceLock::new(),
        }
    }

    /// Creates a dev-mode store: every request passes.
    pub fn dev() -> Self {
        Self {
            path: None,
            cached: OnceLock::new(),
        }
    }

    /// Whether a secret is required at all.
    pub fn requires_secret(&self) -> bool {
        self.path.is_some()
    }

    /// Verifies a request-supplied secret.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Internal`] with "File not found" when the secret file
    ///   is missing, or "secret file is empty!" when it holds nothing
    /// - [`RenderError::BadSecret`] when the supplied secret is absent or
    ///   does not match
    pub fn verify(&self, provided: Option<&str>) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let cached = self.cached.get_or_init(|| {
            let content = std::fs::read_to_string(path)
                .map_err(|_| "File not found".to_string())?;
            let secret = content.trim().to_string();
            if secret.is_empty() {
                return Err("secret file is empty!".to_string());
            }
            Ok(secret)
        });

        let expected = match cached {
            Ok(secret) => secret,
            Err(message) => return Err(RenderError::Internal(message.clone())),
        };

        match provided {
            Some(provided) if constant_time_eq(expected, provided) => Ok(()),
            _ => Err(RenderError::BadSecret),
        }
    }
}

impl fmt::Display for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "SecretFile({})", path.display()),
            None => write!(f, "Dev"),
        }
    }
}

/// Compares two secrets without short-circuiting on the first mismatch.
///
/// Every byte pair is XORed and folded into a single accumulator, so the
/// running time depends only on the secret's length, never on where a
/// mismatch sits. An early-exit comparison would let a caller probe the
/// secret one byte at a time through response timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn secret_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_verify_accepts_matching_secret() {
        let file = secret_file("sekret\n");
        let store = SecretStore::from_file(file.path());
        assert!(store.verify(Some("sekret")).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_or_missing_secret() {
        let file = secret_file("sekret");
        let store = SecretStore::from_file(file.path());

        assert!(matches!(
            store.verify(Some("bad")),
            Err(RenderError::BadSecret)
        ));
        assert!(matches!(store.verify(None), Err(RenderError::BadSecret)));
    }

    #[test]
    fn test_missing_file_reports_file_not_found() {
        let store = SecretStore::from_file("/nonexistent/prerender-secret");
        let err = store.verify(Some("anything")).unwrap_err();
        assert_eq!(err.to_string(), "File not found");
    }

    #[test]
    fn test_empty_file_reports_empty_secret() {
        let file = secret_file("  \n");
        let store = SecretStore::from_file(file.path());
        let err = store.verify(Some("anything")).unwrap_err();
        assert_eq!(err.to_string(), "secret file is empty!");
    }

    #[test]
    fn test_dev_mode_skips_check() {
        let store = SecretStore::dev();
        assert!(store.verify(None).is_ok());
        assert!(store.verify(Some("whatever")).is_ok());
        assert!(!store.requires_secret());
    }

    #[test]
    fn test_file_is_read_once() {
        let file = secret_file("sekret");
        let store = SecretStore::from_file(file.path());
        assert!(store.verify(Some("sekret")).is_ok());

        // Rewriting the file does not change the cached secret.
        std::fs::write(file.path(), "changed").unwrap();
        assert!(store.verify(Some("sekret")).is_ok());
        assert!(store.verify(Some("changed")).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("sekret", "sekret"));
        assert!(!constant_time_eq("sekret", "sekrex"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_display_masks_nothing_sensitive() {
        let store = SecretStore::dev();
        assert_eq!(format!("{}", store), "Dev");
    }
}
