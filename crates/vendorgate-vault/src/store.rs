//! File-backed credential store.
//!
//! The [`CredentialStore`] keeps one JSON document per (vendor, user_id)
//! pair under a root directory:
//!
//! ```text
//! <root>/
//! ├── hubspot/
//! │   └── local.json
//! └── zoom/
//!     ├── local.json
//!     └── alice@example.com.json
//! ```
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the record, so a reader sees either the old record or the
//! new one, never a mix of both. Concurrent writers to the same pair resolve
//! as last-writer-wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::credential::Credential;
use crate::error::{Result, VaultError};

/// Extension of every credential record file.
const RECORD_EXTENSION: &str = "json";

/// Directory-per-vendor JSON credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Open (or create) a credential store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Io`] if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "credential store ready");
        Ok(Self { root })
    }

    /// The directory this store writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `(vendor, user_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidKey`] if either component cannot be used
    /// as a single path segment.
    pub fn record_path(&self, vendor: &str, user_id: &str) -> Result<PathBuf> {
        validate_key_segment(vendor)?;
        validate_key_segment(user_id)?;
        Ok(self
            .root
            .join(vendor)
            .join(format!("{user_id}.{RECORD_EXTENSION}")))
    }

    /// Load the credential stored for `(vendor, user_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CredentialNotFound`] when no record exists,
    /// [`VaultError::Serialization`] when the record is unreadable, and
    /// [`VaultError::Io`] on any other filesystem failure.
    pub fn load(&self, vendor: &str, user_id: &str) -> Result<Credential> {
        let path = self.record_path(vendor, user_id)?;

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::CredentialNotFound {
                    vendor: vendor.to_string(),
                    user_id: user_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let credential: Credential = serde_json::from_slice(&data)?;
        tracing::debug!(vendor, user_id, "loaded credential");
        Ok(credential)
    }

    /// Replace the credential stored for `(vendor, user_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyMismatch`] if the record's own vendor/user id
    /// differ from the key, and [`VaultError::Io`] if the write fails.
    pub fn save(&self, vendor: &str, user_id: &str, credential: &Credential) -> Result<()> {
        if credential.vendor != vendor || credential.user_id != user_id {
            return Err(VaultError::KeyMismatch {
                vendor: vendor.to_string(),
                user_id: user_id.to_string(),
                record_vendor: credential.vendor.clone(),
                record_user_id: credential.user_id.clone(),
            });
        }

        let path = self.record_path(vendor, user_id)?;
        let dir = path
            .parent()
            .ok_or_else(|| VaultError::InvalidKey {
                key: vendor.to_string(),
                reason: "record path has no parent directory".into(),
            })?;
        std::fs::create_dir_all(dir)?;

        let data = serde_json::to_vec_pretty(credential)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;

        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&path).map_err(|e| VaultError::Io(e.error))?;

        tracing::info!(vendor, user_id, "saved credential");
        Ok(())
    }

    /// Delete the credential stored for `(vendor, user_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CredentialNotFound`] if nothing was stored.
    pub fn delete(&self, vendor: &str, user_id: &str) -> Result<()> {
        let path = self.record_path(vendor, user_id)?;

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(vendor, user_id, "deleted credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::CredentialNotFound {
                    vendor: vendor.to_string(),
                    user_id: user_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// User ids holding a credential for `vendor`, sorted.
    pub fn list(&self, vendor: &str) -> Result<Vec<String>> {
        validate_key_segment(vendor)?;
        let dir = self.root.join(vendor);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut users = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && validate_key_segment(stem).is_ok()
            {
                users.push(stem.to_string());
            }
        }
        users.sort();
        Ok(users)
    }

    /// Vendors with at least one directory in the store, sorted.
    pub fn vendors(&self) -> Result<Vec<String>> {
        let mut vendors = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && validate_key_segment(name).is_ok()
            {
                vendors.push(name.to_string());
            }
        }
        vendors.sort();
        Ok(vendors)
    }
}

/// Reject anything that is not a single, unambiguous path segment.
///
/// Only lowercase ASCII letters, digits and `._@-` are accepted, so two
/// distinct keys never map to the same file, even on case-insensitive
/// filesystems.
///
/// # Errors
///
/// Returns [`VaultError::InvalidKey`] naming the offending segment.
pub fn validate_key_segment(segment: &str) -> Result<()> {
    let invalid = |reason: &str| VaultError::InvalidKey {
        key: segment.to_string(),
        reason: reason.to_string(),
    };

    if segment.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if segment == "." || segment == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    if segment.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| {
            !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '@'))
        })
    {
        let reason = if c.is_ascii_uppercase() {
            format!("uppercase character {c:?} (use lowercase)")
        } else {
            format!("unsupported character {c:?}")
        };
        return Err(invalid(&reason));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credentials")).unwrap();
        (dir, store)
    }

    #[test]
    fn record_path_layout() {
        let (_dir, store) = test_store();
        let path = store.record_path("hubspot", "local").unwrap();
        assert!(path.ends_with("hubspot/local.json"));
    }

    #[test]
    fn key_validation_rejects_traversal() {
        assert!(validate_key_segment("..").is_err());
        assert!(validate_key_segment(".").is_err());
        assert!(validate_key_segment("").is_err());
        assert!(validate_key_segment("a/b").is_err());
        assert!(validate_key_segment("a\\b").is_err());
        assert!(validate_key_segment(".hidden").is_err());
        assert!(validate_key_segment("alice@example.com").is_ok());
        assert!(validate_key_segment("user_01-x").is_ok());
    }

    #[test]
    fn keys_differing_only_in_case_cannot_collide() {
        let (_dir, store) = test_store();
        store
            .save("acme", "alice", &Credential::new("acme", "alice", "tok"))
            .unwrap();

        let err = store
            .save("acme", "Alice", &Credential::new("acme", "Alice", "other"))
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey { .. }));
        assert!(err.to_string().contains("lowercase"));
        assert!(matches!(
            store.load("ACME", "alice"),
            Err(VaultError::InvalidKey { .. })
        ));
        assert_eq!(store.load("acme", "alice").unwrap().access_token, "tok");
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = test_store();
        let err = store.load("acme", "local").unwrap_err();
        assert!(matches!(err, VaultError::CredentialNotFound { .. }));
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = test_store();
        let cred = Credential::new("salesforce", "local", "00D!AQ")
            .with_refresh_token("5Aep")
            .with_expires_at(1_800_000_000)
            .with_extra("instance_url", "https://acme.my.salesforce.com")
            .with_extra("nested", serde_json::json!({"a": [1, 2, {"b": null}]}));

        store.save("salesforce", "local", &cred).unwrap();
        let loaded = store.load("salesforce", "local").unwrap();
        assert_eq!(loaded, cred);
    }

    #[test]
    fn save_replaces_whole_record() {
        let (_dir, store) = test_store();
        let first = Credential::new("zoom", "local", "one").with_extra("stale", "yes");
        let second = Credential::new("zoom", "local", "two");

        store.save("zoom", "local", &first).unwrap();
        store.save("zoom", "local", &second).unwrap();

        let loaded = store.load("zoom", "local").unwrap();
        assert_eq!(loaded.access_token, "two");
        assert!(loaded.extra.get("stale").is_none());
    }

    #[test]
    fn save_rejects_key_mismatch() {
        let (_dir, store) = test_store();
        let cred = Credential::new("zoom", "alice", "tok");
        let err = store.save("zoom", "bob", &cred).unwrap_err();
        assert!(matches!(err, VaultError::KeyMismatch { .. }));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let (_dir, store) = test_store();
        let cred = Credential::new("zoom", "local", "tok");
        store.save("zoom", "local", &cred).unwrap();
        store.save("zoom", "local", &cred).unwrap();

        let names: Vec<_> = std::fs::read_dir(store.root().join("zoom"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["local.json".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = test_store();
        store
            .save("zoom", "local", &Credential::new("zoom", "local", "tok"))
            .unwrap();
        let path = store.record_path("zoom", "local").unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_record_is_serialization_error() {
        let (_dir, store) = test_store();
        let path = store.record_path("acme", "local").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = store.load("acme", "local").unwrap_err();
        assert!(matches!(err, VaultError::Serialization(_)));
    }

    #[test]
    fn delete_and_list() {
        let (_dir, store) = test_store();
        store
            .save("acme", "bob", &Credential::new("acme", "bob", "b"))
            .unwrap();
        store
            .save("acme", "alice", &Credential::new("acme", "alice", "a"))
            .unwrap();
        store
            .save("zoom", "local", &Credential::new("zoom", "local", "z"))
            .unwrap();

        assert_eq!(store.list("acme").unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.vendors().unwrap(), vec!["acme", "zoom"]);
        assert!(store.list("unknown").unwrap().is_empty());

        store.delete("acme", "bob").unwrap();
        assert_eq!(store.list("acme").unwrap(), vec!["alice"]);
        assert!(matches!(
            store.delete("acme", "bob"),
            Err(VaultError::CredentialNotFound { .. })
        ));
    }
}
