// ABOUTME: Filesystem-backed key storage, one keypair per name under a directory.
// ABOUTME: Resolves key and ledger paths and reads their raw contents.

use crate::error::{Result, SshError};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The two append-only trust ledgers kept beside the keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    KnownHosts,
    AuthorizedKeys,
}

impl Ledger {
    pub fn file_name(self) -> &'static str {
        match self {
            Ledger::KnownHosts => "known_hosts",
            Ledger::AuthorizedKeys => "authorized_keys",
        }
    }

    /// Hidden sidecar that serializes registrations into this ledger.
    pub fn lock_file_name(self) -> &'static str {
        match self {
            Ledger::KnownHosts => ".known_hosts.lock",
            Ledger::AuthorizedKeys => ".authorized_keys.lock",
        }
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Keys and ledgers under one directory.
///
/// Stateless: every call goes straight to the filesystem, nothing is cached
/// and nothing is locked.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn public_key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pub"))
    }

    pub fn ledger_path(&self, ledger: Ledger) -> PathBuf {
        self.dir.join(ledger.file_name())
    }

    pub fn lock_path(&self, ledger: Ledger) -> PathBuf {
        self.dir.join(ledger.lock_file_name())
    }

    /// Whether the keypair exists. Only the private half is checked.
    pub fn exists(&self, name: &str) -> bool {
        self.private_key_path(name).exists()
    }

    /// Read the public key file verbatim.
    ///
    /// # Errors
    /// Returns `SshError::KeyRead` if the file is missing or unreadable.
    pub fn read_public(&self, name: &str) -> Result<String> {
        read_file(&self.public_key_path(name))
    }

    /// Read the private key file verbatim.
    ///
    /// # Errors
    /// Returns `SshError::KeyRead` if the file is missing or unreadable.
    pub fn read_private(&self, name: &str) -> Result<String> {
        read_file(&self.private_key_path(name))
    }

    /// Read a ledger verbatim. A ledger nobody has written yet reads as empty.
    ///
    /// # Errors
    /// Returns `SshError::KeyRead` for any failure other than absence.
    pub fn read_ledger(&self, ledger: Ledger) -> Result<String> {
        let path = self.ledger_path(ledger);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SshError::KeyRead { path, source: e }),
        }
    }

    /// Make sure `path` is a directory, creating it and its parents if absent.
    ///
    /// # Errors
    /// Returns `SshError::PathConflict` if something other than a directory
    /// already sits at `path`; nothing is created in that case.
    pub fn ensure_directory(path: &Path) -> Result<()> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(SshError::PathConflict {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SshError::CreateDirectory {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        std::fs::create_dir_all(path).map_err(|e| SshError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "created key directory");
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SshError::KeyRead {
        path: path.to_path_buf(),
        source: e,
    })
}
