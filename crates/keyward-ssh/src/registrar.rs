// ABOUTME: Registers public keys into the known_hosts and authorized_keys ledgers.
// ABOUTME: Ledgers get a header once and records are appended under an advisory lock.

use crate::error::{Result, SshError};
use crate::generator::temp_sibling;
use crate::mechanism::HostRemovalMechanism;
use crate::request::HostFacts;
use crate::store::{KeyStore, Ledger};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// First line of every ledger this crate creates.
pub const LEDGER_HEADER: &str = "# This file is managed by keyward. Manual edits may be lost.";

/// What a registration call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Appended,
    AlreadyPresent,
}

/// Keeps the two trust ledgers in step with generated keys.
///
/// Every registration holds an exclusive lock on the ledger's hidden
/// `.<ledger>.lock` sidecar for its whole check, purge and append sequence.
/// The sidecar is never replaced, so the lock survives removal mechanisms
/// that rewrite the ledger by renaming a new file over it.
#[derive(Clone)]
pub struct TrustRegistrar {
    remover: Arc<dyn HostRemovalMechanism>,
}

impl std::fmt::Debug for TrustRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRegistrar").finish_non_exhaustive()
    }
}

impl TrustRegistrar {
    pub fn new(remover: Arc<dyn HostRemovalMechanism>) -> Self {
        Self { remover }
    }

    /// Record `<host patterns> <public key>` in `known_hosts` for a freshly
    /// generated key.
    ///
    /// Every existing record for the hostname is purged through the removal
    /// mechanism first. If the exact record is already present nothing is
    /// touched.
    ///
    /// # Errors
    /// Returns `SshError::TrustRegistration` if the public key cannot be read,
    /// the removal fails, or the ledger cannot be appended to.
    pub fn register_host_key(
        &self,
        directory: &Path,
        key_name: &str,
        facts: &HostFacts,
    ) -> Result<Registration> {
        self.record_host_key(directory, key_name, facts, true)
    }

    /// Record `<host patterns> <public key>` in `known_hosts` for a key that
    /// already existed, without purging anything.
    ///
    /// Other keys for the same hostname keep their records, so repeated
    /// requests for several keys of one host settle instead of replacing
    /// each other.
    ///
    /// # Errors
    /// Same as `register_host_key`, minus the removal.
    pub fn backfill_host_key(
        &self,
        directory: &Path,
        key_name: &str,
        facts: &HostFacts,
    ) -> Result<Registration> {
        self.record_host_key(directory, key_name, facts, false)
    }

    /// Record the raw public key line in `authorized_keys`. Never purges.
    ///
    /// # Errors
    /// Returns `SshError::TrustRegistration` if the public key cannot be read
    /// or the ledger cannot be appended to.
    pub fn register_authorized_key(&self, directory: &Path, key_name: &str) -> Result<Registration> {
        let store = KeyStore::new(directory);
        let ledger = store.ledger_path(Ledger::AuthorizedKeys);
        let record = public_key_line(&store, key_name, &ledger)?;

        let _lock = LedgerLock::acquire(&store, Ledger::AuthorizedKeys)?;
        ensure_ledger(&ledger)?;
        if ledger_contains(&ledger, &record)? {
            tracing::debug!(key = key_name, "authorized key already registered");
            return Ok(Registration::AlreadyPresent);
        }

        let outcome = append_unique(&ledger, &record)?;
        if outcome == Registration::Appended {
            tracing::info!(key = key_name, ledger = %ledger.display(), "registered authorized key");
        }
        Ok(outcome)
    }

    fn record_host_key(
        &self,
        directory: &Path,
        key_name: &str,
        facts: &HostFacts,
        purge: bool,
    ) -> Result<Registration> {
        let store = KeyStore::new(directory);
        let ledger = store.ledger_path(Ledger::KnownHosts);
        let record = format!(
            "{} {}",
            facts.host_patterns(),
            public_key_line(&store, key_name, &ledger)?
        );

        let _lock = LedgerLock::acquire(&store, Ledger::KnownHosts)?;
        ensure_ledger(&ledger)?;
        if ledger_contains(&ledger, &record)? {
            tracing::debug!(key = key_name, host = %facts.hostname, "host key already registered");
            return Ok(Registration::AlreadyPresent);
        }

        if purge {
            let had_header = starts_with_header(&ledger)?;
            self.remover.remove_host(&facts.hostname, &ledger)?;
            // The removal may have rewritten the file without our header.
            ensure_ledger(&ledger)?;
            if had_header {
                restore_header(&ledger)?;
            }
        }

        let outcome = append_unique(&ledger, &record)?;
        if outcome == Registration::Appended {
            tracing::info!(
                key = key_name,
                host = %facts.hostname,
                ledger = %ledger.display(),
                purged = purge,
                "registered host key"
            );
        }
        Ok(outcome)
    }
}

fn public_key_line(store: &KeyStore, key_name: &str, ledger: &Path) -> Result<String> {
    let path = store.public_key_path(key_name);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        SshError::registration_io(ledger, format!("cannot read {}", path.display()), e)
    })?;
    let line = text.trim();
    if line.is_empty() || line.contains('\n') {
        return Err(SshError::registration(
            ledger,
            format!("{} is not a single public key line", path.display()),
        ));
    }
    Ok(line.to_string())
}

/// Create the ledger with its header if it does not exist yet.
///
/// Exclusive create means concurrent callers write the header at most once.
fn ensure_ledger(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{LEDGER_HEADER}")
                .map_err(|e| SshError::registration_io(path, "cannot write ledger header", e))?;
            tracing::debug!(ledger = %path.display(), "created ledger");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(SshError::registration_io(path, "cannot create ledger", e)),
    }
}

fn read_ledger(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SshError::registration_io(path, "cannot read ledger", e))
}

fn ledger_contains(path: &Path, record: &str) -> Result<bool> {
    Ok(contains_line(&read_ledger(path)?, record))
}

fn contains_line(contents: &str, record: &str) -> bool {
    contents.lines().any(|line| line.trim_end() == record)
}

fn starts_with_header(path: &Path) -> Result<bool> {
    Ok(read_ledger(path)?.lines().next() == Some(LEDGER_HEADER))
}

/// Put the header back on top of a ledger that lost it.
fn restore_header(path: &Path) -> Result<()> {
    let contents = read_ledger(path)?;
    if contents.lines().next() == Some(LEDGER_HEADER) {
        return Ok(());
    }

    let tmp = temp_sibling(path);
    std::fs::write(&tmp, format!("{LEDGER_HEADER}\n{contents}"))
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            SshError::registration_io(path, "cannot restore ledger header", e)
        })?;
    tracing::debug!(ledger = %path.display(), "restored ledger header");
    Ok(())
}

/// Append `record` as one line unless an identical line is already there.
///
/// Callers hold the ledger's `LedgerLock`.
fn append_unique(path: &Path, record: &str) -> Result<Registration> {
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| SshError::registration_io(path, "cannot open ledger for append", e))?;

    let mut handle = &file;
    let mut contents = String::new();
    handle
        .seek(SeekFrom::Start(0))
        .and_then(|_| handle.read_to_string(&mut contents))
        .map_err(|e| SshError::registration_io(path, "cannot read ledger", e))?;

    if contains_line(&contents, record) {
        return Ok(Registration::AlreadyPresent);
    }

    let mut line = String::with_capacity(record.len() + 2);
    if !contents.is_empty() && !contents.ends_with('\n') {
        line.push('\n');
    }
    line.push_str(record);
    line.push('\n');

    handle
        .write_all(line.as_bytes())
        .and_then(|()| handle.flush())
        .map_err(|e| SshError::registration_io(path, "cannot append to ledger", e))?;
    Ok(Registration::Appended)
}

/// Exclusive advisory lock on a ledger's sidecar. Released on drop.
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    fn acquire(store: &KeyStore, ledger: Ledger) -> Result<Self> {
        let path = store.lock_path(ledger);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SshError::registration_io(&path, "cannot open ledger lock", e))?;
        file.lock()
            .map_err(|e| SshError::registration_io(&path, "cannot lock ledger", e))?;
        Ok(Self { _file: file })
    }
}
