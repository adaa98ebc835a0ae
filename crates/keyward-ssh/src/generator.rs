// ABOUTME: Idempotent keypair generation on top of an injected mechanism.
// ABOUTME: Generates into a temporary sibling path and renames into place.

use crate::error::{Result, SshError};
use crate::mechanism::{KeyGenerationMechanism, KeygenParams};
use crate::store::KeyStore;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of `KeyGenerator::ensure_key_pair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub created: bool,
}

/// Generates a keypair exactly once per name.
#[derive(Clone)]
pub struct KeyGenerator {
    mechanism: Arc<dyn KeyGenerationMechanism>,
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

impl KeyGenerator {
    pub fn new(mechanism: Arc<dyn KeyGenerationMechanism>) -> Self {
        Self { mechanism }
    }

    /// Make sure `<directory>/<name>` and its `.pub` sibling exist.
    ///
    /// An existing private key is never regenerated or validated. New keys are
    /// generated at a temporary path, then the public half and finally the
    /// private half are renamed into place, so a visible private key always
    /// has its public key beside it.
    ///
    /// Two processes racing on the same absent name can both generate; the
    /// last rename wins. Only the first run for a name is exposed to this.
    ///
    /// # Errors
    /// Returns `SshError::KeyGeneration` if the mechanism fails, or
    /// `SshError::WriteKey` if the generated files cannot be moved into place.
    pub fn ensure_key_pair(
        &self,
        directory: &Path,
        name: &str,
        comment: Option<&str>,
        key_type: &str,
    ) -> Result<EnsureOutcome> {
        let store = KeyStore::new(directory);
        if store.exists(name) {
            tracing::debug!(key = name, "keypair already present");
            return Ok(EnsureOutcome { created: false });
        }

        let final_private = store.private_key_path(name);
        let final_public = store.public_key_path(name);
        let tmp_private = temp_sibling(&final_private);
        let tmp_public = public_sibling(&tmp_private);

        let params = KeygenParams {
            key_type,
            comment,
            output: &tmp_private,
        };

        let command = self.mechanism.describe(&params);
        let installed = self
            .mechanism
            .generate(&params)
            .and_then(|()| install(&tmp_public, &final_public, &command))
            .and_then(|()| install(&tmp_private, &final_private, &command));

        if let Err(e) = installed {
            let _ = std::fs::remove_file(&tmp_private);
            let _ = std::fs::remove_file(&tmp_public);
            return Err(e);
        }

        tracing::info!(
            key = name,
            key_type,
            path = %final_private.display(),
            "generated new keypair"
        );
        Ok(EnsureOutcome { created: true })
    }
}

fn install(from: &Path, to: &Path, command: &str) -> Result<()> {
    if !from.exists() {
        return Err(SshError::KeyGeneration {
            command: command.to_string(),
            detail: format!("finished without producing {}", from.display()),
        });
    }
    std::fs::rename(from, to).map_err(|e| SshError::WriteKey {
        path: to.to_path_buf(),
        source: e,
    })
}

/// `<path>.pub`, keeping any dots already in the file name.
pub(crate) fn public_sibling(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".pub");
    PathBuf::from(os)
}

/// A hidden, randomly suffixed path in the same directory as `path`.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u32 = rand::random();
    path.with_file_name(format!(
        ".{file_name}.{}.{suffix:08x}.tmp",
        std::process::id()
    ))
}
