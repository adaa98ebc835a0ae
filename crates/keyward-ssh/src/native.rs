// ABOUTME: In-process mechanisms built on the ssh-key crate, no external binaries.
// ABOUTME: NativeKeygen writes ed25519 pairs; NativeHostRemoval rewrites known_hosts.

use crate::error::{Result, SshError};
use crate::mechanism::{HostRemovalMechanism, KeyGenerationMechanism, KeygenParams};
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::io::ErrorKind;
use std::path::Path;

/// Generates ed25519 keys with the `ssh-key` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeygen;

impl KeyGenerationMechanism for NativeKeygen {
    fn generate(&self, params: &KeygenParams<'_>) -> Result<()> {
        if !params.key_type.eq_ignore_ascii_case("ed25519") {
            return Err(SshError::UnsupportedKeyType(params.key_type.to_string()));
        }

        let mut private_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .map_err(SshError::GenerateKey)?;
        if let Some(comment) = params.comment {
            private_key.set_comment(comment);
        }

        // Write private key in OpenSSH format
        let private_key_str = private_key
            .to_openssh(LineEnding::LF)
            .map_err(SshError::SerializeKey)?;

        std::fs::write(params.output, private_key_str.as_bytes()).map_err(|e| {
            SshError::WriteKey {
                path: params.output.to_path_buf(),
                source: e,
            }
        })?;

        // Set restrictive permissions on Unix (0600 = rw-------)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(params.output, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SshError::SetPermissions {
                    path: params.output.to_path_buf(),
                    source: e,
                })?;
        }

        let pub_key_path = crate::generator::public_sibling(params.output);
        let public_key_str = private_key
            .public_key()
            .to_openssh()
            .map_err(SshError::SerializeKey)?;

        std::fs::write(&pub_key_path, format!("{public_key_str}\n")).map_err(|e| {
            SshError::WriteKey {
                path: pub_key_path.clone(),
                source: e,
            }
        })?;

        Ok(())
    }
}

/// Drops `known_hosts` records whose host field names the host exactly.
///
/// Comments, blank lines and hashed entries are kept. The rewrite goes through
/// a temporary file renamed over the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHostRemoval;

impl HostRemovalMechanism for NativeHostRemoval {
    fn remove_host(&self, hostname: &str, ledger: &Path) -> Result<()> {
        let contents = match std::fs::read_to_string(ledger) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SshError::registration_io(ledger, "cannot read ledger", e)),
        };

        let mut removed = 0usize;
        let kept: String = contents
            .split_inclusive('\n')
            .filter(|line| {
                let matches = record_names_host(line, hostname);
                removed += usize::from(matches);
                !matches
            })
            .collect();

        if removed == 0 {
            return Ok(());
        }

        let tmp = crate::generator::temp_sibling(ledger);
        std::fs::write(&tmp, kept.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, ledger))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                SshError::registration_io(ledger, "cannot rewrite ledger", e)
            })?;

        tracing::debug!(host = hostname, removed, ledger = %ledger.display(), "removed stale host records");
        Ok(())
    }
}

fn record_names_host(line: &str, hostname: &str) -> bool {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return false;
    }
    let mut fields = line.split_whitespace();
    let mut hosts = fields.next().unwrap_or_default();
    // Skip a leading marker such as @cert-authority or @revoked.
    if hosts.starts_with('@') {
        hosts = fields.next().unwrap_or_default();
    }
    hosts.split(',').any(|pattern| pattern == hostname)
}
