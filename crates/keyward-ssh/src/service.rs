// ABOUTME: KeyRequestService, the single entry point the provisioning layer calls.
// ABOUTME: Validates a request, ensures the keypair and ledgers, returns the artifact.

use crate::error::{Result, SshError};
use crate::generator::KeyGenerator;
use crate::mechanism::{HostRemovalMechanism, KeyGenerationMechanism, OpenSshKeygen};
use crate::native::{NativeHostRemoval, NativeKeygen};
use crate::registrar::TrustRegistrar;
use crate::request::{KeyRequest, RequestKind, ResolvedRequest};
use crate::store::{KeyStore, Ledger};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default root of the managed tree.
pub const DEFAULT_BASE_PATH: &str = "/etc/keyward";

/// Serves key material and keeps the trust ledgers current.
#[derive(Debug, Clone)]
pub struct KeyRequestService {
    base_path: PathBuf,
    generator: KeyGenerator,
    registrar: TrustRegistrar,
}

impl KeyRequestService {
    pub fn new(
        base_path: impl Into<PathBuf>,
        keygen: Arc<dyn KeyGenerationMechanism>,
        remover: Arc<dyn HostRemovalMechanism>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            generator: KeyGenerator::new(keygen),
            registrar: TrustRegistrar::new(remover),
        }
    }

    /// Service backed by the given `ssh-keygen` binary for both mechanisms.
    pub fn openssh(base_path: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        let keygen = Arc::new(OpenSshKeygen::new(program));
        Self::new(base_path, keygen.clone(), keygen)
    }

    /// Service that never leaves the process (ed25519 keys only).
    pub fn native(base_path: impl Into<PathBuf>) -> Self {
        Self::new(base_path, Arc::new(NativeKeygen), Arc::new(NativeHostRemoval))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve `request` to the text it asks for.
    ///
    /// # Errors
    /// Returns `SshError::InvalidRequest` straight away for a malformed
    /// request. Anything that fails afterwards comes back as
    /// `SshError::Request`, which names the request kind and key; use
    /// `SshError::root` to get at the underlying cause.
    pub fn fulfil(&self, request: KeyRequest) -> Result<String> {
        let request = request.resolve()?;

        self.fulfil_resolved(&request)
            .map_err(|source| SshError::Request {
                kind: request.kind(),
                name: request.name().map(str::to_string),
                source: Box::new(source),
            })
    }

    fn fulfil_resolved(&self, request: &ResolvedRequest) -> Result<String> {
        let full_path = self.base_path.join(request.directory());
        KeyStore::ensure_directory(&full_path)?;
        let store = KeyStore::new(&full_path);

        if let Some(name) = request.name() {
            let outcome = self.generator.ensure_key_pair(
                &full_path,
                name,
                request.comment(),
                request.key_type(),
            )?;

            if request.host_key() {
                let facts = request.facts().ok_or_else(|| {
                    SshError::InvalidRequest("host key registration requires host facts".to_string())
                })?;
                // Only a new key replaces the host's records; an existing key
                // is added if missing so it never evicts its siblings.
                if outcome.created {
                    self.registrar.register_host_key(&full_path, name, facts)?;
                } else {
                    self.registrar.backfill_host_key(&full_path, name, facts)?;
                }
            }
            if request.auth_key() {
                self.registrar.register_authorized_key(&full_path, name)?;
            }

            if !outcome.created {
                tracing::debug!(key = name, kind = %request.kind(), "serving existing key");
            }
        }

        match (request.kind(), request.name()) {
            (RequestKind::Public, Some(name)) => store.read_public(name),
            (RequestKind::Private, Some(name)) => store.read_private(name),
            (RequestKind::KnownHosts, _) => store.read_ledger(Ledger::KnownHosts),
            (RequestKind::AuthorizedKeys, _) => store.read_ledger(Ledger::AuthorizedKeys),
            (kind @ (RequestKind::Public | RequestKind::Private), None) => {
                unreachable!("validation requires a name for {kind} requests")
            }
        }
    }
}
