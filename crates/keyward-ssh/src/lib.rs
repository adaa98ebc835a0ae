// ABOUTME: SSH key provisioning core for configuration management.
// ABOUTME: Generates keypairs once, registers them in trust ledgers, serves key text.

//! # keyward-ssh
//!
//! Provisions SSH key material for hosts and users on one local filesystem
//! tree. A caller hands [`KeyRequestService::fulfil`] a [`KeyRequest`]; the
//! service generates the named keypair on first use, registers host keys in
//! `known_hosts` and authentication keys in `authorized_keys`, and returns the
//! requested artifact as text.
//!
//! ## Layout
//!
//! Under `<base>/<directory>/`:
//!
//! - `<name>` and `<name>.pub`: the keypair, written once and never touched again
//! - `known_hosts`: `host[,fqdn][,ip] <public key>` records
//! - `authorized_keys`: raw public key lines
//!
//! Both ledgers start with a single managed-by header comment.
//!
//! ## Example
//!
//! ```no_run
//! use keyward_ssh::{HostFacts, KeyRequest, KeyRequestService, RequestKind};
//!
//! let service = KeyRequestService::openssh("/etc/keyward", "ssh-keygen");
//! let private_key = service
//!     .fulfil(
//!         KeyRequest::new(RequestKind::Private)
//!             .named("host1.example.com")
//!             .directory("ssh/hostkeys")
//!             .host_key(true)
//!             .facts(HostFacts::new("host1.example.com")),
//!     )
//!     .expect("key should be served");
//! print!("{private_key}");
//! ```

mod error;
mod generator;
mod mechanism;
mod native;
mod registrar;
mod request;
mod service;
mod store;

// Re-export primary types and functions
pub use error::{Result, SshError};
pub use generator::{EnsureOutcome, KeyGenerator};
pub use mechanism::{HostRemovalMechanism, KeyGenerationMechanism, KeygenParams, OpenSshKeygen};
pub use native::{NativeHostRemoval, NativeKeygen};
pub use registrar::{Registration, TrustRegistrar, LEDGER_HEADER};
pub use request::{
    HostFacts, KeyRequest, RequestKind, ResolvedRequest, DEFAULT_DIRECTORY, DEFAULT_KEY_TYPE,
};
pub use service::{KeyRequestService, DEFAULT_BASE_PATH};
pub use store::{KeyStore, Ledger};
