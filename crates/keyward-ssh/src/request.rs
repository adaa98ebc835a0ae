// ABOUTME: Strongly typed key requests with defaults applied at construction.
// ABOUTME: Validation turns a loose KeyRequest into a ResolvedRequest exactly once.

use crate::error::{Result, SshError};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Default key type handed to the generation mechanism.
pub const DEFAULT_KEY_TYPE: &str = "rsa";

/// Default directory, relative to the base path, holding keys and ledgers.
pub const DEFAULT_DIRECTORY: &str = "ssh";

/// Which artifact a request returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Public,
    Private,
    KnownHosts,
    AuthorizedKeys,
}

impl RequestKind {
    /// Ledger reads are the only kinds that may omit a key name.
    pub fn is_ledger_read(self) -> bool {
        matches!(self, RequestKind::KnownHosts | RequestKind::AuthorizedKeys)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Public => "public",
            RequestKind::Private => "private",
            RequestKind::KnownHosts => "known_hosts",
            RequestKind::AuthorizedKeys => "authorized_keys",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = SshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(RequestKind::Public),
            "private" => Ok(RequestKind::Private),
            "known_hosts" => Ok(RequestKind::KnownHosts),
            "authorized_keys" => Ok(RequestKind::AuthorizedKeys),
            other => Err(SshError::InvalidRequest(format!(
                "unknown request kind {other:?} (expected public, private, known_hosts or authorized_keys)"
            ))),
        }
    }
}

/// Facts about the host a key belongs to.
///
/// These are supplied by the caller; the core never looks them up itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostFacts {
    pub hostname: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
}

impl HostFacts {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            fqdn: None,
            ip_address: None,
        }
    }

    pub fn with_fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = Some(fqdn.into());
        self
    }

    pub fn with_ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    /// The `known_hosts` host field: `hostname[,fqdn][,ip]`.
    pub fn host_patterns(&self) -> String {
        let mut patterns = vec![self.hostname.clone()];
        if let Some(fqdn) = &self.fqdn {
            if fqdn != &self.hostname {
                patterns.push(fqdn.clone());
            }
        }
        if let Some(ip) = self.ip_address {
            patterns.push(ip.to_string());
        }
        patterns.join(",")
    }
}

/// A request as the provisioning layer supplies it.
///
/// Field aliases accept the short keys older manifests use (`request`, `type`,
/// `dir`, `hostkey`, `authkey`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyRequest {
    pub name: Option<String>,
    #[serde(alias = "request")]
    pub kind: Option<RequestKind>,
    #[serde(alias = "type")]
    pub key_type: String,
    #[serde(alias = "dir")]
    pub directory: PathBuf,
    #[serde(alias = "hostkey")]
    pub host_key: bool,
    #[serde(alias = "authkey")]
    pub auth_key: bool,
    pub comment: Option<String>,
    pub facts: Option<HostFacts>,
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self {
            name: None,
            kind: None,
            key_type: DEFAULT_KEY_TYPE.to_string(),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            host_key: false,
            auth_key: false,
            comment: None,
            facts: None,
        }
    }
}

impl KeyRequest {
    /// A request for `kind` with every other field defaulted.
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type = key_type.into();
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn host_key(mut self, host_key: bool) -> Self {
        self.host_key = host_key;
        self
    }

    pub fn auth_key(mut self, auth_key: bool) -> Self {
        self.auth_key = auth_key;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn facts(mut self, facts: HostFacts) -> Self {
        self.facts = Some(facts);
        self
    }

    /// Validate the request and apply derived defaults.
    ///
    /// # Errors
    /// Returns `SshError::InvalidRequest` when the kind is missing, a name is
    /// required but absent, a name or directory would escape the base path, or
    /// a host key is requested without host facts.
    pub fn resolve(self) -> Result<ResolvedRequest> {
        let kind = self
            .kind
            .ok_or_else(|| SshError::InvalidRequest("request kind is required".to_string()))?;

        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                Some(name)
            }
            None if kind.is_ledger_read() => None,
            None => {
                return Err(SshError::InvalidRequest(format!(
                    "a key name is required for {kind} requests"
                )))
            }
        };

        validate_directory(&self.directory)?;

        if self.key_type.trim().is_empty() {
            return Err(SshError::InvalidRequest(
                "key type must not be empty".to_string(),
            ));
        }

        if self.host_key && name.is_some() && self.facts.is_none() {
            return Err(SshError::InvalidRequest(
                "host key registration requires host facts (hostname)".to_string(),
            ));
        }

        let comment = self.comment.or_else(|| {
            let hostname = &self.facts.as_ref()?.hostname;
            if self.host_key {
                Some(hostname.clone())
            } else if self.auth_key {
                Some(format!("root@{hostname}"))
            } else {
                None
            }
        });

        Ok(ResolvedRequest {
            kind,
            name,
            key_type: self.key_type,
            directory: self.directory,
            host_key: self.host_key,
            auth_key: self.auth_key,
            comment,
            facts: self.facts,
        })
    }
}

/// A validated request. Only `KeyRequest::resolve` builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    kind: RequestKind,
    name: Option<String>,
    key_type: String,
    directory: PathBuf,
    host_key: bool,
    auth_key: bool,
    comment: Option<String>,
    facts: Option<HostFacts>,
}

impl ResolvedRequest {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Key name; always present for public and private requests.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Directory relative to the service's base path.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn host_key(&self) -> bool {
        self.host_key
    }

    pub fn auth_key(&self) -> bool {
        self.auth_key
    }

    /// Explicit comment, or the one derived from the host facts.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn facts(&self) -> Option<&HostFacts> {
        self.facts.as_ref()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if name.is_empty() || !single_normal || name.contains('/') || name.starts_with('.') {
        return Err(SshError::InvalidRequest(format!(
            "key name {name:?} must be a single plain file name"
        )));
    }
    if name.ends_with(".pub") || name == "known_hosts" || name == "authorized_keys" {
        return Err(SshError::InvalidRequest(format!(
            "key name {name:?} collides with a managed file"
        )));
    }
    Ok(())
}

fn validate_directory(directory: &Path) -> Result<()> {
    let ok = directory
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !ok {
        return Err(SshError::InvalidRequest(format!(
            "directory {} must be relative and stay under the base path",
            directory.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(result: Result<ResolvedRequest>) -> String {
        match result {
            Err(SshError::InvalidRequest(msg)) => msg,
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults() {
        let request = KeyRequest::default();
        assert_eq!(request.key_type, "rsa");
        assert_eq!(request.directory, PathBuf::from("ssh"));
        assert!(request.kind.is_none());
        assert!(!request.host_key);
        assert!(!request.auth_key);
    }

    #[test]
    fn test_empty_request_is_invalid() {
        let msg = invalid(KeyRequest::default().resolve());
        assert!(msg.contains("request kind is required"));
    }

    #[test]
    fn test_public_requires_name() {
        let msg = invalid(KeyRequest::new(RequestKind::Public).resolve());
        assert!(msg.contains("public"));
        invalid(KeyRequest::new(RequestKind::Private).resolve());
    }

    #[test]
    fn test_ledger_reads_do_not_require_name() {
        let resolved = KeyRequest::new(RequestKind::KnownHosts)
            .resolve()
            .expect("known_hosts should resolve without a name");
        assert!(resolved.name.is_none());

        KeyRequest::new(RequestKind::AuthorizedKeys)
            .resolve()
            .expect("authorized_keys should resolve without a name");
    }

    #[test]
    fn test_comment_derived_for_host_key() {
        let resolved = KeyRequest::new(RequestKind::Public)
            .named("web1")
            .host_key(true)
            .facts(HostFacts::new("web1"))
            .resolve()
            .expect("should resolve");
        assert_eq!(resolved.comment.as_deref(), Some("web1"));
    }

    #[test]
    fn test_resolved_request_accessors() {
        let resolved = KeyRequest::new(RequestKind::Private)
            .named("web1")
            .key_type("ed25519")
            .directory("ssh/hostkeys")
            .host_key(true)
            .facts(HostFacts::new("web1"))
            .resolve()
            .expect("should resolve");

        assert_eq!(resolved.kind(), RequestKind::Private);
        assert_eq!(resolved.name(), Some("web1"));
        assert_eq!(resolved.key_type(), "ed25519");
        assert_eq!(resolved.directory(), Path::new("ssh/hostkeys"));
        assert!(resolved.host_key());
        assert!(!resolved.auth_key());
        assert_eq!(resolved.comment(), Some("web1"));
        assert_eq!(resolved.facts().map(|f| f.hostname.as_str()), Some("web1"));
    }

    #[test]
    fn test_comment_derived_for_auth_key() {
        let resolved = KeyRequest::new(RequestKind::Public)
            .named("deploy")
            .auth_key(true)
            .facts(HostFacts::new("web1"))
            .resolve()
            .expect("should resolve");
        assert_eq!(resolved.comment.as_deref(), Some("root@web1"));
    }

    #[test]
    fn test_explicit_comment_wins() {
        let resolved = KeyRequest::new(RequestKind::Public)
            .named("deploy")
            .auth_key(true)
            .comment("deploy@ci")
            .facts(HostFacts::new("web1"))
            .resolve()
            .expect("should resolve");
        assert_eq!(resolved.comment.as_deref(), Some("deploy@ci"));
    }

    #[test]
    fn test_comment_unset_for_plain_key() {
        let resolved = KeyRequest::new(RequestKind::Public)
            .named("plain")
            .facts(HostFacts::new("web1"))
            .resolve()
            .expect("should resolve");
        assert!(resolved.comment.is_none());
    }

    #[test]
    fn test_host_key_requires_facts() {
        let msg = invalid(
            KeyRequest::new(RequestKind::Public)
                .named("web1")
                .host_key(true)
                .resolve(),
        );
        assert!(msg.contains("host facts"));
    }

    #[test]
    fn test_name_cannot_escape_directory() {
        for bad in ["../x", "a/b", "/etc/passwd", "..", ".", "", ".hidden"] {
            invalid(KeyRequest::new(RequestKind::Public).named(bad).resolve());
        }
    }

    #[test]
    fn test_name_cannot_shadow_managed_files() {
        for bad in ["known_hosts", "authorized_keys", "id.pub"] {
            invalid(KeyRequest::new(RequestKind::Public).named(bad).resolve());
        }
    }

    #[test]
    fn test_directory_must_be_relative() {
        invalid(
            KeyRequest::new(RequestKind::KnownHosts)
                .directory("/etc/ssh")
                .resolve(),
        );
        invalid(
            KeyRequest::new(RequestKind::KnownHosts)
                .directory("ssh/../../etc")
                .resolve(),
        );
        KeyRequest::new(RequestKind::KnownHosts)
            .directory("ssh/hostkeys")
            .resolve()
            .expect("nested relative directory should resolve");
    }

    #[test]
    fn test_request_kind_from_str() {
        assert_eq!(
            "known_hosts".parse::<RequestKind>().expect("should parse"),
            RequestKind::KnownHosts
        );
        assert_eq!(
            "private".parse::<RequestKind>().expect("should parse"),
            RequestKind::Private
        );
        assert!("secret".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_host_patterns() {
        let facts = HostFacts::new("web1")
            .with_fqdn("web1.example.com")
            .with_ip_address("10.0.0.5".parse().expect("valid ip"));
        assert_eq!(facts.host_patterns(), "web1,web1.example.com,10.0.0.5");
        assert_eq!(HostFacts::new("web1").host_patterns(), "web1");
        assert_eq!(
            HostFacts::new("a.example.com")
                .with_fqdn("a.example.com")
                .host_patterns(),
            "a.example.com"
        );
    }

    #[test]
    fn test_deserialize_with_legacy_aliases() {
        let request: KeyRequest = toml::from_str(
            r#"
            name = "host1.example.com"
            request = "private"
            type = "ed25519"
            dir = "ssh/hostkeys"
            hostkey = true

            [facts]
            hostname = "host1.example.com"
            ip_address = "192.0.2.10"
            "#,
        )
        .expect("should deserialize");

        assert_eq!(request.kind, Some(RequestKind::Private));
        assert_eq!(request.key_type, "ed25519");
        assert_eq!(request.directory, PathBuf::from("ssh/hostkeys"));
        assert!(request.host_key);
        assert!(!request.auth_key);
        let facts = request.facts.expect("facts should be present");
        assert_eq!(facts.hostname, "host1.example.com");
        assert!(facts.fqdn.is_none());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let request: KeyRequest =
            toml::from_str(r#"kind = "known_hosts""#).expect("should deserialize");
        assert_eq!(request.key_type, "rsa");
        assert_eq!(request.directory, PathBuf::from("ssh"));
    }
}
