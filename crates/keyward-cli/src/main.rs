// ABOUTME: Entry point for the keyward key provisioning CLI.
// ABOUTME: Maps flags onto a KeyRequest, fulfils it, and writes the artifact to stdout.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Mechanism};
use keyward_ssh::{KeyRequest, RequestKind};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(about = "Generate, register and serve SSH keys for configuration management")]
#[command(version)]
struct Cli {
    /// Artifact to print: public, private, known_hosts or authorized_keys
    #[arg(value_parser = parse_kind)]
    kind: Option<RequestKind>,

    /// Logical key name (file name under the key directory)
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// Key type passed to the generator (default: rsa)
    #[arg(long = "type", short = 't')]
    key_type: Option<String>,

    /// Directory under the base path (default: ssh)
    #[arg(long = "dir", short = 'd')]
    directory: Option<PathBuf>,

    /// Register the key in known_hosts
    #[arg(long)]
    host_key: bool,

    /// Register the key in authorized_keys
    #[arg(long)]
    auth_key: bool,

    /// Key comment (defaults to the hostname for host keys, root@hostname for auth keys)
    #[arg(long, short = 'c')]
    comment: Option<String>,

    /// Read the request from a TOML file; flags override its fields
    #[arg(long, short = 'r')]
    request: Option<PathBuf>,

    /// Hostname used in comments and known_hosts records (defaults to this host)
    #[arg(long)]
    hostname: Option<String>,

    /// Fully qualified name added to known_hosts records
    #[arg(long)]
    fqdn: Option<String>,

    /// IP address added to known_hosts records
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Path to configuration file
    #[arg(long, env = "KEYWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the managed key tree
    #[arg(long, env = "KEYWARD_BASE_PATH")]
    base_path: Option<PathBuf>,

    /// Key generation backend
    #[arg(long, value_enum)]
    mechanism: Option<Mechanism>,

    /// ssh-keygen binary for the openssh backend
    #[arg(long)]
    ssh_keygen: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,
}

fn parse_kind(s: &str) -> std::result::Result<RequestKind, String> {
    s.parse().map_err(|e: keyward_ssh::SshError| e.to_string())
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply_to(&self, config: &mut Config) {
        if let Some(base_path) = &self.base_path {
            config.base_path = Some(base_path.clone());
        }
        if let Some(mechanism) = self.mechanism {
            config.mechanism = mechanism;
        }
        if let Some(program) = &self.ssh_keygen {
            config.ssh_keygen = Some(program.clone());
        }
        if let Some(hostname) = &self.hostname {
            config.host.hostname = Some(hostname.clone());
        }
        if let Some(fqdn) = &self.fqdn {
            config.host.fqdn = Some(fqdn.clone());
        }
        if let Some(ip) = self.ip {
            config.host.ip_address = Some(ip);
        }
    }

    /// Build the request: request file first, then flags, then host facts.
    fn key_request(&self, config: &Config) -> Result<KeyRequest> {
        let mut request = match &self.request {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read request file {}", path.display()))?;
                toml::from_str::<KeyRequest>(&contents)
                    .with_context(|| format!("Failed to parse request file {}", path.display()))?
            }
            None => KeyRequest::default(),
        };

        if self.kind.is_some() {
            request.kind = self.kind;
        }
        if let Some(name) = &self.name {
            request.name = Some(name.clone());
        }
        if let Some(key_type) = &self.key_type {
            request.key_type = key_type.clone();
        }
        if let Some(directory) = &self.directory {
            request.directory = directory.clone();
        }
        request.host_key |= self.host_key;
        request.auth_key |= self.auth_key;
        if let Some(comment) = &self.comment {
            request.comment = Some(comment.clone());
        }
        if request.facts.is_none() {
            request.facts = config.host.facts();
        }
        Ok(request)
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_to(&mut config);

    let request = cli.key_request(&config)?;
    let service = config.service();
    tracing::debug!(base_path = %service.base_path().display(), ?request, "fulfilling request");

    let artifact = service.fulfil(request)?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(artifact.as_bytes())
        .and_then(|()| stdout.flush())
        .context("Failed to write result to stdout")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    keyward_log::init_with(keyward_log::level_from_flags(cli.verbose, cli.quiet));

    run(cli)
}
