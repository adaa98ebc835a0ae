// ABOUTME: Injectable capabilities for key generation and known_hosts host removal.
// ABOUTME: OpenSshKeygen implements both by shelling out to ssh-keygen.

use crate::error::{Result, SshError};
use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Parameters for one keypair generation.
#[derive(Debug, Clone, Copy)]
pub struct KeygenParams<'a> {
    pub key_type: &'a str,
    pub comment: Option<&'a str>,
    /// Where the private half goes; the public half lands at `<output>.pub`.
    pub output: &'a Path,
}

/// Something that can materialize a keypair with an empty passphrase.
pub trait KeyGenerationMechanism: Send + Sync {
    /// Write `params.output` and `params.output.pub`.
    ///
    /// # Errors
    /// Returns `SshError::KeyGeneration` (or a more specific I/O variant) when
    /// the keypair could not be produced.
    fn generate(&self, params: &KeygenParams<'_>) -> Result<()>;

    /// The command line `generate` runs for `params`, used in error reports.
    fn describe(&self, params: &KeygenParams<'_>) -> String {
        format!(
            "generate {} key at {}",
            params.key_type,
            params.output.display()
        )
    }
}

/// Something that can purge every record for a host from a `known_hosts` file.
pub trait HostRemovalMechanism: Send + Sync {
    /// # Errors
    /// Returns `SshError::TrustRegistration` when the removal fails.
    fn remove_host(&self, hostname: &str, ledger: &Path) -> Result<()>;
}

/// Both mechanisms backed by the OpenSSH `ssh-keygen` binary.
#[derive(Debug, Clone)]
pub struct OpenSshKeygen {
    program: PathBuf,
}

impl Default for OpenSshKeygen {
    fn default() -> Self {
        Self::new("ssh-keygen")
    }
}

impl OpenSshKeygen {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `ssh-keygen -q -t <type> -N '' [-C <comment>] -f <output>`
    pub fn generate_command(&self, params: &KeygenParams<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-q").arg("-t").arg(params.key_type).arg("-N").arg("");
        if let Some(comment) = params.comment {
            cmd.arg("-C").arg(comment);
        }
        cmd.arg("-f").arg(params.output);
        cmd
    }

    /// `ssh-keygen -R <hostname> -f <ledger>`
    pub fn remove_command(&self, hostname: &str, ledger: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-R").arg(hostname).arg("-f").arg(ledger);
        cmd
    }
}

impl KeyGenerationMechanism for OpenSshKeygen {
    fn describe(&self, params: &KeygenParams<'_>) -> String {
        render(&self.generate_command(params))
    }

    fn generate(&self, params: &KeygenParams<'_>) -> Result<()> {
        let mut cmd = self.generate_command(params);
        let command = render(&cmd);
        tracing::debug!(%command, "running key generation");

        let output = run(&mut cmd).map_err(|e| SshError::KeyGeneration {
            command: command.clone(),
            detail: format!("failed to spawn: {e}"),
        })?;

        if !output.status.success() {
            return Err(SshError::KeyGeneration {
                command,
                detail: format!("exited with {}: {}", output.status, diagnostics(&output)),
            });
        }
        Ok(())
    }
}

impl HostRemovalMechanism for OpenSshKeygen {
    fn remove_host(&self, hostname: &str, ledger: &Path) -> Result<()> {
        let mut cmd = self.remove_command(hostname, ledger);
        let command = render(&cmd);
        tracing::debug!(%command, "removing stale host entries");

        let output = run(&mut cmd).map_err(|e| {
            SshError::registration_io(ledger, format!("failed to spawn `{command}`"), e)
        })?;

        if !output.status.success() {
            return Err(SshError::registration(
                ledger,
                format!(
                    "`{command}` exited with {}: {}",
                    output.status,
                    diagnostics(&output)
                ),
            ));
        }

        // ssh-keygen -R keeps the previous contents as `<ledger>.old`.
        let backup = backup_path(ledger);
        match std::fs::remove_file(&backup) {
            Ok(()) => tracing::debug!(path = %backup.display(), "removed ssh-keygen backup"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %backup.display(), error = %e, "cannot remove ssh-keygen backup")
            }
        }
        Ok(())
    }
}

fn backup_path(ledger: &Path) -> PathBuf {
    let mut os: OsString = ledger.as_os_str().to_owned();
    os.push(".old");
    PathBuf::from(os)
}

fn run(cmd: &mut Command) -> std::io::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
}

/// Command line as a single string, for error messages and logs.
fn render(cmd: &Command) -> String {
    let quote = |s: &OsStr| {
        let s = s.to_string_lossy();
        if s.is_empty() || s.contains(char::is_whitespace) {
            format!("'{s}'")
        } else {
            s.into_owned()
        }
    };
    std::iter::once(quote(cmd.get_program()))
        .chain(cmd.get_args().map(quote))
        .collect::<Vec<_>>()
        .join(" ")
}

fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_generate_command_arguments() {
        let keygen = OpenSshKeygen::default();
        let params = KeygenParams {
            key_type: "rsa",
            comment: Some("host1.example.com"),
            output: Path::new("/etc/keyward/ssh/host1"),
        };
        let cmd = keygen.generate_command(&params);

        assert_eq!(cmd.get_program(), "ssh-keygen");
        assert_eq!(
            args(&cmd),
            vec![
                "-q",
                "-t",
                "rsa",
                "-N",
                "",
                "-C",
                "host1.example.com",
                "-f",
                "/etc/keyward/ssh/host1"
            ]
        );
    }

    #[test]
    fn test_generate_command_without_comment() {
        let keygen = OpenSshKeygen::new("/usr/bin/ssh-keygen");
        let params = KeygenParams {
            key_type: "ed25519",
            comment: None,
            output: Path::new("/tmp/k"),
        };
        let cmd = keygen.generate_command(&params);
        assert!(!args(&cmd).contains(&"-C".to_string()));
        assert_eq!(cmd.get_program(), "/usr/bin/ssh-keygen");
    }

    #[test]
    fn test_remove_command_arguments() {
        let keygen = OpenSshKeygen::default();
        let cmd = keygen.remove_command("web1", Path::new("/etc/keyward/ssh/known_hosts"));
        assert_eq!(
            args(&cmd),
            vec!["-R", "web1", "-f", "/etc/keyward/ssh/known_hosts"]
        );
    }

    #[test]
    fn test_render_quotes_empty_and_spaced_args() {
        let mut cmd = Command::new("ssh-keygen");
        cmd.arg("-N").arg("").arg("-C").arg("two words");
        assert_eq!(render(&cmd), "ssh-keygen -N '' -C 'two words'");
    }

    #[test]
    fn test_missing_program_is_key_generation_error() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let keygen = OpenSshKeygen::new(temp_dir.path().join("no-such-ssh-keygen"));
        let output = temp_dir.path().join("k");
        let params = KeygenParams {
            key_type: "rsa",
            comment: None,
            output: &output,
        };

        let err = keygen.generate(&params).unwrap_err();
        match err {
            SshError::KeyGeneration { command, detail } => {
                assert!(command.contains("no-such-ssh-keygen"));
                assert!(detail.contains("failed to spawn"));
            }
            other => panic!("expected KeyGeneration, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_program_is_registration_error_on_removal() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let keygen = OpenSshKeygen::new(temp_dir.path().join("no-such-ssh-keygen"));
        let ledger = temp_dir.path().join("known_hosts");

        let err = keygen.remove_host("web1", &ledger).unwrap_err();
        assert!(matches!(err, SshError::TrustRegistration { .. }));
    }

    #[test]
    fn test_backup_path_appends_old() {
        assert_eq!(
            backup_path(Path::new("/etc/keyward/ssh/known_hosts")),
            PathBuf::from("/etc/keyward/ssh/known_hosts.old")
        );
    }

    #[test]
    fn test_describe_renders_generate_command() {
        let keygen = OpenSshKeygen::new("/usr/bin/ssh-keygen");
        let params = KeygenParams {
            key_type: "ed25519",
            comment: Some("web1"),
            output: Path::new("/tmp/k"),
        };
        assert_eq!(
            keygen.describe(&params),
            "/usr/bin/ssh-keygen -q -t ed25519 -N '' -C web1 -f /tmp/k"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_removal_drops_backup() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("should create temp dir");
        let script = temp_dir.path().join("fake-keygen");
        std::fs::write(&script, "#!/bin/sh\ncp \"$4\" \"$4.old\"\n").expect("should write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("should chmod script");

        let ledger = temp_dir.path().join("known_hosts");
        std::fs::write(&ledger, "web1 ssh-ed25519 AAAA\n").expect("should write ledger");

        OpenSshKeygen::new(&script)
            .remove_host("web1", &ledger)
            .expect("should remove");
        assert!(ledger.exists());
        assert!(!temp_dir.path().join("known_hosts.old").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_carries_diagnostics() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("should create temp dir");
        let script = temp_dir.path().join("fake-keygen");
        std::fs::write(&script, "#!/bin/sh\necho 'unknown key type' >&2\nexit 3\n")
            .expect("should write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("should chmod script");

        let keygen = OpenSshKeygen::new(&script);
        let output = temp_dir.path().join("k");
        let params = KeygenParams {
            key_type: "bogus",
            comment: None,
            output: &output,
        };

        match keygen.generate(&params).unwrap_err() {
            SshError::KeyGeneration { detail, .. } => {
                assert!(detail.contains("unknown key type"), "detail: {detail}");
            }
            other => panic!("expected KeyGeneration, got {other:?}"),
        }

        match keygen.remove_host("web1", &temp_dir.path().join("known_hosts")) {
            Err(SshError::TrustRegistration { reason, .. }) => {
                assert!(reason.contains("unknown key type"), "reason: {reason}");
            }
            other => panic!("expected TrustRegistration, got {other:?}"),
        }
    }
}
