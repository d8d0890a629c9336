//! Transient signing keychain for CI runs
//!
//! [`SigningKeychain`] creates a dedicated keychain, puts it on the user's
//! search list and imports the signing certificates into it. The keychain is
//! deleted when the guard goes away, whichever way the run ends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};

use crate::runner::{CommandRunner, ToolCommand, ToolOutput};
use crate::types::CiError;

/// Keychain name used when none is configured.
pub const DEFAULT_KEYCHAIN: &str = "cibuild.keychain";

/// Certificate bundle (`.p12`) used when none is configured.
pub const DEFAULT_CERTIFICATE: &str = "script/certificates/cibuild.p12";

/// Apple's WWDR intermediate certificate, needed to complete the signing chain.
pub const DEFAULT_WWDR_CERTIFICATE: &str =
    "https://www.apple.com/certificateauthority/AppleWWDRCAG3.cer";

/// Seconds of inactivity before the keychain locks itself again.
const KEYCHAIN_LOCK_TIMEOUT: &str = "3600";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to set up code signing for one run.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Name of the transient keychain.
    pub keychain: String,
    /// Password protecting the transient keychain.
    pub keychain_password: String,
    /// Local `.p12` bundle holding the signing identity.
    pub certificate: PathBuf,
    /// Password of the `.p12` bundle.
    pub certificate_password: String,
    /// Where the WWDR intermediate certificate comes from.
    pub wwdr_certificate: CertificateSource,
}

/// Generates a random keychain password.
pub fn generate_keychain_password() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// Location of a certificate: downloaded over HTTP(S) or read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    Url(String),
    File(PathBuf),
}

impl CertificateSource {
    /// Anything starting with `http://` or `https://` is a URL, everything else a path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("https://") || raw.starts_with("http://") {
            CertificateSource::Url(raw.to_string())
        } else {
            CertificateSource::File(PathBuf::from(raw))
        }
    }

    /// Makes the certificate available as a local file.
    pub fn fetch(&self) -> Result<FetchedCertificate, CiError> {
        match self {
            CertificateSource::File(path) => {
                if !path.is_file() {
                    return Err(CiError::Certificate(format!(
                        "certificate not found at {}",
                        path.display()
                    )));
                }
                Ok(FetchedCertificate {
                    path: path.clone(),
                    _dir: None,
                })
            }
            CertificateSource::Url(url) => download_certificate(url),
        }
    }
}

impl std::fmt::Display for CertificateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateSource::Url(url) => f.write_str(url),
            CertificateSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A certificate on disk. Downloaded certificates live in a temporary
/// directory that is removed when this value is dropped.
#[derive(Debug)]
pub struct FetchedCertificate {
    path: PathBuf,
    _dir: Option<tempfile::TempDir>,
}

impl FetchedCertificate {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn download_certificate(url: &str) -> Result<FetchedCertificate, CiError> {
    tracing::info!(url, "downloading certificate");

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .connect_timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let bytes = client
        .get(url)
        .send()
        .map_err(|e| {
            if e.is_timeout() {
                CiError::Certificate(format!(
                    "download of {url} timed out after {}s. Check network connection",
                    DOWNLOAD_TIMEOUT.as_secs()
                ))
            } else {
                CiError::Http(e)
            }
        })?
        .error_for_status()?
        .bytes()?;

    if bytes.is_empty() {
        return Err(CiError::Certificate(format!(
            "download of {url} returned empty data"
        )));
    }

    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("wwdr.cer");
    std::fs::write(&path, &bytes)?;

    Ok(FetchedCertificate {
        path,
        _dir: Some(dir),
    })
}

/// A keychain that exists for the duration of a CI run.
///
/// Created by [`SigningKeychain::create`]; deleted exactly once, either by
/// [`SigningKeychain::close`] or, on every other path, when dropped.
pub struct SigningKeychain<R: CommandRunner> {
    runner: R,
    name: String,
    armed: bool,
}

impl<R: CommandRunner> SigningKeychain<R> {
    /// Creates the keychain and imports `wwdr` and the configured bundle into it.
    ///
    /// If anything fails after the keychain itself was created, it is deleted
    /// again before the error is returned.
    pub fn create(runner: R, config: &SigningConfig, wwdr: &Path) -> Result<Self, CiError> {
        tracing::info!(keychain = %config.keychain, "preparing code signing");

        let create = security(["create-keychain", "-p"])
            .secret_arg(&config.keychain_password)
            .arg(&config.keychain);
        check(runner.run(&create)?, "create-keychain")?;

        let keychain = Self {
            runner,
            name: config.keychain.clone(),
            armed: true,
        };
        keychain.populate(config, wwdr)?;
        Ok(keychain)
    }

    fn populate(&self, config: &SigningConfig, wwdr: &Path) -> Result<(), CiError> {
        let name = self.name.as_str();

        // Keep existing keychains searchable; ours goes first.
        let listed = self.run(security(["list-keychains", "-d", "user"]), "list-keychains")?;
        let mut search_list = vec![name.to_string()];
        search_list.extend(
            parse_keychain_list(&listed.stdout)
                .into_iter()
                .filter(|k| !is_same_keychain(k, name)),
        );
        self.run(
            security(["list-keychains", "-d", "user", "-s"]).args(search_list),
            "list-keychains -s",
        )?;

        self.run(
            security(["unlock-keychain", "-p"])
                .secret_arg(&config.keychain_password)
                .arg(name),
            "unlock-keychain",
        )?;
        self.run(
            security(["set-keychain-settings", "-t", KEYCHAIN_LOCK_TIMEOUT, "-u", name]),
            "set-keychain-settings",
        )?;

        self.run(
            security(["import"])
                .arg(wwdr.display().to_string())
                .args(["-k", name, "-T", "/usr/bin/codesign"]),
            "import WWDR certificate",
        )?;
        self.run(
            security(["import"])
                .arg(config.certificate.display().to_string())
                .args(["-k", name, "-P"])
                .secret_arg(&config.certificate_password)
                .args(["-T", "/usr/bin/codesign"]),
            "import signing certificate",
        )?;

        // Lets codesign use the imported key without a UI prompt.
        self.run(
            security([
                "set-key-partition-list",
                "-S",
                "apple-tool:,apple:,codesign:",
                "-s",
                "-k",
            ])
            .secret_arg(&config.keychain_password)
            .arg(name),
            "set-key-partition-list",
        )?;

        Ok(())
    }

    fn run(&self, cmd: ToolCommand, step: &str) -> Result<ToolOutput, CiError> {
        check(self.runner.run(&cmd)?, step)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deletes the keychain now, reporting failures.
    pub fn close(mut self) -> Result<(), CiError> {
        self.armed = false;
        self.delete()
    }

    fn delete(&self) -> Result<(), CiError> {
        tracing::info!(keychain = %self.name, "deleting keychain");
        self.run(
            security(["delete-keychain"]).arg(&self.name),
            "delete-keychain",
        )
        .map(|_| ())
    }
}

impl<R: CommandRunner> Drop for SigningKeychain<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Err(e) = self.delete() {
            tracing::warn!(keychain = %self.name, error = %e, "failed to delete keychain, manual cleanup may be needed");
        }
    }
}

fn security<const N: usize>(args: [&str; N]) -> ToolCommand {
    ToolCommand::new("security").args(args)
}

fn check(output: ToolOutput, step: &str) -> Result<ToolOutput, CiError> {
    if output.success() {
        Ok(output)
    } else {
        Err(CiError::Keychain(format!(
            "security {step} failed: {}",
            output.stderr.trim()
        )))
    }
}

/// Parses `security list-keychains` output: one quoted path per line.
fn parse_keychain_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim().trim_matches('"').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// `security` reports full paths (`.../Keychains/ci.keychain-db`) for keychains
/// that were created by bare name.
fn is_same_keychain(listed: &str, name: &str) -> bool {
    let file = Path::new(listed)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(listed);
    file == name || file.strip_suffix("-db") == Some(name)
}
