//! Signing certificate provisioning.
//!
//! Reuses an existing certificate of the requested type when the API still
//! serves its content; otherwise generates a key and CSR locally, asks the
//! API to issue a certificate, and installs it into the login keychain.
use crate::api::AppStoreApi;
use crate::model::{decode_certificate, decode_certificates, CertificateRecord};
use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const MANUAL_CERTIFICATE_URL: &str = "https://developer.apple.com/account/resources/certificates/add";

/// Inputs for one provisioning run.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub certificate_type: String,
    pub email: Option<String>,
    pub common_name: Option<String>,
    pub country: String,
    pub output_dir: PathBuf,
    pub install: bool,
}

#[derive(Debug)]
pub struct GeneratedCsr {
    pub key_path: PathBuf,
    pub csr_pem: String,
}

/// Local key, CSR, and keychain tooling.
pub trait SigningTools {
    /// Generate an RSA key and CSR in `workdir`.
    fn generate_csr(&self, workdir: &Path, subject: &str) -> Result<GeneratedCsr>;
    fn import_certificate(&self, certificate_path: &Path) -> Result<()>;
    /// Hand the certificate to Keychain Access for manual approval.
    fn open_certificate(&self, certificate_path: &Path) -> Result<()>;
    /// Output of listing the valid code-signing identities.
    fn codesigning_identities(&self) -> Result<String>;
}

/// `openssl` + macOS `security`, located on `PATH`.
pub struct SystemTools {
    keychain: PathBuf,
}

impl SystemTools {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
        Ok(Self {
            keychain: home.join("Library/Keychains/login.keychain-db"),
        })
    }

    fn tool(name: &str) -> Result<PathBuf> {
        which::which(name).with_context(|| format!("locate `{name}` on PATH"))
    }

    fn run(program: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("run {}", program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} failed with status {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SigningTools for SystemTools {
    fn generate_csr(&self, workdir: &Path, subject: &str) -> Result<GeneratedCsr> {
        let openssl = Self::tool("openssl")?;
        let key_path = workdir.join("private_key.key");
        let csr_path = workdir.join("cert_request.csr");
        let key_arg = key_path.to_string_lossy().into_owned();
        let csr_arg = csr_path.to_string_lossy().into_owned();
        Self::run(&openssl, &["genrsa", "-out", key_arg.as_str(), "2048"])
            .context("generate RSA key")?;
        Self::run(
            &openssl,
            &[
                "req",
                "-new",
                "-key",
                key_arg.as_str(),
                "-out",
                csr_arg.as_str(),
                "-subj",
                subject,
            ],
        )
        .context("generate CSR")?;
        let csr_pem = fs::read_to_string(&csr_path)
            .with_context(|| format!("read {}", csr_path.display()))?;
        Ok(GeneratedCsr { key_path, csr_pem })
    }

    fn import_certificate(&self, certificate_path: &Path) -> Result<()> {
        let security = Self::tool("security")?;
        let certificate_arg = certificate_path.to_string_lossy().into_owned();
        let keychain_arg = self.keychain.to_string_lossy().into_owned();
        Self::run(
            &security,
            &[
                "import",
                certificate_arg.as_str(),
                "-k",
                keychain_arg.as_str(),
                "-T",
                "/usr/bin/codesign",
                "-T",
                "/usr/bin/productsign",
            ],
        )
        .map(|_| ())
    }

    fn open_certificate(&self, certificate_path: &Path) -> Result<()> {
        let open = Self::tool("open")?;
        let certificate_arg = certificate_path.to_string_lossy().into_owned();
        Self::run(&open, &[certificate_arg.as_str()]).map(|_| ())
    }

    fn codesigning_identities(&self) -> Result<String> {
        let security = Self::tool("security")?;
        Self::run(&security, &["find-identity", "-v", "-p", "codesigning"])
    }
}

#[derive(Debug)]
pub struct ProvisionReport {
    pub certificate_id: String,
    pub reused: bool,
    pub certificate_path: PathBuf,
    /// Private key written by this run; `None` when reusing.
    pub key_path: Option<PathBuf>,
    pub installed: bool,
    /// The keychain import failed and the certificate was handed to
    /// Keychain Access instead.
    pub needs_manual_import: bool,
    /// Matching line from the code-signing identity listing.
    pub identity: Option<String>,
}

pub fn provision_certificate<A: AppStoreApi + ?Sized, T: SigningTools>(
    api: &A,
    tools: &T,
    request: &CertificateRequest,
) -> Result<ProvisionReport> {
    fs::create_dir_all(&request.output_dir)
        .with_context(|| format!("create {}", request.output_dir.display()))?;

    println!("Checking existing {} certificates...", request.certificate_type);
    let existing = find_existing(api, &request.certificate_type)?;
    let (record, reused, key_path) = match existing {
        Some(record) => {
            let expires = record.expiration_date.as_deref().unwrap_or("unknown");
            println!(
                "  Reusing {} [{}] (expires {expires})",
                record.name, record.certificate_type
            );
            (record, true, None)
        }
        None => {
            let (record, key_path) = issue_certificate(api, tools, request)?;
            (record, false, Some(key_path))
        }
    };

    let content = record.content.as_deref().ok_or_else(|| {
        anyhow!(
            "certificate {} has no downloadable content; download it from {MANUAL_CERTIFICATE_URL}",
            record.id
        )
    })?;
    let certificate_path = write_certificate(&request.output_dir, &request.certificate_type, content)?;
    println!("  Certificate saved to {}", certificate_path.display());

    let mut installed = false;
    let mut needs_manual_import = false;
    let mut identity = None;
    if request.install {
        if let Err(err) = tools.import_certificate(&certificate_path) {
            tracing::warn!(error = %err, "keychain import failed");
            println!("  Keychain import failed: {err:#}");
            needs_manual_import = true;
            if let Err(err) = tools.open_certificate(&certificate_path) {
                tracing::debug!(error = %err, "could not open certificate");
            }
            println!(
                "  Add {} to the login keychain in Keychain Access, then trust it if prompted",
                certificate_path.display()
            );
        } else {
            installed = true;
        }
    }
    if installed {
        let listing = tools.codesigning_identities()?;
        identity = identity_line(&listing, &keychain_label(&request.certificate_type));
        match &identity {
            Some(line) => println!("  Installed identity: {line}"),
            None => println!(
                "  Certificate imported but not yet listed as a code-signing identity; \
                 open it in Keychain Access and trust it if prompted"
            ),
        }
    }

    tracing::info!(
        certificate_id = %record.id,
        reused,
        installed,
        needs_manual_import,
        "certificate provisioning finished"
    );
    Ok(ProvisionReport {
        certificate_id: record.id,
        reused,
        certificate_path,
        key_path,
        installed,
        needs_manual_import,
        identity,
    })
}

/// First certificate of `certificate_type`, with content fetched if the
/// listing left it out.
fn find_existing<A: AppStoreApi + ?Sized>(
    api: &A,
    certificate_type: &str,
) -> Result<Option<CertificateRecord>> {
    let path = format!("/v1/certificates?filter[certificateType]={certificate_type}");
    let doc = api
        .get(&path)
        .ok_or_else(|| anyhow!("could not list {certificate_type} certificates"))?;
    let Some(record) = decode_certificates(&doc)?.into_iter().next() else {
        return Ok(None);
    };
    if record.content.is_some() {
        return Ok(Some(record));
    }
    let detail = api
        .get(&format!("/v1/certificates/{}", record.id))
        .ok_or_else(|| anyhow!("could not fetch certificate {}", record.id))?;
    decode_certificate(&detail).map(Some)
}

fn issue_certificate<A: AppStoreApi + ?Sized, T: SigningTools>(
    api: &A,
    tools: &T,
    request: &CertificateRequest,
) -> Result<(CertificateRecord, PathBuf)> {
    let subject = csr_subject(request)?;
    println!("Generating certificate signing request...");
    let workdir = tempfile::tempdir().context("create CSR working directory")?;
    let csr = tools.generate_csr(workdir.path(), &subject)?;
    let key_path = persist_private_key(&csr.key_path, &request.output_dir, &request.certificate_type)?;
    println!("  Private key saved to {}", key_path.display());

    println!("Creating {} certificate...", request.certificate_type);
    let body = json!({
        "data": {
            "type": "certificates",
            "attributes": {
                "certificateType": request.certificate_type,
                "csrContent": strip_pem_armor(&csr.csr_pem),
            }
        }
    });
    let doc = match api.post("/v1/certificates", &body) {
        Ok(Some(doc)) => doc,
        Ok(None) => return Err(anyhow!("certificate creation returned no body")),
        Err(failure) => {
            return Err(anyhow!(
                "failed to create certificate ({failure}); create it manually at {MANUAL_CERTIFICATE_URL}"
            ))
        }
    };
    let record = decode_certificate(&doc)?;
    println!("  Certificate created: {}", record.id);
    Ok((record, key_path))
}

fn csr_subject(request: &CertificateRequest) -> Result<String> {
    let email = request
        .email
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("certificate email is required to create a new certificate"))?;
    let common_name = request
        .common_name
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("certificate common name is required to create a new certificate"))?;
    Ok(format!(
        "/emailAddress={email}/CN={common_name}/C={}",
        request.country
    ))
}

fn persist_private_key(generated: &Path, output_dir: &Path, certificate_type: &str) -> Result<PathBuf> {
    let target = output_dir.join(format!(
        "{}_private_key.key",
        certificate_type.to_ascii_lowercase()
    ));
    fs::copy(generated, &target)
        .with_context(|| format!("copy private key to {}", target.display()))?;
    restrict_permissions(&target)?;
    Ok(target)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod 600 {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn write_certificate(output_dir: &Path, certificate_type: &str, content: &str) -> Result<PathBuf> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .context("decode certificate content")?;
    let path = output_dir.join(format!("{}.cer", certificate_type.to_ascii_lowercase()));
    fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// CSR body without the PEM armor lines or line breaks.
pub(crate) fn strip_pem_armor(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

/// Human name the keychain shows for a certificate type,
/// e.g. `DEVELOPER_ID_APPLICATION` -> `Developer ID Application`.
pub(crate) fn keychain_label(certificate_type: &str) -> String {
    certificate_type
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            if word == "ID" {
                return word.to_string();
            }
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn identity_line(listing: &str, label: &str) -> Option<String> {
    listing
        .lines()
        .find(|line| line.contains(label))
        .map(|line| line.trim().to_string())
}

#[cfg(test)]
#[path = "certificate_tests.rs"]
mod tests;
