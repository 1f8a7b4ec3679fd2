//! Typed views over the JSON:API documents returned by App Store Connect.
//!
//! Only the attributes the release workflow acts on are decoded; everything
//! else in the payload is ignored so new vendor fields never break a run.
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Platform a build was uploaded for.
///
/// `IOS` and `MAC_OS` are the two release tracks; anything else is carried
/// through untouched so listings can still show it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    MacOs,
    Other(String),
}

impl Platform {
    /// The two platforms the release workflow tracks, in report order.
    pub const TRACKED: [Platform; 2] = [Platform::Ios, Platform::MacOs];

    pub fn from_api(raw: &str) -> Self {
        match raw {
            "IOS" => Platform::Ios,
            "MAC_OS" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Ios => "IOS",
            Platform::MacOs => "MAC_OS",
            Platform::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Processing state reported by the vendor for an uploaded build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Processing,
    Valid,
    Invalid,
    Failed,
    /// A state this tool does not know yet. Never treated as ready.
    Unknown(String),
}

impl ProcessingState {
    pub fn from_api(raw: &str) -> Self {
        match raw {
            "PROCESSING" => ProcessingState::Processing,
            "VALID" => ProcessingState::Valid,
            "INVALID" => ProcessingState::Invalid,
            "FAILED" => ProcessingState::Failed,
            other => ProcessingState::Unknown(other.to_string()),
        }
    }

    /// Only `VALID` builds can be declared, enrolled, and submitted.
    pub fn is_ready(&self) -> bool {
        matches!(self, ProcessingState::Valid)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessingState::Processing => "PROCESSING",
            ProcessingState::Valid => "VALID",
            ProcessingState::Invalid => "INVALID",
            ProcessingState::Failed => "FAILED",
            ProcessingState::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// An uploaded build as seen by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub id: String,
    pub version: String,
    pub platform: Platform,
    pub state: ProcessingState,
    /// `None` until export compliance has been declared.
    pub uses_non_exempt_encryption: Option<bool>,
    pub uploaded_date: Option<String>,
}

impl Build {
    pub fn label(&self) -> String {
        format!("{} ({})", self.version, self.platform)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetaGroup {
    pub id: String,
    pub name: String,
    pub public_link_enabled: bool,
}

/// A signing certificate resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub id: String,
    pub name: String,
    pub certificate_type: String,
    pub expiration_date: Option<String>,
    /// Base64 DER content; list endpoints may omit it.
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListDocument<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    included: Vec<IncludedResource>,
}

#[derive(Debug, Deserialize)]
struct SingleDocument<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Relationship {
    #[serde(default)]
    data: Option<ResourceRef>,
}

#[derive(Debug, Deserialize)]
struct IncludedResource {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    attributes: Value,
}

#[derive(Debug, Deserialize)]
struct BuildResource {
    id: String,
    #[serde(default)]
    attributes: BuildAttributes,
    #[serde(default)]
    relationships: BuildRelationships,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildAttributes {
    version: Option<String>,
    processing_state: Option<String>,
    uses_non_exempt_encryption: Option<bool>,
    uploaded_date: Option<String>,
    platform: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRelationships {
    #[serde(default)]
    pre_release_version: Relationship,
}

#[derive(Debug, Deserialize)]
struct BetaGroupResource {
    id: String,
    #[serde(default)]
    attributes: BetaGroupAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetaGroupAttributes {
    name: Option<String>,
    #[serde(default)]
    public_link_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CertificateResource {
    id: String,
    #[serde(default)]
    attributes: CertificateAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateAttributes {
    name: Option<String>,
    certificate_type: Option<String>,
    expiration_date: Option<String>,
    certificate_content: Option<String>,
}

/// Decode a `builds` list document.
///
/// Platform comes from the build attributes when present, otherwise from the
/// included `preReleaseVersions` resource the build points at.
pub fn decode_builds(doc: &Value) -> Result<Vec<Build>> {
    let doc = ListDocument::<BuildResource>::deserialize(doc).context("decode builds document")?;
    let builds = doc
        .data
        .into_iter()
        .map(|resource| {
            let platform = resource
                .attributes
                .platform
                .clone()
                .or_else(|| included_platform(&resource.relationships, &doc.included))
                .map(|raw| Platform::from_api(&raw))
                .unwrap_or_else(|| Platform::Other("UNKNOWN".to_string()));
            let state = resource
                .attributes
                .processing_state
                .as_deref()
                .map(ProcessingState::from_api)
                .unwrap_or_else(|| ProcessingState::Unknown("UNKNOWN".to_string()));
            Build {
                id: resource.id,
                version: resource
                    .attributes
                    .version
                    .unwrap_or_else(|| "unknown".to_string()),
                platform,
                state,
                uses_non_exempt_encryption: resource.attributes.uses_non_exempt_encryption,
                uploaded_date: resource.attributes.uploaded_date,
            }
        })
        .collect();
    Ok(builds)
}

fn included_platform(
    relationships: &BuildRelationships,
    included: &[IncludedResource],
) -> Option<String> {
    let target = relationships.pre_release_version.data.as_ref()?;
    included
        .iter()
        .find(|resource| resource.kind == target.kind && resource.id == target.id)
        .and_then(|resource| resource.attributes.get("platform"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn decode_beta_groups(doc: &Value) -> Result<Vec<BetaGroup>> {
    let doc =
        ListDocument::<BetaGroupResource>::deserialize(doc).context("decode betaGroups document")?;
    Ok(doc
        .data
        .into_iter()
        .map(|resource| BetaGroup {
            id: resource.id,
            name: resource
                .attributes
                .name
                .unwrap_or_else(|| "Unknown".to_string()),
            public_link_enabled: resource.attributes.public_link_enabled.unwrap_or(false),
        })
        .collect())
}

pub fn decode_certificates(doc: &Value) -> Result<Vec<CertificateRecord>> {
    let doc = ListDocument::<CertificateResource>::deserialize(doc)
        .context("decode certificates document")?;
    Ok(doc.data.into_iter().map(certificate_record).collect())
}

pub fn decode_certificate(doc: &Value) -> Result<CertificateRecord> {
    let doc = SingleDocument::<CertificateResource>::deserialize(doc)
        .context("decode certificate document")?;
    Ok(certificate_record(doc.data))
}

fn certificate_record(resource: CertificateResource) -> CertificateRecord {
    CertificateRecord {
        id: resource.id,
        name: resource
            .attributes
            .name
            .unwrap_or_else(|| "Unknown".to_string()),
        certificate_type: resource.attributes.certificate_type.unwrap_or_default(),
        expiration_date: resource.attributes.expiration_date,
        content: resource
            .attributes
            .certificate_content
            .filter(|content| !content.trim().is_empty()),
    }
}
