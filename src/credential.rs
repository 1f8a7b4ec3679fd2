//! Short-lived API tokens for App Store Connect.
//!
//! A token is signed fresh for every request and never cached, so a long
//! polling run can outlive any single token without refresh bookkeeping.
use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Audience required by the App Store Connect API.
pub const TOKEN_AUDIENCE: &str = "appstoreconnect-v1";

/// Lifetime of each minted token.
pub const TOKEN_TTL: Duration = Duration::from_secs(20 * 60);

/// Anything that can hand out a bearer token for a single request.
pub trait CredentialSource {
    fn mint(&self) -> Result<String>;
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct Claims {
    pub(crate) iss: String,
    pub(crate) iat: u64,
    pub(crate) exp: u64,
    pub(crate) aud: String,
}

/// ES256 signing material loaded once from an App Store Connect `.p8` key.
pub struct SigningKey {
    issuer_id: String,
    key_id: String,
    key: EncodingKey,
}

impl SigningKey {
    pub fn load(issuer_id: &str, key_id: &str, key_path: &Path) -> Result<Self> {
        let pem = fs::read(key_path).with_context(|| {
            format!(
                "read API private key {} (set key_path in the config or ASC_KEY_PATH)",
                key_path.display()
            )
        })?;
        Self::from_pem(issuer_id, key_id, &pem)
            .with_context(|| format!("load API private key {}", key_path.display()))
    }

    pub fn from_pem(issuer_id: &str, key_id: &str, pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(pem).context("parse PKCS#8 EC private key")?;
        Ok(Self {
            issuer_id: issuer_id.to_string(),
            key_id: key_id.to_string(),
            key,
        })
    }

    pub(crate) fn claims_at(&self, now_secs: u64) -> Claims {
        Claims {
            iss: self.issuer_id.clone(),
            iat: now_secs,
            exp: now_secs + TOKEN_TTL.as_secs(),
            aud: TOKEN_AUDIENCE.to_string(),
        }
    }
}

impl CredentialSource for SigningKey {
    fn mint(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| anyhow!("system clock is before the unix epoch"))?
            .as_secs();
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        encode(&header, &self.claims_at(now), &self.key).context("sign API token")
    }
}
