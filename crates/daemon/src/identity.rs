// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent device identity.
//!
//! One Ed25519 keypair per install, stored as PEM inside a JSON envelope
//! with 0600 permissions. The stable device id is the SHA-256 of the raw
//! 32-byte public key, hex encoded. Outbound gateway handshakes embed a
//! signed auth payload produced here.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signer, SigningKey};
use pkcs8::LineEnding;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity file error: {0}")]
    File(#[from] serde_json::Error),

    #[error("key encoding error: {0}")]
    Key(String),
}

/// On-disk identity envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    version: u32,
    device_id: String,
    public_key_pem: String,
    private_key_pem: String,
    created_at_ms: i64,
}

/// Signed device auth structure embedded in the gateway `connect` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuth {
    pub device_id: String,
    /// base64url (no padding) of the raw 32-byte public key.
    pub public_key: String,
    /// base64url (no padding) of the 64-byte signature.
    pub signature: String,
    pub signed_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Loaded device identity.
pub struct Identity {
    device_id: String,
    signing_key: SigningKey,
}

impl Identity {
    /// Load the keypair at `path`, generating (and persisting) a fresh one
    /// when the file is absent or corrupt.
    pub fn load_or_generate(path: &Path, now_ms: i64) -> Result<Self, IdentityError> {
        match std::fs::read_to_string(path) {
            Ok(body) => match Self::from_envelope(&body) {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "identity file corrupt, regenerating");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Self::generate(path, now_ms)
    }

    fn from_envelope(body: &str) -> Result<Self, IdentityError> {
        let envelope: IdentityFile = serde_json::from_str(body)?;
        if envelope.version != 1 {
            return Err(IdentityError::Key(format!(
                "unsupported identity version {}",
                envelope.version
            )));
        }
        let signing_key = SigningKey::from_pkcs8_pem(&envelope.private_key_pem)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        let device_id = derive_device_id(&signing_key);
        if device_id != envelope.device_id {
            warn!("stored device id does not match key material, rederiving");
        }
        Ok(Self { device_id, signing_key })
    }

    fn generate(path: &Path, now_ms: i64) -> Result<Self, IdentityError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let device_id = derive_device_id(&signing_key);

        let private_key_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Key(e.to_string()))?
            .to_string();
        let public_key_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Key(e.to_string()))?;

        let envelope = IdentityFile {
            version: 1,
            device_id: device_id.clone(),
            public_key_pem,
            private_key_pem,
            created_at_ms: now_ms,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&envelope)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(Self { device_id, signing_key })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Build and sign the gateway auth payload:
    ///
    /// `(v2|v1) | device_id | cli | cli | role | scopes, | signed_at_ms |
    ///  token [| nonce]`, joined by `|`, signed over the UTF-8 bytes.
    pub fn sign_auth_payload(
        &self,
        scopes: &[&str],
        role: &str,
        gateway_token: Option<&str>,
        nonce: Option<&str>,
        signed_at_ms: i64,
    ) -> DeviceAuth {
        let version = if nonce.is_some() { "v2" } else { "v1" };
        let mut payload = format!(
            "{version}|{device_id}|cli|cli|{role}|{scopes}|{signed_at_ms}|{token}",
            device_id = self.device_id,
            scopes = scopes.join(","),
            token = gateway_token.unwrap_or(""),
        );
        if let Some(nonce) = nonce {
            payload.push('|');
            payload.push_str(nonce);
        }

        let signature = self.signing_key.sign(payload.as_bytes());

        DeviceAuth {
            device_id: self.device_id.clone(),
            public_key: URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes()),
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
            signed_at_ms,
            nonce: nonce.map(str::to_string),
        }
    }
}

/// hex(SHA-256(raw public key bytes)). The SPKI header is already absent
/// from the dalek byte form.
fn derive_device_id(signing_key: &SigningKey) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(signing_key.verifying_key().to_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
