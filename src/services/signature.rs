// src/services/signature.rs

//! Request signer for the authenticated listing endpoints.
//!
//! Signature = hex(SHA-256(base64(HMAC-SHA256(secret, prefix + k1=v1&k2=v2...)))).
//! Keys are sorted. Whether empty values take part is an [`EmptyParams`]
//! policy because upstream has flipped it between endpoint generations.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::{EmptyParams, SignatureConfig};

type HmacSha256 = Hmac<Sha256>;

/// Signs parameter maps with a shared secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
    prefix: String,
    empty_params: EmptyParams,
}

impl Signer {
    pub fn new(
        secret: impl AsRef<[u8]>,
        prefix: impl Into<String>,
        empty_params: EmptyParams,
    ) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| AppError::config(format!("invalid signing key: {e}")))?;
        Ok(Self {
            mac,
            prefix: prefix.into(),
            empty_params,
        })
    }

    /// Build a signer from configuration; `None` when no secret is set.
    pub fn from_config(config: &SignatureConfig) -> Result<Option<Self>> {
        config
            .secret
            .as_deref()
            .map(|secret| Self::new(secret, config.prefix.clone(), config.empty_params))
            .transpose()
    }

    /// The exact byte string that gets signed.
    pub fn canonical_string(&self, params: &BTreeMap<String, String>) -> String {
        let joined = params
            .iter()
            .filter(|(_, v)| self.empty_params == EmptyParams::Include || !v.is_empty())
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}{}", self.prefix, joined)
    }

    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let mut mac = self.mac.clone();
        mac.update(self.canonical_string(params).as_bytes());
        let encoded = BASE64.encode(mac.finalize().into_bytes());
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("prefix", &self.prefix)
            .field("empty_params", &self.empty_params)
            .finish_non_exhaustive()
    }
}
