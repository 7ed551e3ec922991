//! AES-256-GCM encrypt-then-sign executor.
//!
//! Output layout (base64url, no padding): `nonce(12) || ciphertext+gcm_tag || hmac(32)`.
//!
//! The nonce is derived from the plain text with the signing key, so encoding is
//! deterministic: equal ids map to equal registry keys, and `encode(decode(x)) == x`.
//! Reusing a nonce only ever happens for an identical plain text.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use tracing::debug;

use super::{CipherError, CipherExecutor};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const SIGNATURE_LEN: usize = 32;
const KEY_LEN: usize = 32;
const NONCE_DOMAIN: &[u8] = b"ticketeer.nonce";

/// Raw key material. Debug output never shows the keys.
#[derive(Clone)]
pub struct CipherKeys {
    encryption: [u8; KEY_LEN],
    signing: Vec<u8>,
}

impl core::fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CipherKeys").finish_non_exhaustive()
    }
}

impl CipherKeys {
    pub fn new(encryption: &[u8], signing: &[u8]) -> Result<Self, CipherError> {
        let encryption: [u8; KEY_LEN] = encryption.try_into().map_err(|_| {
            CipherError::InvalidKey(format!("encryption key must be {KEY_LEN} bytes"))
        })?;
        if signing.len() < KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "signing key must be at least {KEY_LEN} bytes"
            )));
        }
        Ok(Self {
            encryption,
            signing: signing.to_vec(),
        })
    }

    /// Keys as configured: base64url (no padding) strings.
    pub fn from_encoded(encryption: &str, signing: &str) -> Result<Self, CipherError> {
        let decode = |value: &str, which: &str| {
            URL_SAFE_NO_PAD
                .decode(value.trim())
                .map_err(|_| CipherError::InvalidKey(format!("{which} key is not base64url")))
        };
        Self::new(&decode(encryption, "encryption")?, &decode(signing, "signing")?)
    }

    /// Fresh random keys, for bootstrapping a deployment or for tests.
    pub fn generate() -> Self {
        let encryption: [u8; KEY_LEN] = rand::rng().random();
        let signing: [u8; 64] = rand::rng().random();
        Self {
            encryption,
            signing: signing.to_vec(),
        }
    }

    /// `(encryption, signing)` as base64url strings.
    pub fn to_encoded(&self) -> (String, String) {
        (
            URL_SAFE_NO_PAD.encode(self.encryption),
            URL_SAFE_NO_PAD.encode(&self.signing),
        )
    }
}

#[derive(Debug, Clone)]
pub struct AesGcmCipherExecutor {
    name: String,
    keys: CipherKeys,
}

impl AesGcmCipherExecutor {
    pub fn new(name: impl Into<String>, keys: CipherKeys) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }

    fn mac(&self) -> Result<HmacSha256, CipherError> {
        <HmacSha256 as Mac>::new_from_slice(&self.keys.signing)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))
    }

    fn derive_nonce(&self, plain: &[u8]) -> Result<[u8; NONCE_LEN], CipherError> {
        let mut mac = self.mac()?;
        mac.update(NONCE_DOMAIN);
        mac.update(plain);
        let digest = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        Ok(nonce)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CipherError> {
        Aes256Gcm::new_from_slice(&self.keys.encryption)
            .map_err(|e| CipherError::InvalidKey(format!("{e:?}")))
    }
}

impl CipherExecutor for AesGcmCipherExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        let nonce = self.derive_nonce(plain.as_bytes())?;
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + SIGNATURE_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn encoded_len(&self, plain_len: usize) -> usize {
        let sealed = NONCE_LEN + plain_len + GCM_TAG_LEN + SIGNATURE_LEN;
        base64::encoded_len(sealed, false).unwrap_or(usize::MAX)
    }

    fn decode(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CipherError::Malformed)?;
        if raw.len() < NONCE_LEN + GCM_TAG_LEN + SIGNATURE_LEN {
            return Err(CipherError::Malformed);
        }

        let (body, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);
        let mut mac = self.mac()?;
        mac.update(body);
        if mac.verify_slice(signature).is_err() {
            debug!(cipher = %self.name, "rejected cipher text with bad signature");
            return Err(CipherError::Tampered);
        }

        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        let plain = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Tampered)?;
        String::from_utf8(plain).map_err(|_| CipherError::Malformed)
    }
}
