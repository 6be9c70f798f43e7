//! Signing identities for outbound event-service control messages.
//!
//! The peer authenticates every `Register` / `Unregister` by checking the
//! signature in the [`SignedEvent`](crate::wire::SignedEvent) against the
//! certificate in the event's `creator` field.

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use prost::Message;
use sha2::{Digest, Sha256};

use crate::error::SignError;
use crate::wire::SerializedIdentity;

/// An enrolled member able to sign on its own behalf.
///
/// Implementations must be `Send + Sync`; the event client shares one
/// identity across tasks as `Arc<dyn SigningIdentity>`.
pub trait SigningIdentity: Send + Sync {
    /// MSP the identity belongs to, e.g. `Org1MSP`.
    fn msp_id(&self) -> &str;

    /// Serialized identity used as the `creator` of outbound messages.
    fn serialize(&self) -> Result<Vec<u8>, SignError>;

    /// Sign `payload` with the identity's private key.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// ECDSA P-256 identity: SHA-256 digest, DER-encoded low-S signature.
///
/// This is the key type Fabric CAs and `cryptogen` issue for MSP members.
pub struct EcdsaIdentity {
    msp_id: String,
    certificate: Vec<u8>,
    signing_key: SigningKey,
}

impl EcdsaIdentity {
    /// `certificate` is the PEM-encoded enrollment certificate.
    pub fn new(msp_id: impl Into<String>, certificate: Vec<u8>, signing_key: SigningKey) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate,
            signing_key,
        }
    }

    /// Build from key text: a PEM block (PKCS#8 or SEC1) or a hex scalar.
    pub fn from_key(
        msp_id: impl Into<String>,
        certificate: Vec<u8>,
        key: &str,
    ) -> Result<Self, SignError> {
        if key.contains("-----BEGIN") {
            Self::from_pem_key(msp_id, certificate, key)
        } else {
            Self::from_hex_key(msp_id, certificate, key)
        }
    }

    /// Build from a PEM private key, as found in an MSP `keystore` directory.
    pub fn from_pem_key(
        msp_id: impl Into<String>,
        certificate: Vec<u8>,
        pem: &str,
    ) -> Result<Self, SignError> {
        let signing_key = match SigningKey::from_pkcs8_pem(pem) {
            Ok(key) => key,
            Err(pkcs8_err) => SecretKey::from_sec1_pem(pem)
                .map(SigningKey::from)
                .map_err(|_| SignError::InvalidKey(pkcs8_err.to_string()))?,
        };
        Ok(Self::new(msp_id, certificate, signing_key))
    }

    /// Build from a hex-encoded 32-byte private scalar.
    pub fn from_hex_key(
        msp_id: impl Into<String>,
        certificate: Vec<u8>,
        hex_key: &str,
    ) -> Result<Self, SignError> {
        let raw = hex::decode(hex_key.trim().trim_start_matches("0x"))
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let signing_key =
            SigningKey::from_slice(&raw).map_err(|e| SignError::InvalidKey(e.to_string()))?;
        Ok(Self::new(msp_id, certificate, signing_key))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl SigningIdentity for EcdsaIdentity {
    fn msp_id(&self) -> &str {
        &self.msp_id
    }

    fn serialize(&self) -> Result<Vec<u8>, SignError> {
        Ok(SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.certificate.clone(),
        }
        .encode_to_vec())
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignError> {
        let digest = Sha256::digest(payload);
        let sig: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        let sig = sig.normalize_s().unwrap_or(sig);
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

impl std::fmt::Debug for EcdsaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaIdentity")
            .field("msp_id", &self.msp_id)
            .finish_non_exhaustive()
    }
}
