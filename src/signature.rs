//! Signature collaborator contract and an ed25519 implementation of it.
//!
//! The codec only relies on one property: a signature is valid iff it was made
//! over exactly the canonical bytes of the action data it travels with.
use super::error::SignatureError;
use super::identity::{Identity, IdentityType};
use super::utils::{self, IDENTITY_HRP};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignatureMethod {
    Ed25519,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub method: SignatureMethod,
    pub value: String,
}

pub trait SignatureProvider {
    fn sign(&self, data: &[u8], signer: &Identity) -> Result<Signature, SignatureError>;
}

pub trait SignatureVerifier {
    /// Returns the identity bound to `signature` once it is verified against `data`.
    fn recover(&self, data: &[u8], signature: &Signature) -> Result<Identity, SignatureError>;
}

/// Holds the signing keys of the identities it may sign for.
#[derive(Default)]
pub struct Ed25519SignatureProvider {
    keys: BTreeMap<Identity, SigningKey>,
}

impl Ed25519SignatureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret seed and returns the identity it signs as.
    pub fn add_signing_key(&mut self, seed: [u8; 32]) -> Result<Identity, SignatureError> {
        let key = SigningKey::from_bytes(&seed);
        let identity = identity_of(&key.verifying_key())?;
        self.keys.insert(identity.clone(), key);
        Ok(identity)
    }

    pub fn remove_signing_key(&mut self, identity: &Identity) {
        self.keys.remove(identity);
    }
}

impl SignatureProvider for Ed25519SignatureProvider {
    fn sign(&self, data: &[u8], signer: &Identity) -> Result<Signature, SignatureError> {
        let key = self
            .keys
            .get(signer)
            .ok_or_else(|| SignatureError::UnknownSigner(signer.value.clone()))?;

        let mut value = key.verifying_key().to_bytes().to_vec();
        value.extend_from_slice(&key.sign(data).to_bytes());

        Ok(Signature {
            method: SignatureMethod::Ed25519,
            value: hex::encode(value),
        })
    }
}

/// Stateless verifier: the signature value carries `public key ‖ signature`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn recover(&self, data: &[u8], signature: &Signature) -> Result<Identity, SignatureError> {
        let raw = hex::decode(&signature.value)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        if raw.len() != 96 {
            return Err(SignatureError::Malformed(format!(
                "expected 96 bytes, got {}",
                raw.len()
            )));
        }
        let (public, sig) = raw.split_at(32);

        let public: [u8; 32] = public
            .try_into()
            .map_err(|_| SignatureError::Malformed("public key length".into()))?;
        let sig: [u8; 64] = sig
            .try_into()
            .map_err(|_| SignatureError::Malformed("signature length".into()))?;

        let verifying_key = VerifyingKey::from_bytes(&public)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        verifying_key
            .verify(data, &ed25519_dalek::Signature::from_bytes(&sig))
            .map_err(|_| SignatureError::Mismatch)?;

        identity_of(&verifying_key)
    }
}

fn identity_of(key: &VerifyingKey) -> Result<Identity, SignatureError> {
    let value = utils::encode_bech32(IDENTITY_HRP, key.as_bytes())
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    Ok(Identity::new(IdentityType::Ed25519PublicKey, value))
}
