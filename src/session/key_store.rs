//! Session key lifecycle (spec.md §4.B).
//!
//! `SessionKeyPair` is lazily created on first use, persisted in the local
//! key store under the fixed `lit-session-key` slot, and reused across
//! calls unless explicitly rotated.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::storage::{self, PersistenceAdapter, SESSION_KEY_KEY};

/// `(publicKey, secretKey)` of an Ed25519 pair, stored as lowercase hex
/// (spec.md §3 "SessionKeyPair").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyPair {
    pub public_key: String,
    secret_key: String,
}

impl SessionKeyPair {
    fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public_key: hex::encode(signing_key.verifying_key().to_bytes()),
            secret_key: hex::encode(signing_key.to_bytes()),
        }
    }

    /// The structural check `isSessionKeyPair(x)` from spec.md §4.B: both
    /// halves are present and decode as 32-byte hex.
    pub fn is_session_key_pair(&self) -> bool {
        let pk = hex::decode(&self.public_key);
        let sk = hex::decode(&self.secret_key);
        matches!((pk, sk), (Ok(pk), Ok(sk)) if pk.len() == 32 && sk.len() == 32)
    }

    pub fn session_key_uri(&self) -> String {
        session_key_uri(&self.public_key)
    }

    fn signing_key(&self) -> anyhow::Result<SigningKey> {
        let bytes: [u8; 32] = hex::decode(&self.secret_key)?
            .try_into()
            .map_err(|_| anyhow::anyhow!("secret key is not 32 bytes"))?;
        Ok(SigningKey::from_bytes(&bytes))
    }

    /// Sign a detached Ed25519 signature over `message`, returning lowercase
    /// hex — used to mint per-node `SessionSigningTemplate` signatures
    /// (spec.md §4.F step 9).
    pub fn sign(&self, message: &[u8]) -> anyhow::Result<String> {
        let signing_key = self.signing_key()?;
        let signature = signing_key.sign(message);
        Ok(hex::encode(signature.to_bytes()))
    }
}

/// `lit:session:<publicKey-hex>` (spec.md §3 "SessionKeyUri").
pub fn session_key_uri(public_key_hex: &str) -> String {
    format!("lit:session:{public_key_hex}")
}

/// Returns the persisted key or, on miss, generates and persists a fresh
/// pair. Persistence failure is non-fatal and logged (spec.md §4.B).
pub fn get_session_key(adapter: &dyn PersistenceAdapter) -> SessionKeyPair {
    if let Some(existing) = storage::read_slot_lossy::<SessionKeyPair>(adapter, SESSION_KEY_KEY) {
        if existing.is_session_key_pair() {
            return existing;
        }
        tracing::warn!("stored session key failed structural check, regenerating");
    }
    let fresh = SessionKeyPair::generate();
    storage::write_slot_lossy(adapter, SESSION_KEY_KEY, &fresh);
    fresh
}

/// Force-generate and persist a new session key, discarding any cached one.
pub fn rotate_session_key(adapter: &dyn PersistenceAdapter) -> SessionKeyPair {
    let fresh = SessionKeyPair::generate();
    storage::write_slot_lossy(adapter, SESSION_KEY_KEY, &fresh);
    fresh
}
