// Ephemeral session-key material and authenticated encryption per peer.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{AnonchatError, Result};

const NONCE_SIZE: usize = 12;
const HKDF_INFO: &[u8] = b"anonchat";

/// Owns the process's X25519 keypair and a write-once table of derived
/// per-peer shared keys. Once a peer's key is registered it is never
/// rederived for the lifetime of the process.
pub struct CryptoBox {
    secret: StaticSecret,
    public: PublicKey,
    shared_keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl CryptoBox {
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        CryptoBox {
            secret,
            public,
            shared_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public.as_bytes())
    }

    /// Idempotent: a no-op if `peer_id` is already registered, even if
    /// `peer_public_key_b64` differs from what was used the first time.
    pub fn register_peer(&self, peer_id: &str, peer_public_key_b64: &str) -> Result<()> {
        if self.shared_keys.read().unwrap().contains_key(peer_id) {
            return Ok(());
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(peer_public_key_b64)
            .map_err(|e| AnonchatError::ParseError(format!("bad peer public key: {e}")))?;
        let peer_bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| AnonchatError::ParseError("peer public key must be 32 bytes".into()))?;
        let peer_public = PublicKey::from(peer_bytes);

        let shared = self.secret.diffie_hellman(&peer_public);
        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| AnonchatError::ParseError("hkdf expand failed".into()))?;

        let mut keys = self.shared_keys.write().unwrap();
        keys.entry(peer_id.to_string()).or_insert(key);
        Ok(())
    }

    pub fn encrypt(&self, peer_id: &str, plaintext: &str) -> Result<String> {
        let keys = self.shared_keys.read().unwrap();
        let key = keys
            .get(peer_id)
            .ok_or_else(|| AnonchatError::UnknownPeer(peer_id.to_string()))?;

        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| AnonchatError::DecryptError)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AnonchatError::DecryptError)?;

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, peer_id: &str, blob: &str) -> Result<String> {
        let keys = self.shared_keys.read().unwrap();
        let key = keys
            .get(peer_id)
            .ok_or_else(|| AnonchatError::UnknownPeer(peer_id.to_string()))?;

        let (nonce_part, ct_part) = blob.split_once('.').ok_or(AnonchatError::DecryptError)?;

        let nonce_bytes: [u8; NONCE_SIZE] = URL_SAFE_NO_PAD
            .decode(nonce_part)
            .map_err(|_| AnonchatError::DecryptError)?
            .try_into()
            .map_err(|_| AnonchatError::DecryptError)?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ct_part)
            .map_err(|_| AnonchatError::DecryptError)?;

        let cipher =
            ChaCha20Poly1305::new_from_slice(key).map_err(|_| AnonchatError::DecryptError)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| AnonchatError::DecryptError)?;

        String::from_utf8(plaintext).map_err(|_| AnonchatError::DecryptError)
    }
}

impl Default for CryptoBox {
    fn default() -> Self {
        Self::new()
    }
}
