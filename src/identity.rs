use rand::RngCore;
use std::sync::RwLock;

use crate::crypto::CryptoBox;
use crate::error::{AnonchatError, Result};

const MAX_NICKNAME_BYTES: usize = 32;

/// Ephemeral per-process identity: a random session id, an optional
/// nickname, and the CryptoBox that holds the actual key material.
/// Nothing here survives a restart by design. Shareable via `Arc<Identity>`
/// across the broadcast/ingress/CLI threads without an outer lock.
pub struct Identity {
    pub anon_id: String,
    nickname: RwLock<Option<String>>,
    pub crypto: CryptoBox,
}

impl Identity {
    pub fn new(nickname: Option<String>) -> Self {
        Identity {
            anon_id: generate_anon_id(),
            nickname: RwLock::new(nickname),
            crypto: CryptoBox::new(),
        }
    }

    pub fn nickname(&self) -> Option<String> {
        self.nickname.read().unwrap().clone()
    }

    /// Rejects nicknames over 32 bytes rather than silently truncating.
    pub fn set_nickname(&self, nickname: Option<String>) -> Result<()> {
        if let Some(nick) = &nickname {
            if nick.len() > MAX_NICKNAME_BYTES {
                return Err(AnonchatError::PayloadTooLarge(format!(
                    "nickname exceeds {MAX_NICKNAME_BYTES} bytes"
                )));
            }
        }
        *self.nickname.write().unwrap() = nickname;
        Ok(())
    }

    pub fn display_name(&self) -> String {
        match self.nickname() {
            Some(nick) if !nick.is_empty() => format!("{} ({})", self.anon_id, nick),
            _ => self.anon_id.clone(),
        }
    }
}

fn generate_anon_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("anon-{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_id_has_expected_shape() {
        let id = Identity::new(None);
        assert!(id.anon_id.starts_with("anon-"));
        assert_eq!(id.anon_id.len(), "anon-".len() + 8);
    }

    #[test]
    fn display_name_falls_back_without_nickname() {
        let id = Identity::new(None);
        assert_eq!(id.display_name(), id.anon_id);
    }

    #[test]
    fn display_name_includes_nickname_when_set() {
        let id = Identity::new(Some("Alice".to_string()));
        assert_eq!(id.display_name(), format!("{} (Alice)", id.anon_id));
    }

    #[test]
    fn set_nickname_rejects_over_length_value() {
        let id = Identity::new(None);
        let too_long = "x".repeat(MAX_NICKNAME_BYTES + 1);
        let err = id.set_nickname(Some(too_long)).unwrap_err();
        assert!(matches!(err, AnonchatError::PayloadTooLarge(_)));
        assert_eq!(id.nickname(), None);
    }

    #[test]
    fn set_nickname_accepts_value_at_the_limit() {
        let id = Identity::new(None);
        let at_limit = "x".repeat(MAX_NICKNAME_BYTES);
        id.set_nickname(Some(at_limit.clone())).unwrap();
        assert_eq!(id.nickname(), Some(at_limit));
    }
}
