use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use rand_core::{OsRng, RngCore};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{CipherError, StorageError};
use crate::storage::KeyValueStore;

pub const CIPHER_KEY_SLOT: &str = "pbi-link.cipher-key.v1";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const PAT_LEN: usize = 52;

/// Seals tokens as `base64(nonce):base64(tag):base64(ciphertext)` under a
/// key generated once and kept in its own storage slot.
pub struct CredentialCipher {
    store: Arc<dyn KeyValueStore>,
    key: OnceCell<Zeroizing<[u8; KEY_LEN]>>,
}

impl CredentialCipher {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: OnceCell::new(),
        }
    }

    /// Returns the persisted key, generating and persisting one on first use.
    ///
    /// Concurrent first callers on the same cipher share a single generated key.
    pub async fn derive_or_create_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
        let key = self
            .key
            .get_or_try_init(|| self.load_or_generate())
            .await?;
        Ok(key.clone())
    }

    async fn load_or_generate(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
        if let Some(encoded) = self.store.get(CIPHER_KEY_SLOT).await? {
            match decode_key(&encoded) {
                Some(key) => return Ok(key),
                None => warn!("stored cipher key is unreadable, generating a replacement"),
            }
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        let encoded = Zeroizing::new(STANDARD.encode(&key[..]));
        self.store.set(CIPHER_KEY_SLOT, &encoded).await?;
        info!("generated new credential cipher key");
        Ok(key)
    }

    async fn aead(&self) -> Result<ChaCha20Poly1305, StorageError> {
        let key = self.derive_or_create_key().await?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let aead = self.aead().await?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = Zeroizing::new(plaintext.as_bytes().to_vec());
        let tag = aead
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", buffer.as_mut_slice())
            .map_err(|_| CipherError::Seal)?;

        Ok(format!(
            "{}:{}:{}",
            STANDARD.encode(nonce),
            STANDARD.encode(tag.as_slice()),
            STANDARD.encode(buffer.as_slice())
        ))
    }

    /// `None` means "undecryptable under the current key", nothing more.
    pub async fn decrypt(&self, sealed: &str) -> Option<String> {
        let mut segments = sealed.split(':');
        let (nonce, tag, ciphertext) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(n), Some(t), Some(c), None) => (n, t, c),
            _ => return None,
        };

        let nonce = STANDARD.decode(nonce).ok().filter(|n| n.len() == NONCE_LEN)?;
        let tag = STANDARD.decode(tag).ok().filter(|t| t.len() == TAG_LEN)?;
        let mut buffer = STANDARD.decode(ciphertext).ok()?;

        let aead = match self.aead().await {
            Ok(aead) => aead,
            Err(e) => {
                warn!(error = %e, "cipher key unavailable, treating token as undecryptable");
                return None;
            }
        };

        aead.decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            buffer.as_mut_slice(),
            Tag::from_slice(&tag),
        )
        .ok()?;

        String::from_utf8(buffer).ok()
    }

    pub fn validate_format(token: &str) -> bool {
        validate_token_format(token)
    }
}

fn decode_key(encoded: &str) -> Option<Zeroizing<[u8; KEY_LEN]>> {
    let raw = Zeroizing::new(STANDARD.decode(encoded.trim()).ok()?);
    if raw.len() != KEY_LEN {
        return None;
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&raw);
    Some(key)
}

/// Exactly 52 characters from the Base64 alphabet, no padding.
pub fn validate_token_format(token: &str) -> bool {
    token.len() == PAT_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}
