//! Per-connection security state and the encrypted frame layer.
//!
//! A connection starts in plaintext. Once pair-verify succeeds both sides
//! switch to ChaCha20-Poly1305 frames: a little-endian length that doubles as
//! associated data, the ciphertext, and a 16 byte tag. Each direction keeps its
//! own 64-bit nonce counter.

use std::collections::HashSet;
use std::sync::Mutex;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha512;
use thiserror::Error;
use super::lock;
use super::pairing::{SetupProgress, VerifyProgress};

/// Largest plaintext carried by one frame
const MAX_FRAME: usize = 1024;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("decryption failed")]
    Authentication,
    #[error("frame of {0} bytes exceeds the limit")]
    Oversized(usize),
    #[error("key derivation failed")]
    Derivation,
}

/// HKDF-SHA512 to a 32 byte key
pub fn derive_key(secret: &[u8], salt: &str, info: &str) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt.as_bytes()), secret);
    let mut key = [0u8; 32];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|_| CryptoError::Derivation)?;
    Ok(key)
}

fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Pairing messages use a fixed label such as "PS-Msg05" as the nonce
fn label_nonce(label: &[u8; 8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(label);
    nonce
}

/// Encrypt one pairing sub-message
pub fn seal(key: &[u8; 32], label: &[u8; 8], plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(Nonce::from_slice(&label_nonce(label)), plain)
        .map_err(|_| CryptoError::Authentication)
}

/// Decrypt one pairing sub-message
pub fn open(key: &[u8; 32], label: &[u8; 8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(&label_nonce(label)), sealed)
        .map_err(|_| CryptoError::Authentication)
}

/// Keys for an established session, from the accessory's point of view
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub encrypt: [u8; 32],
    pub decrypt: [u8; 32],
}

impl SessionKeys {
    pub fn accessory(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            encrypt: derive_key(shared_secret, "Control-Salt", "Control-Read-Encryption-Key")?,
            decrypt: derive_key(shared_secret, "Control-Salt", "Control-Write-Encryption-Key")?,
        })
    }

    /// The same keys seen from the controller
    #[cfg(test)]
    pub fn controller(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let keys = Self::accessory(shared_secret)?;
        Ok(Self {
            encrypt: keys.decrypt,
            decrypt: keys.encrypt,
        })
    }
}

pub struct FrameCodec {
    encrypt: ChaCha20Poly1305,
    decrypt: ChaCha20Poly1305,
    sent: u64,
    received: u64,
}

impl FrameCodec {
    pub fn new(keys: &SessionKeys) -> Self {
        Self {
            encrypt: ChaCha20Poly1305::new(Key::from_slice(&keys.encrypt)),
            decrypt: ChaCha20Poly1305::new(Key::from_slice(&keys.decrypt)),
            sent: 0,
            received: 0,
        }
    }

    pub fn seal(&mut self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(plain.len() + (plain.len() / MAX_FRAME + 1) * (2 + TAG_LEN));

        for chunk in plain.chunks(MAX_FRAME) {
            let aad = (chunk.len() as u16).to_le_bytes();
            let sealed = self
                .encrypt
                .encrypt(
                    Nonce::from_slice(&counter_nonce(self.sent)),
                    Payload { msg: chunk, aad: &aad },
                )
                .map_err(|_| CryptoError::Authentication)?;
            self.sent += 1;

            out.extend_from_slice(&aad);
            out.extend_from_slice(&sealed);
        }

        Ok(out)
    }

    /// Decrypt every complete frame at the front of `raw`. A trailing partial
    /// frame stays in `raw` until more bytes arrive.
    pub fn open(&mut self, raw: &mut Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        let mut plain = Vec::new();

        while raw.len() >= 2 {
            let aad = [raw[0], raw[1]];
            let len = u16::from_le_bytes(aad) as usize;
            if len > MAX_FRAME {
                return Err(CryptoError::Oversized(len));
            }

            let total = 2 + len + TAG_LEN;
            if raw.len() < total {
                break;
            }

            let opened = self
                .decrypt
                .decrypt(
                    Nonce::from_slice(&counter_nonce(self.received)),
                    Payload { msg: &raw[2..total], aad: &aad },
                )
                .map_err(|_| CryptoError::Authentication)?;
            self.received += 1;

            plain.extend_from_slice(&opened);
            raw.drain(..total);
        }

        Ok(plain)
    }
}

/// The controller a session was verified for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub id: String,
    pub admin: bool,
}

/// State of one controller connection
#[derive(Default)]
pub struct Session {
    controller: Mutex<Option<Controller>>,
    pending_keys: Mutex<Option<SessionKeys>>,
    pub(super) setup: Mutex<Option<SetupProgress>>,
    pub(super) verify: Mutex<Option<VerifyProgress>>,
    events: Mutex<HashSet<(u64, u64)>>,
}

impl Session {
    pub fn controller(&self) -> Option<Controller> {
        lock(&self.controller).clone()
    }

    pub fn is_verified(&self) -> bool {
        lock(&self.controller).is_some()
    }

    /// Mark the session verified. The keys take effect on the next inbound
    /// bytes so the reply that completes verification still goes out in plaintext.
    pub fn establish(&self, controller: Controller, keys: SessionKeys) {
        *lock(&self.controller) = Some(controller);
        *lock(&self.pending_keys) = Some(keys);
    }

    pub fn take_pending_keys(&self) -> Option<SessionKeys> {
        lock(&self.pending_keys).take()
    }

    pub fn set_events(&self, aid: u64, iid: u64, enabled: bool) {
        let mut events = lock(&self.events);
        if enabled {
            events.insert((aid, iid));
        } else {
            events.remove(&(aid, iid));
        }
    }

    pub fn wants_events(&self, aid: u64, iid: u64) -> bool {
        lock(&self.events).contains(&(aid, iid))
    }
}
