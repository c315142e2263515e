//! Pair-setup, pair-verify and pairing management.
//!
//! Pair-setup proves knowledge of the setup code with SRP and exchanges
//! long-term Ed25519 keys, which are kept in the [`PairingStore`]. Pair-verify
//! runs an X25519 exchange signed with those keys and yields the session keys
//! for the encrypted connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::watch;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use super::lock;
use super::session::{derive_key, open, seal, Controller, Session, SessionKeys};
use super::srp::SrpServer;
use super::store::PairingStore;
use super::tlv::{self, PairingError, Tlv};

/// Failed setup attempts allowed before pair-setup is refused
const MAX_SETUP_ATTEMPTS: u32 = 100;

/// Where a connection is in pair-setup
pub enum SetupProgress {
    /// M2 sent, waiting for the client proof
    Started(Box<SrpServer>),
    /// M4 sent; holds the SRP session key
    Verified(Vec<u8>),
}

/// M2 of pair-verify sent, waiting for M3
pub struct VerifyProgress {
    shared_secret: [u8; 32],
    accessory_public: [u8; 32],
    controller_public: [u8; 32],
    key: [u8; 32],
}

/// Pairing identity and state of one accessory
pub struct PairingContext {
    store: Arc<Mutex<PairingStore>>,
    device_id: String,
    setup_code: String,
    signing_key: SigningKey,
    failed_attempts: AtomicU32,
    paired: watch::Sender<bool>,
}

impl PairingContext {
    /// `setup_code` is the formatted code, e.g. "001-02-003"
    pub fn new(store: Arc<Mutex<PairingStore>>, device_id: String, setup_code: String) -> Result<Self> {
        let (seed, paired) = {
            let store = lock(&store);
            (store.signing_key()?, store.pairing_count()? > 0)
        };
        let (paired, _rx) = watch::channel(paired);

        Ok(Self {
            store,
            device_id,
            setup_code,
            signing_key: SigningKey::from_bytes(&seed),
            failed_attempts: AtomicU32::new(0),
            paired,
        })
    }

    pub fn is_paired(&self) -> bool {
        *self.paired.borrow()
    }

    /// Notified whenever the accessory becomes paired or unpaired
    pub fn subscribe_paired(&self) -> watch::Receiver<bool> {
        self.paired.subscribe()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn refresh_paired(&self) {
        match lock(&self.store).pairing_count() {
            Ok(count) => {
                self.paired.send_if_modified(|paired| {
                    let now = count > 0;
                    std::mem::replace(paired, now) != now
                });
            }
            Err(e) => tracing::error!("Failed to count pairings: {:#}", e),
        }
    }

    /// `POST /pair-setup`
    pub fn pair_setup(&self, session: &Session, body: &[u8]) -> Tlv {
        let request = match Tlv::decode(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed pair-setup request: {}", e);
                return Tlv::error(2, PairingError::Unknown);
            }
        };

        match request.byte(tlv::STATE) {
            Some(1) => self.setup_start(session),
            Some(3) => self.setup_proof(session, &request),
            Some(5) => match self.setup_exchange(session, &request) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Pair-setup key exchange failed: {:#}", e);
                    Tlv::error(6, PairingError::Authentication)
                }
            },
            state => {
                tracing::warn!("Unexpected pair-setup state {:?}", state);
                Tlv::error(2, PairingError::Unknown)
            }
        }
    }

    fn setup_start(&self, session: &Session) -> Tlv {
        if self.is_paired() {
            return Tlv::error(2, PairingError::Unavailable);
        }
        if self.failed_attempts.load(Ordering::Relaxed) >= MAX_SETUP_ATTEMPTS {
            return Tlv::error(2, PairingError::MaxTries);
        }

        let mut salt = [0u8; 16];
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut secret);

        let server = SrpServer::new(&self.setup_code, &salt, &secret);
        let response = Tlv::state(2)
            .with(tlv::PUBLIC_KEY, server.public_key())
            .with(tlv::SALT, server.salt());
        *lock(&session.setup) = Some(SetupProgress::Started(Box::new(server)));
        response
    }

    fn setup_proof(&self, session: &Session, request: &Tlv) -> Tlv {
        let server = match lock(&session.setup).take() {
            Some(SetupProgress::Started(server)) => server,
            _ => return Tlv::error(4, PairingError::Unknown),
        };
        let (Some(a_pub), Some(proof)) = (request.get(tlv::PUBLIC_KEY), request.get(tlv::PROOF)) else {
            return Tlv::error(4, PairingError::Unknown);
        };

        match server.verify(a_pub, proof) {
            Some(srp) => {
                *lock(&session.setup) = Some(SetupProgress::Verified(srp.key));
                Tlv::state(4).with(tlv::PROOF, srp.proof)
            }
            None => {
                let attempts = self.failed_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("Pair-setup rejected: wrong setup code ({} failed attempts)", attempts);
                Tlv::error(4, PairingError::Authentication)
            }
        }
    }

    fn setup_exchange(&self, session: &Session, request: &Tlv) -> Result<Tlv> {
        let srp_key = match lock(&session.setup).take() {
            Some(SetupProgress::Verified(key)) => key,
            _ => return Err(anyhow!("no verified setup in progress")),
        };
        let key = derive_key(&srp_key, "Pair-Setup-Encrypt-Salt", "Pair-Setup-Encrypt-Info")?;

        let encrypted = request.get(tlv::ENCRYPTED_DATA).context("missing encrypted data")?;
        let sub = Tlv::decode(&open(&key, b"PS-Msg05", encrypted)?)?;
        let controller_id = sub.get(tlv::IDENTIFIER).context("missing identifier")?;
        let controller_key = sub.get(tlv::PUBLIC_KEY).context("missing public key")?;
        let signature = sub.get(tlv::SIGNATURE).context("missing signature")?;

        let controller_x = derive_key(
            &srp_key,
            "Pair-Setup-Controller-Sign-Salt",
            "Pair-Setup-Controller-Sign-Info",
        )?;
        let signed = [&controller_x[..], controller_id, controller_key].concat();
        verify_signature(controller_key, &signed, signature)?;

        let controller_id = std::str::from_utf8(controller_id).context("identifier is not UTF-8")?;
        lock(&self.store).add_pairing(controller_id, controller_key, true)?;
        self.refresh_paired();
        tracing::info!("Paired with controller {}", controller_id);

        let accessory_x = derive_key(
            &srp_key,
            "Pair-Setup-Accessory-Sign-Salt",
            "Pair-Setup-Accessory-Sign-Info",
        )?;
        let public_key = self.public_key();
        let signed = [&accessory_x[..], self.device_id.as_bytes(), &public_key[..]].concat();
        let sub = Tlv::new()
            .with(tlv::IDENTIFIER, self.device_id.as_bytes())
            .with(tlv::PUBLIC_KEY, public_key)
            .with(tlv::SIGNATURE, self.signing_key.sign(&signed).to_bytes());

        Ok(Tlv::state(6).with(tlv::ENCRYPTED_DATA, seal(&key, b"PS-Msg06", &sub.encode())?))
    }

    /// `POST /pair-verify`
    pub fn pair_verify(&self, session: &Session, body: &[u8]) -> Tlv {
        let request = match Tlv::decode(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed pair-verify request: {}", e);
                return Tlv::error(2, PairingError::Unknown);
            }
        };

        match request.byte(tlv::STATE) {
            Some(1) => self.verify_start(session, &request).unwrap_or_else(|e| {
                tracing::warn!("Pair-verify start failed: {:#}", e);
                Tlv::error(2, PairingError::Unknown)
            }),
            Some(3) => self.verify_finish(session, &request).unwrap_or_else(|e| {
                tracing::warn!("Pair-verify rejected: {:#}", e);
                Tlv::error(4, PairingError::Authentication)
            }),
            state => {
                tracing::warn!("Unexpected pair-verify state {:?}", state);
                Tlv::error(2, PairingError::Unknown)
            }
        }
    }

    fn verify_start(&self, session: &Session, request: &Tlv) -> Result<Tlv> {
        let controller_public: [u8; 32] = request
            .get(tlv::PUBLIC_KEY)
            .context("missing public key")?
            .try_into()
            .context("public key has the wrong length")?;

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let accessory_public = X25519Public::from(&secret);
        let shared = secret.diffie_hellman(&X25519Public::from(controller_public));

        let signed = [
            accessory_public.as_bytes().as_slice(),
            self.device_id.as_bytes(),
            &controller_public[..],
        ]
        .concat();
        let sub = Tlv::new()
            .with(tlv::IDENTIFIER, self.device_id.as_bytes())
            .with(tlv::SIGNATURE, self.signing_key.sign(&signed).to_bytes());

        let key = derive_key(shared.as_bytes(), "Pair-Verify-Encrypt-Salt", "Pair-Verify-Encrypt-Info")?;
        let encrypted = seal(&key, b"PV-Msg02", &sub.encode())?;

        *lock(&session.verify) = Some(VerifyProgress {
            shared_secret: *shared.as_bytes(),
            accessory_public: *accessory_public.as_bytes(),
            controller_public,
            key,
        });

        Ok(Tlv::state(2)
            .with(tlv::PUBLIC_KEY, accessory_public.as_bytes())
            .with(tlv::ENCRYPTED_DATA, encrypted))
    }

    fn verify_finish(&self, session: &Session, request: &Tlv) -> Result<Tlv> {
        let progress = lock(&session.verify).take().context("no verify in progress")?;

        let encrypted = request.get(tlv::ENCRYPTED_DATA).context("missing encrypted data")?;
        let sub = Tlv::decode(&open(&progress.key, b"PV-Msg03", encrypted)?)?;
        let controller_id = sub.get(tlv::IDENTIFIER).context("missing identifier")?;
        let signature = sub.get(tlv::SIGNATURE).context("missing signature")?;

        let controller_id = std::str::from_utf8(controller_id).context("identifier is not UTF-8")?;
        let pairing = lock(&self.store)
            .pairing(controller_id)?
            .with_context(|| format!("unknown controller {}", controller_id))?;

        let signed = [
            &progress.controller_public[..],
            controller_id.as_bytes(),
            &progress.accessory_public[..],
        ]
        .concat();
        verify_signature(&pairing.public_key, &signed, signature)?;

        session.establish(
            Controller {
                id: pairing.controller_id,
                admin: pairing.admin,
            },
            SessionKeys::accessory(&progress.shared_secret)?,
        );
        tracing::debug!("Verified session for controller {}", controller_id);

        Ok(Tlv::state(4))
    }

    /// `POST /pairings`: add, remove or list pairings. Admin sessions only.
    pub fn manage(&self, session: &Session, body: &[u8]) -> Tlv {
        if !session.controller().is_some_and(|c| c.admin) {
            return Tlv::error(2, PairingError::Authentication);
        }

        let result = Tlv::decode(body)
            .map_err(anyhow::Error::from)
            .and_then(|request| match request.byte(tlv::METHOD) {
                Some(tlv::METHOD_ADD_PAIRING) => self.add_pairing(&request),
                Some(tlv::METHOD_REMOVE_PAIRING) => self.remove_pairing(&request),
                Some(tlv::METHOD_LIST_PAIRINGS) => self.list_pairings(),
                method => Err(anyhow!("unsupported method {:?}", method)),
            });

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Pairing request failed: {:#}", e);
                Tlv::error(2, PairingError::Unknown)
            }
        }
    }

    fn add_pairing(&self, request: &Tlv) -> Result<Tlv> {
        let controller_id = request.get(tlv::IDENTIFIER).context("missing identifier")?;
        let controller_id = std::str::from_utf8(controller_id).context("identifier is not UTF-8")?;
        let public_key = request.get(tlv::PUBLIC_KEY).context("missing public key")?;
        let admin = request.byte(tlv::PERMISSIONS).unwrap_or(0) & 1 == 1;

        {
            let store = lock(&self.store);
            if let Some(existing) = store.pairing(controller_id)? {
                if existing.public_key != public_key {
                    return Ok(Tlv::error(2, PairingError::Unknown));
                }
            }
            store.add_pairing(controller_id, public_key, admin)?;
        }
        self.refresh_paired();

        tracing::info!("Added pairing for {} (admin={})", controller_id, admin);
        Ok(Tlv::state(2))
    }

    fn remove_pairing(&self, request: &Tlv) -> Result<Tlv> {
        let controller_id = request.get(tlv::IDENTIFIER).context("missing identifier")?;
        let controller_id = std::str::from_utf8(controller_id).context("identifier is not UTF-8")?;

        lock(&self.store).remove_pairing(controller_id)?;
        self.refresh_paired();

        tracing::info!("Removed pairing for {}", controller_id);
        Ok(Tlv::state(2))
    }

    fn list_pairings(&self) -> Result<Tlv> {
        let pairings = lock(&self.store).pairings()?;

        let mut response = Tlv::state(2);
        for (i, pairing) in pairings.iter().enumerate() {
            if i > 0 {
                response = response.with(tlv::SEPARATOR, b"");
            }
            response = response
                .with(tlv::IDENTIFIER, pairing.controller_id.as_bytes())
                .with(tlv::PUBLIC_KEY, &pairing.public_key)
                .with(tlv::PERMISSIONS, [pairing.admin as u8]);
        }
        Ok(response)
    }
}

fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let public_key: [u8; 32] = public_key.try_into().context("public key has the wrong length")?;
    let public_key = VerifyingKey::from_bytes(&public_key).context("invalid public key")?;
    let signature = Signature::from_slice(signature).context("invalid signature")?;
    public_key
        .verify(message, &signature)
        .context("signature does not match")
}
