//! SRP-6a server side of pair-setup: SHA-512 over the 3072-bit group with
//! generator 5, username "Pair-Setup" and the setup code as password.

use num_bigint::BigUint;
use sha2::{Digest, Sha512};

const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);
const GENERATOR: u32 = 5;

/// Byte length of the group modulus
const N_LEN: usize = 384;

pub const USERNAME: &str = "Pair-Setup";

fn hash(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Left-pad to the modulus length
fn pad(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    let mut out = vec![0u8; N_LEN.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// Group parameters
#[derive(Debug, Clone)]
pub struct Group {
    pub n: BigUint,
    pub g: BigUint,
}

impl Group {
    pub fn new() -> Self {
        Self {
            n: BigUint::parse_bytes(N_HEX.as_bytes(), 16).unwrap_or_default(),
            g: BigUint::from(GENERATOR),
        }
    }

    /// k = H(N | PAD(g))
    pub fn multiplier(&self) -> BigUint {
        BigUint::from_bytes_be(&hash(&[&self.n.to_bytes_be(), &pad(&self.g)]))
    }

    /// x = H(s | H(I ":" P))
    pub fn private_key(&self, salt: &[u8], password: &str) -> BigUint {
        let identity = hash(&[USERNAME.as_bytes(), b":", password.as_bytes()]);
        BigUint::from_bytes_be(&hash(&[salt, &identity]))
    }

    /// u = H(PAD(A) | PAD(B))
    pub fn scrambler(&self, a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
        BigUint::from_bytes_be(&hash(&[&pad(a_pub), &pad(b_pub)]))
    }

    /// K = H(PAD(S))
    pub fn session_key(&self, premaster: &BigUint) -> Vec<u8> {
        hash(&[&pad(premaster)])
    }

    /// M1 = H(H(N) xor H(g) | H(I) | s | A | B | K)
    pub fn client_proof(&self, salt: &[u8], a_pub: &[u8], b_pub: &[u8], key: &[u8]) -> Vec<u8> {
        let hn = hash(&[&self.n.to_bytes_be()]);
        let hg = hash(&[&self.g.to_bytes_be()]);
        let xor: Vec<u8> = hn.iter().zip(&hg).map(|(a, b)| a ^ b).collect();
        let hi = hash(&[USERNAME.as_bytes()]);
        hash(&[&xor, &hi, salt, a_pub, b_pub, key])
    }

    /// M2 = H(A | M1 | K)
    pub fn server_proof(&self, a_pub: &[u8], client_proof: &[u8], key: &[u8]) -> Vec<u8> {
        hash(&[a_pub, client_proof, key])
    }
}

/// Result of a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpSession {
    /// Shared secret K
    pub key: Vec<u8>,
    /// M2, sent back to the client
    pub proof: Vec<u8>,
}

pub struct SrpServer {
    group: Group,
    salt: Vec<u8>,
    verifier: BigUint,
    secret: BigUint,
    public: BigUint,
}

impl SrpServer {
    /// `secret` is the random private value b
    pub fn new(password: &str, salt: &[u8], secret: &[u8]) -> Self {
        let group = Group::new();
        let x = group.private_key(salt, password);
        let verifier = group.g.modpow(&x, &group.n);
        let secret = BigUint::from_bytes_be(secret);
        let public = (group.multiplier() * &verifier + group.g.modpow(&secret, &group.n)) % &group.n;

        Self {
            group,
            salt: salt.to_vec(),
            verifier,
            secret,
            public,
        }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// B, padded to the modulus length
    pub fn public_key(&self) -> Vec<u8> {
        pad(&self.public)
    }

    /// Check the client's public key and proof. `None` means a wrong setup code
    /// or a malformed exchange.
    pub fn verify(&self, a_pub: &[u8], client_proof: &[u8]) -> Option<SrpSession> {
        let n = &self.group.n;
        let a = BigUint::from_bytes_be(a_pub);
        if (&a % n).bits() == 0 {
            return None;
        }

        let u = self.group.scrambler(&a, &self.public);
        let premaster = (&a * self.verifier.modpow(&u, n)).modpow(&self.secret, n);
        let key = self.group.session_key(&premaster);

        let expected = self.group.client_proof(&self.salt, a_pub, &self.public_key(), &key);
        if expected.as_slice() != client_proof {
            return None;
        }

        let proof = self.group.server_proof(a_pub, &expected, &key);
        Some(SrpSession { key, proof })
    }
}
