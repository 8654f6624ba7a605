use aes_gcm::{Aes256Gcm, KeyInit as AeadKeyInit, Nonce, aead::Aead};
use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::Sha256;

use crate::error::{Rejection, SimError};
use crate::types::{MAC_LEN, NONCE_LEN};

/// Pre-shared symmetric keys held by every legitimate node
///
/// Distribution and rotation are outside the simulation: all ECUs built
/// from the same `KeyMaterial` share both keys, attackers never get them.
#[derive(Clone)]
pub struct KeyMaterial {
    encryption_key: [u8; 32],
    mac_key: [u8; 32],
}

impl KeyMaterial {
    pub fn generate() -> Self {
        Self::from_rng(&mut rand::thread_rng())
    }

    /// Deterministic keys for reproducible runs
    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(&mut StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: &mut impl Rng) -> Self {
        let mut encryption_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        rng.fill(&mut encryption_key);
        rng.fill(&mut mac_key);
        Self {
            encryption_key,
            mac_key,
        }
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    /// Short key fingerprint for logs, never the key itself
    pub fn fingerprint(&self) -> String {
        hex::encode(&generate_mac(b"fingerprint", &self.mac_key).unwrap_or([0; MAC_LEN])[..4])
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Fresh random 96-bit nonce, one per encrypted frame
pub fn fresh_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);
    nonce
}

/// HMAC-SHA256 over `data`
pub fn generate_mac(data: &[u8], key: &[u8; 32]) -> Result<[u8; MAC_LEN], SimError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| SimError::Encryption(format!("invalid MAC key: {}", e)))?;
    mac.update(data);

    let bytes = mac.finalize().into_bytes();
    let mut output = [0u8; MAC_LEN];
    output.copy_from_slice(&bytes);
    Ok(output)
}

/// Recompute the tag and compare in constant time
pub fn verify_mac(data: &[u8], tag: &[u8; MAC_LEN], key: &[u8; 32]) -> Result<(), Rejection> {
    let mut expected = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| Rejection::InvalidMac)?;
    expected.update(data);
    expected.verify_slice(tag).map_err(|_| Rejection::InvalidMac)
}

/// AES-256-GCM encryption; the CAN identifier is bound as associated data
pub fn encrypt_aes256_gcm(
    plaintext: &[u8],
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    associated_data: &[u8],
) -> Result<Vec<u8>, SimError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| SimError::Encryption(format!("invalid key: {}", e)))?;

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            aes_gcm::aead::Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| SimError::Encryption(e.to_string()))
}

/// Fails on a foreign key, a tampered ciphertext, a wrong nonce or wrong AAD
pub fn decrypt_aes256_gcm(
    ciphertext: &[u8],
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    associated_data: &[u8],
) -> Result<Vec<u8>, Rejection> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Rejection::InvalidEncryption)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            aes_gcm::aead::Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| Rejection::InvalidEncryption)
}
