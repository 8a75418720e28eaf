//! Integrated encryption over X25519, used for vote packages.
//!
//! An ephemeral keypair is generated per message; the AES-256-GCM key is
//! derived with HKDF-SHA256 from the ephemeral public key and the shared
//! secret. The wire format is `ephemeral_pub(32) ‖ nonce(12) ‖ ciphertext`.
//! Encrypted processes layer this construction once per key-keeper index,
//! so decryption applies the private keys in reverse order.

use crate::Error;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

const PUBLIC_KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Encrypt a message so that it can only be decrypted with the X25519
/// secret matching `receiver_public`
pub fn encrypt(receiver_public: &[u8; 32], msg: &[u8]) -> Result<Vec<u8>, Error> {
    let ephemeral_secret = StaticSecret::from(crate::util::random_bytes32());
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&PublicKey::from(*receiver_public));

    let key = derive_key(ephemeral_public.as_bytes(), shared.as_bytes());
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), msg)
        .map_err(|_| Error::EncryptionFailed)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_LENGTH + NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a message produced by [`encrypt`]
pub fn decrypt(receiver_secret: &[u8; 32], msg: &[u8]) -> Result<Vec<u8>, Error> {
    if msg.len() < PUBLIC_KEY_LENGTH + NONCE_LENGTH {
        return Err(Error::DecryptionFailed);
    }
    let mut ephemeral_public = [0u8; PUBLIC_KEY_LENGTH];
    ephemeral_public.copy_from_slice(&msg[..PUBLIC_KEY_LENGTH]);
    let nonce = &msg[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH + NONCE_LENGTH];
    let ciphertext = &msg[PUBLIC_KEY_LENGTH + NONCE_LENGTH..];

    let secret = StaticSecret::from(*receiver_secret);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_public));
    let key = derive_key(&ephemeral_public, shared.as_bytes());

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

fn derive_key(ephemeral_public: &[u8; 32], shared: &[u8; 32]) -> [u8; 32] {
    let mut master = [0u8; 64];
    master[..32].copy_from_slice(ephemeral_public);
    master[32..].copy_from_slice(shared);

    let h = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0u8; 32];
    // infallible: 32 bytes is far below the HKDF output limit
    h.expand(&[], &mut out)
        .expect("ballotchain: hkdf expand failure");
    out
}
