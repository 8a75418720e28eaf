use crate::hash::{hash_poseidon, keccak256};
use crate::process::ProcessId;
use crate::Error;
use x25519_dalek::{PublicKey, StaticSecret};

/// Packed byte length of a [`ProcessKeys`]:
/// `pubKey(32) ‖ privKey(32) ‖ revealKey(32) ‖ commitmentKey(32) ‖ index(1)`
pub const PROCESS_KEYS_LENGTH: usize = 129;

/// The full key material a key keeper derives for one process.
///
/// Everything is deterministic from the keeper's signing scalar, the
/// process id and the keeper index, so lost local state can always be
/// re-derived.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProcessKeys {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
    pub reveal_key: [u8; 32],
    pub commitment_key: [u8; 32],
    pub index: u8,
}

impl ProcessKeys {
    /// Derive the key material for `(secret, pid, index)`:
    /// seed = keccak256(secret ‖ pid ‖ index); the seed is the X25519
    /// private key; revealKey = Poseidon(privKey); commitmentKey =
    /// Poseidon(revealKey).
    pub fn derive(secret: &[u8; 32], pid: &ProcessId, index: u8) -> Result<Self, Error> {
        let mut input = Vec::with_capacity(32 + ProcessId::LEN + 1);
        input.extend_from_slice(secret);
        input.extend_from_slice(pid.as_bytes());
        input.push(index);
        let seed = keccak256(&input);

        let public_key = *PublicKey::from(&StaticSecret::from(seed)).as_bytes();
        let reveal_key = hash_poseidon(&seed)?;
        let commitment_key = hash_poseidon(&reveal_key)?;

        Ok(ProcessKeys {
            public_key,
            private_key: seed,
            reveal_key,
            commitment_key,
            index,
        })
    }

    /// Pack into the fixed 129-byte layout used by the keeper's local store
    pub fn encode(&self) -> [u8; PROCESS_KEYS_LENGTH] {
        let mut out = [0u8; PROCESS_KEYS_LENGTH];
        out[..32].copy_from_slice(&self.public_key);
        out[32..64].copy_from_slice(&self.private_key);
        out[64..96].copy_from_slice(&self.reveal_key);
        out[96..128].copy_from_slice(&self.commitment_key);
        out[128] = self.index;
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < PROCESS_KEYS_LENGTH {
            return Err(Error::BadLength("packed process keys"));
        }
        let mut keys = ProcessKeys {
            public_key: [0u8; 32],
            private_key: [0u8; 32],
            reveal_key: [0u8; 32],
            commitment_key: [0u8; 32],
            index: data[128],
        };
        keys.public_key.copy_from_slice(&data[..32]);
        keys.private_key.copy_from_slice(&data[32..64]);
        keys.reveal_key.copy_from_slice(&data[64..96]);
        keys.commitment_key.copy_from_slice(&data[96..128]);
        Ok(keys)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }

    pub fn reveal_key_hex(&self) -> String {
        hex::encode(self.reveal_key)
    }

    pub fn commitment_key_hex(&self) -> String {
        hex::encode(self.commitment_key)
    }
}
