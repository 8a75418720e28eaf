use crate::Error;
use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher};
use sha3::{Digest, Keccak256};

/// The prefix prepended to operator authorization messages before hashing.
/// On-chain transactions are signed over their canonical encoding directly
/// and never use this prefix.
pub const SIGNING_PREFIX: &str = "\u{19}Ethereum Signed Message:\n";

/// keccak256 of the raw input
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// keccak256 of the input with the operator signing prefix and the decimal
/// input length prepended
pub fn keccak256_prefixed(data: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(SIGNING_PREFIX.len() + 20 + data.len());
    buf.extend_from_slice(SIGNING_PREFIX.as_bytes());
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(data);
    keccak256(&buf)
}

/// Poseidon hash over BN254 of the input viewed as a big-endian field
/// element (reduced modulo the field order). Byte-for-byte deterministic
/// across platforms; the key commitment chain depends on it.
pub fn hash_poseidon(input: &[u8]) -> Result<[u8; 32], Error> {
    let mut hasher =
        Poseidon::<Fr>::new_circom(1).map_err(|e| Error::Poseidon(e.to_string()))?;
    hasher
        .hash_bytes_be(&[input])
        .map_err(|e| Error::Poseidon(e.to_string()))
}
