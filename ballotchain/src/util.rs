use rand::RngCore;

/// Strip an optional `0x` prefix from a hex string
pub fn trim_hex(input: &str) -> &str {
    input.strip_prefix("0x").unwrap_or(input)
}

/// A random hex string encoding `n` bytes, used for transaction nonces
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 32 random bytes from the OS RNG
pub fn random_bytes32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
