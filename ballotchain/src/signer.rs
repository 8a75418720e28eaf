use crate::hash::{keccak256, keccak256_prefixed};
use crate::{Error, ValidationError};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

/// Length of a serialized ECDSA signature: `r ‖ s ‖ v`
pub const SIGNATURE_LENGTH: usize = 65;

/// An Ethereum-style address, the last 20 bytes of the keccak256 of the
/// uncompressed public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

crate::impl_hex_bytes!(Address, 20, "a 20-byte address as hex");

/// ECDSA identity over secp256k1. Signs and verifies raw byte messages and
/// recovers the signer address from a signature.
///
/// Two signing modes exist: `sign` hashes the message with keccak256
/// directly and is what every on-chain transaction uses; `sign_message`
/// prepends the Ethereum signing prefix and is reserved for operator
/// authorization messages on the gateway surface.
#[derive(Clone)]
pub struct Signer {
    secret: SigningKey,
}

impl Signer {
    /// Generate a new random identity
    pub fn random() -> Self {
        loop {
            if let Ok(secret) = SigningKey::from_slice(&crate::util::random_bytes32()) {
                return Signer { secret };
            }
        }
    }

    /// Import a private key from a hex string
    pub fn from_hex(input: &str) -> Result<Self, Error> {
        let bytes = hex::decode(crate::util::trim_hex(input))?;
        let secret = SigningKey::from_slice(&bytes)?;
        Ok(Signer { secret })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// The raw private scalar, used as input for deterministic process-key
    /// derivation
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.secret.to_bytes().as_slice());
        out
    }

    /// The compressed public key
    pub fn public_key(&self) -> Vec<u8> {
        self.secret
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    pub fn address(&self) -> Address {
        address_from_key(self.secret.verifying_key())
    }

    /// Sign the keccak256 digest of `message`. Returns `r ‖ s ‖ v` with
    /// `v ∈ {0, 1}`.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], Error> {
        self.sign_digest(keccak256(message))
    }

    /// Sign a message with the Ethereum signing prefix. Used for operator
    /// authorization only, never for transactions.
    pub fn sign_message(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], Error> {
        self.sign_digest(keccak256_prefixed(message))
    }

    fn sign_digest(&self, digest: [u8; 32]) -> Result<[u8; SIGNATURE_LENGTH], Error> {
        let (signature, recovery) = self.secret.sign_prehash_recoverable(&digest)?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(signature.to_bytes().as_slice());
        out[64] = recovery.to_byte();
        Ok(out)
    }
}

fn address_from_key(key: &VerifyingKey) -> Address {
    let uncompressed = key.to_encoded_point(false);
    // skip the 0x04 SEC1 tag byte
    let digest = keccak256(&uncompressed.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address(addr)
}

/// Recover the address that signed `message` (keccak256, no prefix).
/// The recovery byte accepts {0, 1, 27, 28}; anything else is rejected.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address, ValidationError> {
    recover_from_digest(keccak256(message), signature)
}

/// Recover the address from an Ethereum-prefixed operator signature
pub fn recover_address_prefixed(
    message: &[u8],
    signature: &[u8],
) -> Result<Address, ValidationError> {
    recover_from_digest(keccak256_prefixed(message), signature)
}

fn recover_from_digest(
    digest: [u8; 32],
    signature: &[u8],
) -> Result<Address, ValidationError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(ValidationError::SignatureRecovery);
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => return Err(ValidationError::BadRecoveryByte(v)),
    };
    let recovery =
        RecoveryId::from_byte(v).ok_or(ValidationError::BadRecoveryByte(signature[64]))?;
    let signature = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|_| ValidationError::SignatureRecovery)?;
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery)
        .map_err(|_| ValidationError::SignatureRecovery)?;
    Ok(address_from_key(&key))
}

/// Verify that `message` was signed by `expected`
pub fn verify_address(
    message: &[u8],
    signature: &[u8],
    expected: &Address,
) -> Result<(), ValidationError> {
    let recovered = recover_address(message, signature)?;
    if recovered != *expected {
        return Err(ValidationError::SignatureRecovery);
    }
    Ok(())
}
