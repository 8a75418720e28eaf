use crate::census::CensusProof;
use crate::hash::keccak256;
use crate::process::ProcessId;
use crate::serde_hex::Hex as _;
use crate::signer::Address;
use crate::Error;
use serde::{Deserialize, Serialize};

/// Deterministic per-voter per-process identifier preventing double voting
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nullifier(pub [u8; 32]);

crate::impl_hex_bytes!(Nullifier, 32, "a 32-byte nullifier as hex");

/// For non-anonymous modes the nullifier binds the signer address to the
/// process: `keccak256(address ‖ processId)`
pub fn nullifier(address: &Address, process_id: &ProcessId) -> Nullifier {
    let mut input = [0u8; 52];
    input[..20].copy_from_slice(address.as_bytes());
    input[20..].copy_from_slice(process_id.as_bytes());
    Nullifier(keccak256(&input))
}

/// A vote submission as it travels in a transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteTx {
    pub process_id: ProcessId,
    pub nonce: String,
    pub proof: CensusProof,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub vote_package: Vec<u8>,
    /// Key-keeper indexes used to layer-encrypt the package, in the order
    /// they were applied. Empty for plaintext processes.
    #[serde(default)]
    pub encryption_key_indexes: Vec<u8>,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub signature: Vec<u8>,
}

impl crate::transaction::Signable for VoteTx {
    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

/// A committed vote, stored in the vote tree under `processId ‖ nullifier`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteEnvelope {
    pub process_id: ProcessId,
    pub nullifier: Nullifier,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub vote_package: Vec<u8>,
    #[serde(default)]
    pub encryption_key_indexes: Vec<u8>,
    pub proof: CensusProof,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub signature: Vec<u8>,
}

impl VoteEnvelope {
    /// The vote tree key for this envelope
    pub fn tree_key(&self) -> Vec<u8> {
        envelope_key(&self.process_id, &self.nullifier)
    }
}

pub fn envelope_key(process_id: &ProcessId, nullifier: &Nullifier) -> Vec<u8> {
    let mut key = Vec::with_capacity(ProcessId::LEN + Nullifier::LEN);
    key.extend_from_slice(process_id.as_bytes());
    key.extend_from_slice(nullifier.as_bytes());
    key
}

/// The plaintext content of a vote package: one selected option per
/// question, directly mapped to the process metadata questions
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VotePackage {
    #[serde(default)]
    pub nonce: String,
    #[serde(rename = "type", default)]
    pub package_type: String,
    pub votes: Vec<u32>,
}

impl VotePackage {
    pub fn new(votes: Vec<u32>) -> Self {
        VotePackage {
            nonce: crate::util::random_hex(16),
            package_type: "poll-vote".to_string(),
            votes,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(raw)?)
    }
}
