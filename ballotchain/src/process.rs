use crate::serde_hex::{Bytes32Hex, Hex as _};
use serde::{Deserialize, Serialize};

/// Number of key-keeper slots per process. Slot 0 is reserved; usable
/// keeper indexes are `1..MAX_KEY_INDEX`.
pub const MAX_KEY_INDEX: u8 = 16;

/// Identifies a voting process
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub [u8; 32]);

crate::impl_hex_bytes!(ProcessId, 32, "a 32-byte process id as hex");

/// The entity (organization) a process belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub [u8; 20]);

crate::impl_hex_bytes!(EntityId, 20, "a 20-byte entity id as hex");

/// Lifecycle status of a process. Canceled and Ended are terminal with
/// respect to voting; Results marks that every published key has been
/// revealed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Ready,
    Paused,
    Canceled,
    Ended,
    Results,
}

impl ProcessStatus {
    /// Once a process is canceled or ended it can never go back to a
    /// vote-accepting state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Canceled | ProcessStatus::Ended | ProcessStatus::Results
        )
    }
}

/// Envelope type flags, frozen at process creation
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeType {
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub encrypted_votes: bool,
    #[serde(default)]
    pub serial: bool,
    #[serde(default)]
    pub unique_values: bool,
}

/// Process mode flags
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessMode {
    #[serde(default)]
    pub interruptible: bool,
    #[serde(default)]
    pub dynamic_census: bool,
    #[serde(default)]
    pub auto_start: bool,
}

/// A voting process: a fixed census and a window of block heights, plus
/// the key-keeper slots filled while it runs.
///
/// The four key vectors always hold `MAX_KEY_INDEX` hex strings; an empty
/// string means the slot is unset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub process_id: ProcessId,
    pub entity_id: EntityId,
    #[serde(with = "Bytes32Hex")]
    pub census_root: [u8; 32],
    pub census_uri: Option<String>,
    pub start_block: i64,
    pub number_of_blocks: i64,
    pub status: ProcessStatus,
    pub envelope_type: EnvelopeType,
    pub mode: ProcessMode,
    pub encryption_public_keys: Vec<String>,
    pub commitment_keys: Vec<String>,
    pub encryption_private_keys: Vec<String>,
    pub reveal_keys: Vec<String>,
}

impl Process {
    pub fn end_block(&self) -> i64 {
        self.start_block + self.number_of_blocks
    }

    /// Whether key keepers must publish encryption keys for this process
    pub fn requires_keys(&self) -> bool {
        self.envelope_type.encrypted_votes || self.envelope_type.anonymous
    }

    pub fn is_encrypted(&self) -> bool {
        self.envelope_type.encrypted_votes
    }

    /// A process can keep a live tally only if its envelopes are plaintext
    /// and not anonymous
    pub fn is_live_tally(&self) -> bool {
        !self.envelope_type.encrypted_votes && !self.envelope_type.anonymous
    }

    pub fn key_published(&self, index: u8) -> bool {
        self.encryption_public_keys
            .get(index as usize)
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }

    pub fn key_revealed(&self, index: u8) -> bool {
        self.encryption_private_keys
            .get(index as usize)
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }

    /// True when every published slot also has its private key revealed
    /// (and at least one slot was published)
    pub fn all_keys_revealed(&self) -> bool {
        let mut published = 0;
        for index in 1..MAX_KEY_INDEX {
            if self.key_published(index) {
                published += 1;
                if !self.key_revealed(index) {
                    return false;
                }
            }
        }
        published > 0
    }
}

fn empty_key_slots() -> Vec<String> {
    vec![String::new(); MAX_KEY_INDEX as usize]
}

/// Transaction creating a new process. Only oracles may post it, mirroring
/// the anchor-chain process registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewProcessTx {
    pub process_id: ProcessId,
    pub entity_id: EntityId,
    #[serde(with = "Bytes32Hex")]
    pub census_root: [u8; 32],
    pub census_uri: Option<String>,
    pub start_block: i64,
    pub number_of_blocks: i64,
    #[serde(default)]
    pub envelope_type: EnvelopeType,
    #[serde(default)]
    pub mode: ProcessMode,
    pub nonce: String,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub signature: Vec<u8>,
}

impl NewProcessTx {
    /// Build the state entry this transaction creates
    pub fn into_process(self) -> Process {
        Process {
            process_id: self.process_id,
            entity_id: self.entity_id,
            census_root: self.census_root,
            census_uri: self.census_uri,
            start_block: self.start_block,
            number_of_blocks: self.number_of_blocks,
            status: ProcessStatus::Ready,
            envelope_type: self.envelope_type,
            mode: self.mode,
            encryption_public_keys: empty_key_slots(),
            commitment_keys: empty_key_slots(),
            encryption_private_keys: empty_key_slots(),
            reveal_keys: empty_key_slots(),
        }
    }
}

/// Transaction canceling a process before its natural end
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CancelProcessTx {
    pub process_id: ProcessId,
    pub nonce: String,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub signature: Vec<u8>,
}

impl crate::transaction::Signable for NewProcessTx {
    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

impl crate::transaction::Signable for CancelProcessTx {
    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_process() -> Process {
        NewProcessTx {
            process_id: ProcessId::from([1u8; 32]),
            entity_id: EntityId::from([2u8; 20]),
            census_root: [3u8; 32],
            census_uri: Some("ipfs://bafy".into()),
            start_block: 0,
            number_of_blocks: 10,
            envelope_type: EnvelopeType {
                encrypted_votes: true,
                ..Default::default()
            },
            mode: ProcessMode::default(),
            nonce: crate::util::random_hex(32),
            signature: vec![],
        }
        .into_process()
    }

    #[test]
    fn new_process_starts_ready_with_empty_slots() {
        let process = sample_process();
        assert_eq!(process.status, ProcessStatus::Ready);
        assert_eq!(process.encryption_public_keys.len(), MAX_KEY_INDEX as usize);
        assert!(process.encryption_public_keys.iter().all(String::is_empty));
        assert!(process.requires_keys());
        assert!(!process.is_live_tally());
        assert_eq!(process.end_block(), 10);
    }

    #[test]
    fn revealed_accounting() {
        let mut process = sample_process();
        assert!(!process.all_keys_revealed());

        process.encryption_public_keys[1] = "aa".into();
        process.commitment_keys[1] = "bb".into();
        assert!(process.key_published(1));
        assert!(!process.all_keys_revealed());

        process.encryption_private_keys[1] = "cc".into();
        process.reveal_keys[1] = "dd".into();
        assert!(process.all_keys_revealed());
    }

    #[test]
    fn serde_round_trip_is_lossless() {
        let process = sample_process();
        let packed = serde_cbor::to_vec(&process).unwrap();
        let restored: Process = serde_cbor::from_slice(&packed).unwrap();
        assert_eq!(process, restored);

        let json = serde_json::to_string(&process).unwrap();
        let restored: Process = serde_json::from_str(&json).unwrap();
        assert_eq!(process, restored);
    }

    #[test]
    fn final_statuses() {
        assert!(!ProcessStatus::Ready.is_final());
        assert!(!ProcessStatus::Paused.is_final());
        assert!(ProcessStatus::Canceled.is_final());
        assert!(ProcessStatus::Ended.is_final());
        assert!(ProcessStatus::Results.is_final());
    }
}
