//! Core types and cryptography for the ballotchain voting blockchain:
//! ECDSA identities, the canonical transaction encoding, process and vote
//! envelope data structures, census membership proofs, deterministic
//! key-keeper key derivation and the layered envelope encryption.

pub mod admin;
pub mod census;
pub mod ecies;
pub mod error;
pub mod hash;
pub mod keys;
pub mod process;
pub mod serde_hex;
pub mod signer;
pub mod transaction;
pub mod util;
pub mod vote;

pub use admin::{AdminTx, AdminTxType};
pub use census::{CensusProof, CensusTree};
pub use error::{Error, ErrorKind, ValidationError};
pub use hash::{hash_poseidon, keccak256, keccak256_prefixed};
pub use keys::{ProcessKeys, PROCESS_KEYS_LENGTH};
pub use process::{
    CancelProcessTx, EntityId, EnvelopeType, NewProcessTx, Process, ProcessId, ProcessMode,
    ProcessStatus, MAX_KEY_INDEX,
};
pub use signer::{
    recover_address, recover_address_prefixed, verify_address, Address, Signer,
    SIGNATURE_LENGTH,
};
pub use transaction::{Signable, Transaction, TransactionType};
pub use vote::{envelope_key, nullifier, Nullifier, VoteEnvelope, VotePackage, VoteTx};
