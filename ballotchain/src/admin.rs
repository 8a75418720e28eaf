use crate::keys::ProcessKeys;
use crate::process::ProcessId;
use crate::serde_hex::Hex as _;
use crate::signer::Address;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminTxType {
    AddProcessKeys,
    RevealProcessKeys,
    AddOracle,
    RemoveOracle,
    AddValidator,
    RemoveValidator,
}

/// A transaction only authorized addresses may post: key-keeper key
/// publication and reveal, and oracle/validator set changes.
///
/// Unused fields stay at their defaults; the validator checks the fields
/// its `tx_type` requires.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminTx {
    pub tx_type: AdminTxType,
    pub process_id: Option<ProcessId>,
    #[serde(default)]
    pub key_index: u8,
    #[serde(default)]
    pub encryption_public_key: String,
    #[serde(default)]
    pub commitment_key: String,
    #[serde(default)]
    pub encryption_private_key: String,
    #[serde(default)]
    pub reveal_key: String,
    /// Target of an oracle or validator set change
    pub address: Option<Address>,
    /// Consensus (ed25519) public key of a validator being added, hex
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub power: u64,
    /// Key-keeper slot assigned to a validator being added
    pub validator_key_index: Option<u8>,
    pub nonce: String,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub signature: Vec<u8>,
}

impl AdminTx {
    fn base(tx_type: AdminTxType) -> Self {
        AdminTx {
            tx_type,
            process_id: None,
            key_index: 0,
            encryption_public_key: String::new(),
            commitment_key: String::new(),
            encryption_private_key: String::new(),
            reveal_key: String::new(),
            address: None,
            public_key: String::new(),
            power: 0,
            validator_key_index: None,
            nonce: crate::util::random_hex(32),
            signature: vec![],
        }
    }

    /// Publish the public and commitment keys for one keeper slot
    pub fn add_process_keys(process_id: ProcessId, keys: &ProcessKeys) -> Self {
        let mut tx = Self::base(AdminTxType::AddProcessKeys);
        tx.process_id = Some(process_id);
        tx.key_index = keys.index;
        tx.encryption_public_key = keys.public_key_hex();
        tx.commitment_key = keys.commitment_key_hex();
        tx
    }

    /// Reveal the private and reveal keys for one keeper slot
    pub fn reveal_process_keys(process_id: ProcessId, keys: &ProcessKeys) -> Self {
        let mut tx = Self::base(AdminTxType::RevealProcessKeys);
        tx.process_id = Some(process_id);
        tx.key_index = keys.index;
        tx.encryption_private_key = keys.private_key_hex();
        tx.reveal_key = keys.reveal_key_hex();
        tx
    }

    pub fn add_oracle(address: Address) -> Self {
        let mut tx = Self::base(AdminTxType::AddOracle);
        tx.address = Some(address);
        tx
    }

    pub fn remove_oracle(address: Address) -> Self {
        let mut tx = Self::base(AdminTxType::RemoveOracle);
        tx.address = Some(address);
        tx
    }

    pub fn add_validator(
        address: Address,
        public_key_hex: String,
        power: u64,
        key_index: Option<u8>,
    ) -> Self {
        let mut tx = Self::base(AdminTxType::AddValidator);
        tx.address = Some(address);
        tx.public_key = public_key_hex;
        tx.power = power;
        tx.validator_key_index = key_index;
        tx
    }

    pub fn remove_validator(address: Address) -> Self {
        let mut tx = Self::base(AdminTxType::RemoveValidator);
        tx.address = Some(address);
        tx
    }
}

impl crate::transaction::Signable for AdminTx {
    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}
