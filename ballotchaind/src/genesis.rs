use ballotchain::Address;
use serde::{Deserialize, Serialize};

/// A consensus validator. The address is the ECDSA address of the node's
/// transaction signer; the public key is the ed25519 consensus key the
/// engine knows the validator by. Validators running a key keeper carry
/// the keeper slot they are authorized to fill.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub address: Address,
    /// ed25519 consensus public key, hex
    pub public_key: String,
    pub power: u64,
    pub key_index: Option<u8>,
}

/// The application side of the genesis document, consumed once by
/// `init_chain`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GenesisAppState {
    pub chain_id: String,
    pub validators: Vec<Validator>,
    pub oracles: Vec<Address>,
}

impl GenesisAppState {
    pub fn from_json(raw: &[u8]) -> Result<Self, ballotchain::Error> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ballotchain::Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_round_trip() {
        let genesis = GenesisAppState {
            chain_id: "ballotchain-test".into(),
            validators: vec![Validator {
                address: Address::from([1u8; 20]),
                public_key: hex::encode([2u8; 32]),
                power: 10,
                key_index: Some(1),
            }],
            oracles: vec![Address::from([3u8; 20])],
        };
        let raw = genesis.to_json().unwrap();
        let restored = GenesisAppState::from_json(&raw).unwrap();
        assert_eq!(restored.validators, genesis.validators);
        assert_eq!(restored.oracles, genesis.oracles);
        assert_eq!(restored.chain_id, "ballotchain-test");
    }
}
