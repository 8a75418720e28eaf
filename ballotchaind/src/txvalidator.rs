//! Pure transaction validation: raw bytes plus a state snapshot in, a
//! typed effect (or a typed error) out. Nothing here performs I/O beyond
//! reading the state snapshot.

use crate::genesis::Validator;
use crate::state::State;
use ballotchain::{
    hash_poseidon, nullifier, Address, AdminTx, AdminTxType, CancelProcessTx, Error,
    NewProcessTx, Process, ProcessId, ProcessStatus, Signable, Transaction, ValidationError,
    VoteEnvelope, VoteTx, MAX_KEY_INDEX,
};

/// The state mutation a valid transaction performs
#[derive(Debug, Clone)]
pub enum TxEffect {
    AddVote(VoteEnvelope),
    AddProcess(Process),
    CancelProcess(ProcessId),
    AddProcessKeys {
        process_id: ProcessId,
        index: u8,
        public_key: String,
        commitment_key: String,
    },
    RevealProcessKeys {
        process_id: ProcessId,
        index: u8,
        private_key: String,
        reveal_key: String,
    },
    AddOracle(Address),
    RemoveOracle(Address),
    AddValidator(Validator),
    RemoveValidator(Address),
}

fn state_err(err: Error) -> ValidationError {
    match err {
        Error::Validation(inner) => inner,
        other => ValidationError::Storage(other.to_string()),
    }
}

pub fn decode_tx(raw: &[u8]) -> Result<Transaction, ValidationError> {
    Transaction::unpack(raw).map_err(|e| ValidationError::MalformedTx(e.to_string()))
}

/// Validate a decoded transaction against a state snapshot
pub fn check_tx(tx: &Transaction, state: &State) -> Result<TxEffect, ValidationError> {
    match tx {
        Transaction::Vote(tx) => check_vote(tx, state),
        Transaction::NewProcess(tx) => check_new_process(tx, state),
        Transaction::CancelProcess(tx) => check_cancel_process(tx, state),
        Transaction::Admin(tx) => check_admin(tx, state),
    }
}

/// Decode and validate without applying (the mempool path)
pub fn validate_tx(raw: &[u8], state: &State) -> Result<Transaction, ValidationError> {
    let tx = decode_tx(raw)?;
    check_tx(&tx, state)?;
    Ok(tx)
}

/// Decode, validate and apply the effect to the staging layer (the
/// deliver path)
pub fn validate_and_apply(raw: &[u8], state: &State) -> Result<Transaction, ValidationError> {
    let tx = decode_tx(raw)?;
    let effect = check_tx(&tx, state)?;
    apply_effect(effect, state)?;
    Ok(tx)
}

pub fn apply_effect(effect: TxEffect, state: &State) -> Result<(), ValidationError> {
    match effect {
        TxEffect::AddVote(envelope) => state.add_vote(envelope),
        TxEffect::AddProcess(process) => state.add_process(process),
        TxEffect::CancelProcess(pid) => state.cancel_process(&pid),
        TxEffect::AddProcessKeys {
            process_id,
            index,
            public_key,
            commitment_key,
        } => state.add_process_keys(&process_id, index, &public_key, &commitment_key),
        TxEffect::RevealProcessKeys {
            process_id,
            index,
            private_key,
            reveal_key,
        } => state.reveal_process_keys(&process_id, index, &private_key, &reveal_key),
        TxEffect::AddOracle(address) => state.add_oracle(address),
        TxEffect::RemoveOracle(address) => state.remove_oracle(&address),
        TxEffect::AddValidator(validator) => state.add_validator(validator),
        TxEffect::RemoveValidator(address) => state.remove_validator(&address),
    }
    .map_err(state_err)
}

fn require_oracle(state: &State, signer: &Address) -> Result<(), ValidationError> {
    let oracles = state.oracles(false).map_err(state_err)?;
    if !oracles.contains(signer) {
        return Err(ValidationError::NotOracle(signer.to_hex()));
    }
    Ok(())
}

fn check_vote(tx: &VoteTx, state: &State) -> Result<TxEffect, ValidationError> {
    // 1. the signature must recover to an address
    let signer = tx.recover_signer()?;

    // 2. the process must exist, be open and within its voting window
    let process = state
        .process(&tx.process_id, false)
        .map_err(state_err)?
        .ok_or_else(|| ValidationError::ProcessNotFound(tx.process_id.to_hex()))?;
    if process.status != ProcessStatus::Ready {
        return Err(ValidationError::ProcessNotReady(tx.process_id.to_hex()));
    }
    let height = state.height(false).map_err(state_err)?;
    if height < process.start_block || height >= process.end_block() {
        return Err(ValidationError::VoteOutsideWindow(height));
    }

    // 3. the nullifier is bound to the signer and must be unused
    let nullifier = nullifier(&signer, &tx.process_id);
    if state
        .envelope(&tx.process_id, &nullifier, false)
        .map_err(state_err)?
        .is_some()
    {
        return Err(ValidationError::EnvelopeAlreadyExists);
    }

    // 4. the census proof must belong to the signer and verify against the
    // frozen census root
    if tx.proof.key != signer.as_bytes() || !tx.proof.verify(&process.census_root) {
        return Err(ValidationError::CensusProofInvalid);
    }

    // 5. encrypted processes must reference published key slots
    if process.is_encrypted() {
        if tx.encryption_key_indexes.is_empty() {
            return Err(ValidationError::NoEncryptionKeyIndexes);
        }
        for &index in &tx.encryption_key_indexes {
            if index == 0 || index >= MAX_KEY_INDEX {
                return Err(ValidationError::KeyIndexOutOfRange(index));
            }
            if !process.key_published(index) {
                return Err(ValidationError::EncryptionKeyNotPublished(index));
            }
        }
    }

    Ok(TxEffect::AddVote(VoteEnvelope {
        process_id: tx.process_id,
        nullifier,
        vote_package: tx.vote_package.clone(),
        encryption_key_indexes: tx.encryption_key_indexes.clone(),
        proof: tx.proof.clone(),
        signature: tx.signature.clone(),
    }))
}

fn check_new_process(tx: &NewProcessTx, state: &State) -> Result<TxEffect, ValidationError> {
    let signer = tx.recover_signer()?;
    require_oracle(state, &signer)?;

    if state
        .process(&tx.process_id, false)
        .map_err(state_err)?
        .is_some()
    {
        return Err(ValidationError::ProcessAlreadyExists(tx.process_id.to_hex()));
    }
    if tx.start_block < 0 || tx.number_of_blocks <= 0 {
        return Err(ValidationError::BadProcessHeights);
    }

    Ok(TxEffect::AddProcess(tx.clone().into_process()))
}

fn check_cancel_process(
    tx: &CancelProcessTx,
    state: &State,
) -> Result<TxEffect, ValidationError> {
    let signer = tx.recover_signer()?;
    require_oracle(state, &signer)?;

    let process = state
        .process(&tx.process_id, false)
        .map_err(state_err)?
        .ok_or_else(|| ValidationError::ProcessNotFound(tx.process_id.to_hex()))?;
    if process.status.is_final() {
        return Err(ValidationError::ProcessAlreadyFinal(tx.process_id.to_hex()));
    }

    Ok(TxEffect::CancelProcess(tx.process_id))
}

fn check_admin(tx: &AdminTx, state: &State) -> Result<TxEffect, ValidationError> {
    let signer = tx.recover_signer()?;
    match tx.tx_type {
        AdminTxType::AddProcessKeys => check_add_process_keys(tx, state, &signer),
        AdminTxType::RevealProcessKeys => check_reveal_process_keys(tx, state),
        AdminTxType::AddOracle => {
            require_oracle(state, &signer)?;
            let address = require_address(tx)?;
            if state.oracles(false).map_err(state_err)?.contains(&address) {
                return Err(ValidationError::OracleAlreadyExists(address.to_hex()));
            }
            Ok(TxEffect::AddOracle(address))
        }
        AdminTxType::RemoveOracle => {
            require_oracle(state, &signer)?;
            let address = require_address(tx)?;
            if !state.oracles(false).map_err(state_err)?.contains(&address) {
                return Err(ValidationError::OracleNotFound(address.to_hex()));
            }
            Ok(TxEffect::RemoveOracle(address))
        }
        AdminTxType::AddValidator => {
            require_oracle(state, &signer)?;
            let address = require_address(tx)?;
            let validators = state.validators(false).map_err(state_err)?;
            if validators.iter().any(|v| v.address == address) {
                return Err(ValidationError::ValidatorAlreadyExists(address.to_hex()));
            }
            Ok(TxEffect::AddValidator(Validator {
                address,
                public_key: tx.public_key.clone(),
                power: tx.power,
                key_index: tx.validator_key_index,
            }))
        }
        AdminTxType::RemoveValidator => {
            require_oracle(state, &signer)?;
            let address = require_address(tx)?;
            let validators = state.validators(false).map_err(state_err)?;
            if !validators.iter().any(|v| v.address == address) {
                return Err(ValidationError::ValidatorNotFound(address.to_hex()));
            }
            Ok(TxEffect::RemoveValidator(address))
        }
    }
}

fn require_address(tx: &AdminTx) -> Result<Address, ValidationError> {
    tx.address
        .ok_or_else(|| ValidationError::MalformedTx("admin tx without address".to_string()))
}

fn require_process_id(tx: &AdminTx) -> Result<ProcessId, ValidationError> {
    tx.process_id
        .ok_or_else(|| ValidationError::MalformedTx("admin tx without process id".to_string()))
}

fn require_key_index(index: u8) -> Result<(), ValidationError> {
    if index == 0 || index >= MAX_KEY_INDEX {
        return Err(ValidationError::KeyIndexOutOfRange(index));
    }
    Ok(())
}

fn check_add_process_keys(
    tx: &AdminTx,
    state: &State,
    signer: &Address,
) -> Result<TxEffect, ValidationError> {
    let pid = require_process_id(tx)?;
    require_key_index(tx.key_index)?;

    // only the validator assigned to this keeper slot may publish into it
    let validators = state.validators(false).map_err(state_err)?;
    let authorized = validators
        .iter()
        .any(|v| v.address == *signer && v.key_index == Some(tx.key_index));
    if !authorized {
        return Err(ValidationError::NotKeeperValidator(tx.key_index));
    }

    let process = state
        .process(&pid, false)
        .map_err(state_err)?
        .ok_or_else(|| ValidationError::ProcessNotFound(pid.to_hex()))?;
    if process.key_published(tx.key_index) {
        return Err(ValidationError::KeySlotTaken(tx.key_index));
    }
    if tx.encryption_public_key.is_empty() || tx.commitment_key.is_empty() {
        return Err(ValidationError::MalformedTx(
            "add process keys without key material".to_string(),
        ));
    }

    Ok(TxEffect::AddProcessKeys {
        process_id: pid,
        index: tx.key_index,
        public_key: tx.encryption_public_key.clone(),
        commitment_key: tx.commitment_key.clone(),
    })
}

fn check_reveal_process_keys(tx: &AdminTx, state: &State) -> Result<TxEffect, ValidationError> {
    let pid = require_process_id(tx)?;
    require_key_index(tx.key_index)?;

    let process = state
        .process(&pid, false)
        .map_err(state_err)?
        .ok_or_else(|| ValidationError::ProcessNotFound(pid.to_hex()))?;

    // keys may only surface once voting can no longer happen
    let height = state.height(false).map_err(state_err)?;
    if process.status != ProcessStatus::Canceled && height < process.end_block() {
        return Err(ValidationError::RevealTooEarly);
    }
    if process.key_revealed(tx.key_index) {
        return Err(ValidationError::KeySlotTaken(tx.key_index));
    }
    if !process.key_published(tx.key_index) {
        return Err(ValidationError::KeySlotEmpty(tx.key_index));
    }

    // the reveal must close the commitment chain published earlier:
    // commitment = Poseidon(reveal) and reveal = Poseidon(private)
    let private_key = decode_key(&tx.encryption_private_key)?;
    let reveal_key = decode_key(&tx.reveal_key)?;
    let expected_reveal =
        hash_poseidon(&private_key).map_err(|e| ValidationError::Hash(e.to_string()))?;
    if expected_reveal[..] != reveal_key[..] {
        return Err(ValidationError::RevealMismatch);
    }
    let expected_commitment =
        hash_poseidon(&reveal_key).map_err(|e| ValidationError::Hash(e.to_string()))?;
    if process.commitment_keys[tx.key_index as usize] != hex::encode(expected_commitment) {
        return Err(ValidationError::CommitmentMismatch);
    }

    Ok(TxEffect::RevealProcessKeys {
        process_id: pid,
        index: tx.key_index,
        private_key: tx.encryption_private_key.clone(),
        reveal_key: tx.reveal_key.clone(),
    })
}

fn decode_key(input: &str) -> Result<Vec<u8>, ValidationError> {
    if input.is_empty() {
        return Err(ValidationError::MalformedTx(
            "reveal tx without key material".to_string(),
        ));
    }
    hex::decode(input).map_err(|e| ValidationError::MalformedTx(e.to_string()))
}
