use crate::admin::AdminTx;
use crate::process::{CancelProcessTx, NewProcessTx};
use crate::signer::{recover_address, Address, Signer};
use crate::vote::VoteTx;
use crate::{Error, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction body that is signed over its canonical CBOR encoding with
/// the signature field zeroed. This encoding is the wire format; signatures
/// never cover a JSON rendering.
pub trait Signable: Clone + Serialize {
    fn signature(&self) -> &[u8];
    fn set_signature(&mut self, signature: Vec<u8>);

    /// The canonical bytes the signature is computed over
    fn signing_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut cleared = self.clone();
        cleared.set_signature(vec![]);
        Ok(serde_cbor::to_vec(&cleared)?)
    }

    fn sign(&mut self, signer: &Signer) -> Result<(), Error> {
        let bytes = self.signing_bytes()?;
        let signature = signer.sign(&bytes)?;
        self.set_signature(signature.to_vec());
        Ok(())
    }

    fn recover_signer(&self) -> Result<Address, ValidationError> {
        let bytes = self
            .signing_bytes()
            .map_err(|_| ValidationError::SignatureRecovery)?;
        recover_address(&bytes, self.signature())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Vote,
    NewProcess,
    CancelProcess,
    Admin,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Vote => "vote",
            TransactionType::NewProcess => "new_process",
            TransactionType::CancelProcess => "cancel_process",
            TransactionType::Admin => "admin",
        };
        write!(f, "{name}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transaction {
    Vote(VoteTx),
    NewProcess(NewProcessTx),
    CancelProcess(CancelProcessTx),
    Admin(AdminTx),
}

impl Transaction {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Transaction::Vote(_) => TransactionType::Vote,
            Transaction::NewProcess(_) => TransactionType::NewProcess,
            Transaction::CancelProcess(_) => TransactionType::CancelProcess,
            Transaction::Admin(_) => TransactionType::Admin,
        }
    }

    /// Canonical binary encoding, used on the wire and for the mempool hash
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn unpack(packed: &[u8]) -> Result<Self, Error> {
        Ok(serde_cbor::from_slice(packed)?)
    }

    pub fn signature(&self) -> &[u8] {
        match self {
            Transaction::Vote(tx) => &tx.signature,
            Transaction::NewProcess(tx) => &tx.signature,
            Transaction::CancelProcess(tx) => &tx.signature,
            Transaction::Admin(tx) => &tx.signature,
        }
    }

    pub fn recover_signer(&self) -> Result<Address, ValidationError> {
        match self {
            Transaction::Vote(tx) => tx.recover_signer(),
            Transaction::NewProcess(tx) => tx.recover_signer(),
            Transaction::CancelProcess(tx) => tx.recover_signer(),
            Transaction::Admin(tx) => tx.recover_signer(),
        }
    }
}
