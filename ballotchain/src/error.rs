use thiserror::Error;

/// Broad failure categories, used for reporting transaction results and for
/// deciding whether an error is fatal to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed transaction bytes
    Decode,
    /// Bad signature or unauthorized signer
    Auth,
    /// Entity missing, wrong status or already exists
    State,
    /// An invariant would be violated (e.g. commitment mismatch)
    Constraint,
    /// Census membership proof invalid
    Census,
    /// Outside the process start/end window
    Timing,
    /// Persistence I/O failure, fatal
    Storage,
    /// Hash or decryption failure
    Crypto,
}

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotchain: signature error: {0}")]
    Signature(#[from] k256::ecdsa::Error),

    #[error("ballotchain: invalid hexadecimal: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("ballotchain: wrong byte length for {0}")]
    BadLength(&'static str),

    #[error("ballotchain: CBOR error serializing or deserializing: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("ballotchain: JSON error serializing or deserializing: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ballotchain: poseidon hash failure: {0}")]
    Poseidon(String),

    #[error("ballotchain: decryption failed")]
    DecryptionFailed,

    #[error("ballotchain: encryption failed")]
    EncryptionFailed,

    #[error("ballotchain: storage error: {0}")]
    Storage(String),

    #[error("ballotchain: key material missing for process {0}")]
    MissingKeyMaterial(String),

    #[error("ballotchain: transaction send failed: {0}")]
    SendTx(String),

    #[error("ballotchain: no results yet")]
    NoResultsYet,

    #[error("ballotchain: results for process {0} already computed")]
    ResultsAlreadyComputed(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),
}

/// Transaction validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("ballotchain validation: cannot decode transaction: {0}")]
    MalformedTx(String),

    #[error("ballotchain validation: cannot recover signer from signature")]
    SignatureRecovery,

    #[error("ballotchain validation: bad signature recovery byte {0}")]
    BadRecoveryByte(u8),

    #[error("ballotchain validation: signer {0} is not an oracle")]
    NotOracle(String),

    #[error("ballotchain validation: signer is not the validator for key index {0}")]
    NotKeeperValidator(u8),

    #[error("ballotchain validation: process {0} not found")]
    ProcessNotFound(String),

    #[error("ballotchain validation: process {0} already exists")]
    ProcessAlreadyExists(String),

    #[error("ballotchain validation: process {0} is not open for voting")]
    ProcessNotReady(String),

    #[error("ballotchain validation: process {0} already canceled or ended")]
    ProcessAlreadyFinal(String),

    #[error("ballotchain validation: envelope already cast for this nullifier")]
    EnvelopeAlreadyExists,

    #[error("ballotchain validation: vote outside process window at height {0}")]
    VoteOutsideWindow(i64),

    #[error("ballotchain validation: keys cannot be revealed before the process ends")]
    RevealTooEarly,

    #[error("ballotchain validation: census proof does not verify")]
    CensusProofInvalid,

    #[error("ballotchain validation: key index {0} out of range")]
    KeyIndexOutOfRange(u8),

    #[error("ballotchain validation: key slot {0} already filled")]
    KeySlotTaken(u8),

    #[error("ballotchain validation: key slot {0} was never published")]
    KeySlotEmpty(u8),

    #[error("ballotchain validation: no encryption key indexes provided")]
    NoEncryptionKeyIndexes,

    #[error("ballotchain validation: encryption key {0} not published for process")]
    EncryptionKeyNotPublished(u8),

    #[error("ballotchain validation: commitment key does not match reveal key")]
    CommitmentMismatch,

    #[error("ballotchain validation: reveal key does not match private key")]
    RevealMismatch,

    #[error("ballotchain validation: process heights are not sane")]
    BadProcessHeights,

    #[error("ballotchain validation: oracle {0} already exists")]
    OracleAlreadyExists(String),

    #[error("ballotchain validation: oracle {0} not found")]
    OracleNotFound(String),

    #[error("ballotchain validation: validator {0} already exists")]
    ValidatorAlreadyExists(String),

    #[error("ballotchain validation: validator {0} not found")]
    ValidatorNotFound(String),

    #[error("ballotchain validation: poseidon hash failure: {0}")]
    Hash(String),

    #[error("ballotchain validation: storage error: {0}")]
    Storage(String),
}

impl ValidationError {
    /// Map every variant onto its failure category. Everything except
    /// `Storage` is non-fatal and is reported per-tx in the block results.
    pub fn kind(&self) -> ErrorKind {
        use ValidationError::*;
        match self {
            MalformedTx(_) => ErrorKind::Decode,
            SignatureRecovery | BadRecoveryByte(_) | NotOracle(_) | NotKeeperValidator(_) => {
                ErrorKind::Auth
            }
            ProcessNotFound(_)
            | ProcessAlreadyExists(_)
            | ProcessNotReady(_)
            | ProcessAlreadyFinal(_)
            | EnvelopeAlreadyExists
            | OracleAlreadyExists(_)
            | OracleNotFound(_)
            | ValidatorAlreadyExists(_)
            | ValidatorNotFound(_) => ErrorKind::State,
            VoteOutsideWindow(_) | RevealTooEarly => ErrorKind::Timing,
            CensusProofInvalid => ErrorKind::Census,
            KeySlotTaken(_)
            | KeySlotEmpty(_)
            | KeyIndexOutOfRange(_)
            | NoEncryptionKeyIndexes
            | EncryptionKeyNotPublished(_)
            | CommitmentMismatch
            | RevealMismatch
            | BadProcessHeights => ErrorKind::Constraint,
            Hash(_) => ErrorKind::Crypto,
            Storage(_) => ErrorKind::Storage,
        }
    }
}
