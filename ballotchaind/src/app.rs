//! The consensus-engine application: the hook surface the external BFT
//! engine drives (info, init-chain, begin-block, check-tx, deliver-tx,
//! commit, query) plus the local mempool entry point in-process components
//! submit transactions through.

use crate::genesis::GenesisAppState;
use crate::state::{BlockHeader, State};
use crate::txvalidator;
use ballotchain::{keccak256, Error, ErrorKind, Nullifier, ProcessId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Handshake data for the consensus engine
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub last_block_height: i64,
    pub last_app_hash: [u8; 32],
}

/// Per-transaction result recorded in the block. A non-zero code marks a
/// failed transaction that did not mutate state.
#[derive(Debug, Clone)]
pub struct TxResult {
    pub code: u32,
    pub info: String,
}

impl TxResult {
    pub fn ok() -> Self {
        TxResult {
            code: 0,
            info: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Result of a local mempool submission
#[derive(Debug, Clone)]
pub struct SendTxResult {
    pub code: u32,
    pub data: String,
    pub hash: [u8; 32],
}

/// The mempool entry point handed to in-process components (key keeper,
/// oracle bridge)
pub trait TxSender: Send + Sync {
    fn send_tx(&self, raw: &[u8]) -> Result<SendTxResult, Error>;
}

/// A query request on the engine's query surface
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QueryRequest {
    pub method: String,
    #[serde(rename = "processId", default)]
    pub process_id: Option<String>,
    #[serde(default)]
    pub nullifier: Option<String>,
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(rename = "listSize", default)]
    pub list_size: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub code: u32,
    pub value: Vec<u8>,
    pub info: String,
}

impl QueryResponse {
    fn fail(info: impl Into<String>) -> Self {
        QueryResponse {
            code: 1,
            value: vec![],
            info: info.into(),
        }
    }

    fn ok(value: Vec<u8>) -> Self {
        QueryResponse {
            code: 0,
            value,
            info: String::new(),
        }
    }
}

/// The replicated application. The engine owns the calling discipline:
/// one `begin_block`/`deliver_tx*`/`commit` cycle at a time.
pub struct BaseApp {
    state: Arc<State>,
    mempool: Mutex<VecDeque<Vec<u8>>>,
}

impl BaseApp {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, Error> {
        let state = Arc::new(State::open(path)?);
        Ok(Arc::new(BaseApp {
            state,
            mempool: Mutex::new(VecDeque::new()),
        }))
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Handshake: the engine replays blocks from here
    pub fn info(&self) -> Result<AppInfo, Error> {
        let info = AppInfo {
            last_block_height: self.state.height(true)?,
            last_app_hash: self.state.app_hash()?,
        };
        info!(
            height = info.last_block_height,
            app_hash = %hex::encode(info.last_app_hash),
            "application handshake"
        );
        Ok(info)
    }

    /// Consume the genesis document: oracles, validators, the zero header
    pub fn init_chain(&self, genesis: &GenesisAppState) -> Result<(), Error> {
        self.state.begin_block(BlockHeader {
            chain_id: genesis.chain_id.clone(),
            height: 0,
            timestamp: 0,
        })?;
        for oracle in &genesis.oracles {
            self.state.add_oracle(*oracle)?;
        }
        for validator in &genesis.validators {
            self.state.add_validator(validator.clone())?;
        }
        self.state.commit()?;
        info!(
            oracles = genesis.oracles.len(),
            validators = genesis.validators.len(),
            "chain initialized"
        );
        Ok(())
    }

    pub fn begin_block(&self, header: BlockHeader) -> Result<(), Error> {
        self.state.begin_block(header)
    }

    /// Validate without applying; used by the engine for mempool admission
    pub fn check_tx(&self, raw: &[u8]) -> TxResult {
        match txvalidator::validate_tx(raw, &self.state) {
            Ok(_) => TxResult::ok(),
            Err(err) => TxResult {
                code: 1,
                info: err.to_string(),
            },
        }
    }

    /// Validate and apply within the open block
    pub fn deliver_tx(&self, raw: &[u8]) -> TxResult {
        match self.state.deliver_tx(raw) {
            Ok(_) => TxResult::ok(),
            Err(err) => {
                if err.kind() == ErrorKind::Storage {
                    // a failed state read or write while delivering means
                    // the replica can no longer be trusted
                    panic!("ballotchaind: fatal storage error in deliver: {err}");
                }
                TxResult {
                    code: 1,
                    info: err.to_string(),
                }
            }
        }
    }

    /// Flush the block. A failure here halts the node by contract.
    pub fn commit(&self) -> Result<[u8; 32], Error> {
        self.state.commit()
    }

    pub fn rollback(&self) {
        self.state.rollback();
    }

    /// Read-only query surface; always serves the last committed state
    pub fn query(&self, raw: &[u8]) -> QueryResponse {
        let request: QueryRequest = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(err) => return QueryResponse::fail(format!("cannot unmarshal query: {err}")),
        };
        match self.run_query(&request) {
            Ok(response) => response,
            Err(err) => QueryResponse::fail(err.to_string()),
        }
    }

    fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, Error> {
        match request.method.as_str() {
            "getEnvelopeStatus" => {
                let (pid, nullifier) = envelope_args(request)?;
                match self.state.envelope(&pid, &nullifier, true)? {
                    Some(_) => Ok(QueryResponse::ok(vec![])),
                    None => Ok(QueryResponse::fail("envelope not found")),
                }
            }
            "getEnvelope" => {
                let (pid, nullifier) = envelope_args(request)?;
                match self.state.envelope(&pid, &nullifier, true)? {
                    Some(envelope) => {
                        Ok(QueryResponse::ok(serde_cbor::to_vec(&envelope.vote_package)?))
                    }
                    None => Ok(QueryResponse::fail("envelope not found")),
                }
            }
            "getEnvelopeHeight" => {
                let pid = process_arg(request)?;
                let count = self.state.count_votes(&pid, true)? as u64;
                Ok(QueryResponse::ok(serde_cbor::to_vec(&count)?))
            }
            "getBlockHeight" => {
                let height = self.state.height(true)?;
                Ok(QueryResponse::ok(serde_cbor::to_vec(&height)?))
            }
            "getEnvelopeList" => {
                let pid = process_arg(request)?;
                let list: Vec<String> = self
                    .state
                    .envelope_list(
                        &pid,
                        request.from.unwrap_or(0),
                        request.list_size.unwrap_or(64),
                        true,
                    )?
                    .into_iter()
                    .map(|n| n.to_hex())
                    .collect();
                Ok(QueryResponse::ok(serde_cbor::to_vec(&list)?))
            }
            "getProcess" => {
                let pid = process_arg(request)?;
                match self.state.process(&pid, true)? {
                    Some(process) => Ok(QueryResponse::ok(serde_cbor::to_vec(&process)?)),
                    None => Ok(QueryResponse::fail("process not found")),
                }
            }
            method => Ok(QueryResponse::fail(format!("undefined query method {method}"))),
        }
    }

    /// Transactions queued by in-process components, drained by the engine
    /// into the next blocks
    pub fn mempool_drain(&self) -> Vec<Vec<u8>> {
        self.mempool.lock().drain(..).collect()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }
}

fn process_arg(request: &QueryRequest) -> Result<ProcessId, Error> {
    let pid = request
        .process_id
        .as_deref()
        .ok_or(Error::BadLength("query without processId"))?;
    ProcessId::from_hex(pid)
}

fn envelope_args(request: &QueryRequest) -> Result<(ProcessId, Nullifier), Error> {
    let pid = process_arg(request)?;
    let nullifier = request
        .nullifier
        .as_deref()
        .ok_or(Error::BadLength("query without nullifier"))?;
    Ok((pid, Nullifier::from_hex(nullifier)?))
}

impl TxSender for BaseApp {
    /// Validate against committed state and enqueue for the engine. A
    /// rejected transaction reports a non-zero code, mirroring the engine's
    /// mempool admission result.
    fn send_tx(&self, raw: &[u8]) -> Result<SendTxResult, Error> {
        let result = self.check_tx(raw);
        if !result.is_ok() {
            warn!(info = %result.info, "mempool rejected local transaction");
            return Ok(SendTxResult {
                code: result.code,
                data: result.info,
                hash: [0u8; 32],
            });
        }
        self.mempool.lock().push_back(raw.to_vec());
        Ok(SendTxResult {
            code: 0,
            data: String::new(),
            hash: keccak256(raw),
        })
    }
}
