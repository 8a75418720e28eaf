//! The scrutinizer: deterministic tally engine over committed envelopes.
//! Live (plaintext, non-anonymous) processes keep running counters updated
//! every block; everything else is tallied once at process end, decrypting
//! layered envelopes with the revealed keys.
//!
//! Local KV scheme:
//!   `liveProcess:{pidHex}` -> CBOR counter matrix of a live process
//!   `results:{pidHex}`     -> CBOR materialized results
//!   `end_{height}`         -> CBOR list of live pidHex ending at height

mod vote;

pub use vote::{add_vote_to_counters, empty_process_votes, prune_vote_result, unmarshal_vote};

use crate::state::{EventKind, EventListener, State};
use ballotchain::{
    EntityId, Error, ProcessId, ProcessStatus, ValidationError, VoteEnvelope, MAX_KEY_INDEX,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub const MAX_QUESTIONS: usize = 64;
pub const MAX_OPTIONS: usize = 64;

/// Vote counters: one row per question, one column per option
pub type ProcessVotes = Vec<Vec<u32>>;

const PREFIX_LIVE: &str = "liveProcess:";
const PREFIX_RESULTS: &str = "results:";
const PREFIX_END: &str = "end_";

/// Upper bound on envelopes iterated per tally, preserving the state
/// pagination contract
const ENVELOPE_LIST_MAX: usize = 32 << 18;

#[derive(Default)]
struct Pools {
    new_processes: Vec<ProcessId>,
    votes: Vec<VoteEnvelope>,
    canceled: Vec<ProcessId>,
    revealed: Vec<ProcessId>,
}

struct CommitBatch {
    height: i64,
    pools: Pools,
}

struct ScrutinizerInner {
    state: Arc<State>,
    storage: sled::Db,
    pools: Mutex<Pools>,
}

pub struct Scrutinizer {
    inner: Arc<ScrutinizerInner>,
    jobs: Mutex<mpsc::Sender<CommitBatch>>,
}

fn storage_err(err: sled::Error) -> Error {
    Error::Storage(err.to_string())
}

impl Scrutinizer {
    pub fn new<P: AsRef<Path>>(path: P, state: Arc<State>) -> Result<Arc<Self>, Error> {
        let storage = sled::open(path).map_err(storage_err)?;
        let inner = Arc::new(ScrutinizerInner {
            state: state.clone(),
            storage,
            pools: Mutex::new(Pools::default()),
        });

        let (jobs, receiver) = mpsc::channel::<CommitBatch>();
        let worker_inner = inner.clone();
        thread::Builder::new()
            .name("scrutinizer".to_string())
            .spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    worker_inner.handle_commit(batch);
                }
            })
            .map_err(|e| Error::Storage(e.to_string()))?;

        let scrutinizer = Arc::new(Scrutinizer {
            inner,
            jobs: Mutex::new(jobs),
        });
        let listener: Arc<dyn EventListener> = scrutinizer.clone();
        state.add_event(
            &[
                EventKind::Rollback,
                EventKind::AddProcess,
                EventKind::CancelProcess,
                EventKind::RevealKeys,
                EventKind::Vote,
                EventKind::Commit,
            ],
            &listener,
        );
        Ok(scrutinizer)
    }

    /// Current result for a process: materialized results if present, the
    /// running counters for live processes, `NoResultsYet` otherwise
    pub fn vote_result(&self, pid: &ProcessId) -> Result<ProcessVotes, Error> {
        let inner = &self.inner;
        if inner.state.process(pid, false)?.is_none() {
            return Err(Error::Validation(ValidationError::ProcessNotFound(
                pid.to_hex(),
            )));
        }
        if let Some(raw) = inner
            .storage
            .get(results_key(pid))
            .map_err(storage_err)?
        {
            return Ok(serde_cbor::from_slice(&raw)?);
        }
        if let Some(raw) = inner.storage.get(live_key(pid)).map_err(storage_err)? {
            let mut pv: ProcessVotes = serde_cbor::from_slice(&raw)?;
            prune_vote_result(&mut pv);
            return Ok(pv);
        }
        Err(Error::NoResultsYet)
    }

    /// Tally a finished process and materialize its results. Errors if the
    /// results already exist; never mutates in that case.
    pub fn compute_result(&self, pid: &ProcessId) -> Result<(), Error> {
        self.inner.compute_result(pid)
    }
}

impl EventListener for Scrutinizer {
    fn on_rollback(&self) {
        let mut pools = self.inner.pools.lock();
        pools.new_processes.clear();
        pools.votes.clear();
        pools.canceled.clear();
        pools.revealed.clear();
    }

    fn on_process(&self, process_id: &ProcessId, _entity_id: &EntityId) {
        self.inner.pools.lock().new_processes.push(*process_id);
    }

    fn on_vote(&self, envelope: &VoteEnvelope) {
        self.inner.pools.lock().votes.push(envelope.clone());
    }

    fn on_cancel_process(&self, process_id: &ProcessId) {
        self.inner.pools.lock().canceled.push(*process_id);
    }

    fn on_reveal_keys(
        &self,
        process_id: &ProcessId,
        _private_key: &str,
        _reveal_key: &str,
        _index: u8,
    ) {
        let mut pools = self.inner.pools.lock();
        if !pools.revealed.contains(process_id) {
            pools.revealed.push(*process_id);
        }
    }

    fn on_commit(&self, height: i64) {
        let pools = std::mem::take(&mut *self.inner.pools.lock());
        self.jobs.lock().send(CommitBatch { height, pools }).ok();
    }
}

impl ScrutinizerInner {
    fn handle_commit(&self, batch: CommitBatch) {
        let CommitBatch { height, pools } = batch;
        for pid in &pools.new_processes {
            if let Err(err) = self.register_process(pid) {
                warn!(pid = %pid, %err, "cannot register process for tally");
            }
        }
        for envelope in &pools.votes {
            if let Err(err) = self.add_live_vote(envelope) {
                warn!(pid = %envelope.process_id, %err, "cannot add live vote");
            }
        }
        for pid in &pools.canceled {
            // a canceled live process materializes its running tally now;
            // encrypted ones wait for the key reveals
            if self.has_live_entry(pid) {
                if let Err(err) = self.compute_result(pid) {
                    warn!(pid = %pid, %err, "cannot compute canceled process results");
                }
            }
        }
        for pid in &pools.revealed {
            match self.state.process(pid, false) {
                Ok(Some(process)) if process.status == ProcessStatus::Results => {
                    if let Err(err) = self.compute_result(pid) {
                        warn!(pid = %pid, %err, "cannot compute revealed process results");
                    }
                }
                _ => {}
            }
        }
        self.process_ending(height);
    }

    fn has_live_entry(&self, pid: &ProcessId) -> bool {
        matches!(self.storage.get(live_key(pid)), Ok(Some(_)))
    }

    /// Live processes get an empty counter matrix and an entry in the
    /// bucket of the height they end at
    fn register_process(&self, pid: &ProcessId) -> Result<(), Error> {
        let process = self
            .state
            .process(pid, false)?
            .ok_or_else(|| Error::Validation(ValidationError::ProcessNotFound(pid.to_hex())))?;
        if !process.is_live_tally() {
            return Ok(());
        }
        self.storage
            .insert(live_key(pid), serde_cbor::to_vec(&empty_process_votes())?)
            .map_err(storage_err)?;

        let bucket = ending_key(process.end_block());
        let mut pids: Vec<String> = match self.storage.get(&bucket).map_err(storage_err)? {
            Some(raw) => serde_cbor::from_slice(&raw)?,
            None => vec![],
        };
        pids.push(pid.to_hex());
        self.storage
            .insert(bucket, serde_cbor::to_vec(&pids)?)
            .map_err(storage_err)?;
        self.storage.flush().map_err(storage_err)?;
        debug!(pid = %pid, end_block = process.end_block(), "tracking live process");
        Ok(())
    }

    /// Update the running counters of a live process; envelopes of
    /// non-live processes are skipped here and tallied at process end
    fn add_live_vote(&self, envelope: &VoteEnvelope) -> Result<(), Error> {
        let pid = &envelope.process_id;
        let Some(raw) = self.storage.get(live_key(pid)).map_err(storage_err)? else {
            return Ok(());
        };
        let mut pv: ProcessVotes = serde_cbor::from_slice(&raw)?;
        let package = unmarshal_vote(&envelope.vote_package, &[])?;
        add_vote_to_counters(&mut pv, &package)?;
        self.storage
            .insert(live_key(pid), serde_cbor::to_vec(&pv)?)
            .map_err(storage_err)?;
        debug!(pid = %pid, "live vote added");
        Ok(())
    }

    /// Close every live process whose window ends at this height
    fn process_ending(&self, height: i64) {
        let bucket = ending_key(height);
        let pids: Vec<String> = match self.storage.get(&bucket) {
            Ok(Some(raw)) => match serde_cbor::from_slice(&raw) {
                Ok(pids) => pids,
                Err(err) => {
                    warn!(height, %err, "cannot unmarshal ending process list");
                    return;
                }
            },
            _ => return,
        };
        for pid_hex in pids {
            let Ok(pid) = ProcessId::from_hex(&pid_hex) else {
                continue;
            };
            match self.compute_result(&pid) {
                Ok(()) => {}
                Err(Error::ResultsAlreadyComputed(_)) => {
                    // canceled earlier in its window
                    debug!(pid = %pid, "results already materialized");
                }
                Err(err) => warn!(pid = %pid, %err, "cannot compute process results"),
            }
        }
        if let Err(err) = self
            .storage
            .remove(&bucket)
            .and_then(|_| self.storage.flush().map(|_| ()))
        {
            warn!(height, %err, "cannot clear ending bucket");
        }
    }

    fn compute_result(&self, pid: &ProcessId) -> Result<(), Error> {
        debug!(pid = %pid, "computing results");
        let process = self
            .state
            .process(pid, false)?
            .ok_or_else(|| Error::Validation(ValidationError::ProcessNotFound(pid.to_hex())))?;

        if self
            .storage
            .get(results_key(pid))
            .map_err(storage_err)?
            .is_some()
        {
            return Err(Error::ResultsAlreadyComputed(pid.to_hex()));
        }

        let mut pv = if process.is_live_tally() {
            match self.storage.get(live_key(pid)).map_err(storage_err)? {
                Some(raw) => serde_cbor::from_slice(&raw)?,
                None => empty_process_votes(),
            }
        } else {
            self.compute_non_live(&process)?
        };
        prune_vote_result(&mut pv);

        self.storage
            .insert(results_key(pid), serde_cbor::to_vec(&pv)?)
            .map_err(storage_err)?;
        self.storage
            .remove(live_key(pid))
            .map_err(storage_err)?;
        self.storage.flush().map_err(storage_err)?;
        info!(pid = %pid, questions = pv.len(), "results materialized");
        Ok(())
    }

    /// Iterate every envelope of a finished process in ascending nullifier
    /// order, decrypting where needed. Broken envelopes are logged and
    /// skipped; the tally continues.
    fn compute_non_live(
        &self,
        process: &ballotchain::Process,
    ) -> Result<ProcessVotes, Error> {
        let pid = &process.process_id;
        let mut pv = empty_process_votes();
        let mut tallied = 0usize;
        for nullifier in self
            .state
            .envelope_list(pid, 0, ENVELOPE_LIST_MAX, false)?
        {
            let Some(envelope) = self.state.envelope(pid, &nullifier, false)? else {
                warn!(pid = %pid, nullifier = %nullifier, "envelope listed but not found");
                continue;
            };
            let package = if process.is_encrypted() {
                match self.decryption_keys(process, &envelope) {
                    Ok(keys) => unmarshal_vote(&envelope.vote_package, &keys),
                    Err(err) => Err(err),
                }
            } else {
                unmarshal_vote(&envelope.vote_package, &[])
            };
            match package.and_then(|package| add_vote_to_counters(&mut pv, &package)) {
                Ok(()) => tallied += 1,
                Err(err) => warn!(pid = %pid, nullifier = %nullifier, %err, "skipping envelope"),
            }
        }
        info!(pid = %pid, votes = tallied, "computed end-of-process results");
        Ok(pv)
    }

    /// Resolve the private keys an envelope was encrypted with, in the
    /// order the voter applied them
    fn decryption_keys(
        &self,
        process: &ballotchain::Process,
        envelope: &VoteEnvelope,
    ) -> Result<Vec<[u8; 32]>, Error> {
        if envelope.encryption_key_indexes.is_empty() {
            return Err(Error::MissingKeyMaterial(process.process_id.to_hex()));
        }
        let mut keys = Vec::with_capacity(envelope.encryption_key_indexes.len());
        for &index in &envelope.encryption_key_indexes {
            if index >= MAX_KEY_INDEX {
                return Err(Error::BadLength("encryption key index overflow"));
            }
            let key_hex = &process.encryption_private_keys[index as usize];
            if key_hex.is_empty() {
                return Err(Error::MissingKeyMaterial(process.process_id.to_hex()));
            }
            let raw = hex::decode(key_hex)?;
            if raw.len() != 32 {
                return Err(Error::BadLength("encryption private key"));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&raw);
            keys.push(key);
        }
        Ok(keys)
    }
}

fn live_key(pid: &ProcessId) -> Vec<u8> {
    format!("{PREFIX_LIVE}{pid}").into_bytes()
}

fn results_key(pid: &ProcessId) -> Vec<u8> {
    format!("{PREFIX_RESULTS}{pid}").into_bytes()
}

fn ending_key(height: i64) -> Vec<u8> {
    format!("{PREFIX_END}{height}").into_bytes()
}
