//! The replicated application state: three authenticated trees (app-meta,
//! processes, votes) with a block-scoped staging layer, atomic commit and
//! typed event dispatch.

mod events;
mod tree;

pub use events::{Event, EventKind, EventListener};
pub use tree::{StateTree, ZERO_ROOT};

use crate::genesis::Validator;
use crate::txvalidator;
use ballotchain::{
    envelope_key, keccak256, Address, Error, Nullifier, Process, ProcessId, ProcessStatus,
    Transaction, ValidationError, VoteEnvelope,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

const HEADER_KEY: &[u8] = b"header";
const ORACLE_KEY: &[u8] = b"oracle";
const VALIDATOR_KEY: &[u8] = b"validator";
const APP_HASH_KEY: &[u8] = b"app_hash";

/// The subset of the consensus block header the application records
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: i64,
    pub timestamp: i64,
}

/// Persistent application state. All mutation between `begin_block` and
/// `commit` lands in the staging layer; `commit` flushes atomically,
/// recomputes the three roots and fires the queued events.
///
/// The consensus engine serializes the write path; `block_open` guards
/// against protocol misuse.
pub struct State {
    app_tree: StateTree,
    process_tree: StateTree,
    vote_tree: StateTree,
    meta: sled::Tree,
    db: sled::Db,
    listeners: Mutex<Vec<(Vec<EventKind>, Weak<dyn EventListener>)>>,
    pending_events: Mutex<Vec<Event>>,
    block_open: AtomicBool,
}

fn storage_err(err: sled::Error) -> Error {
    Error::Storage(err.to_string())
}

impl State {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let db = sled::open(path).map_err(storage_err)?;
        let state = State {
            app_tree: StateTree::open(&db, "app")?,
            process_tree: StateTree::open(&db, "process")?,
            vote_tree: StateTree::open(&db, "vote")?,
            meta: db.open_tree("meta").map_err(storage_err)?,
            db,
            listeners: Mutex::new(Vec::new()),
            pending_events: Mutex::new(Vec::new()),
            block_open: AtomicBool::new(false),
        };
        info!(height = state.height(true)?, "state opened");
        Ok(state)
    }

    /// Register a listener for a set of event kinds. The registry holds a
    /// weak reference, so dropping the listener unregisters it.
    pub fn add_event(&self, kinds: &[EventKind], listener: &Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .push((kinds.to_vec(), Arc::downgrade(listener)));
    }

    /// Open the write scope for a block: discard any leftover staging,
    /// notify listeners of the reset and record the new header.
    pub fn begin_block(&self, header: BlockHeader) -> Result<(), Error> {
        if self.block_open.swap(true, Ordering::SeqCst) {
            return Err(Error::Storage("block already open".to_string()));
        }
        self.reset_staging();
        self.app_tree.set(
            HEADER_KEY.to_vec(),
            serde_cbor::to_vec(&header).map_err(Error::Cbor)?,
        );
        Ok(())
    }

    /// Validate a transaction and apply its effects to the staging layer
    pub fn deliver_tx(&self, raw: &[u8]) -> Result<Transaction, ValidationError> {
        txvalidator::validate_and_apply(raw, self)
    }

    /// Flush the block, recompute `appHash = keccak256(appRoot ‖
    /// processRoot ‖ voteRoot)`, persist and dispatch the queued events.
    /// A persistence failure here is fatal: the caller must halt the node.
    pub fn commit(&self) -> Result<[u8; 32], Error> {
        let app_root = self.app_tree.commit()?;
        let process_root = self.process_tree.commit()?;
        let vote_root = self.vote_tree.commit()?;

        let mut buf = [0u8; 96];
        buf[..32].copy_from_slice(&app_root);
        buf[32..64].copy_from_slice(&process_root);
        buf[64..].copy_from_slice(&vote_root);
        let app_hash = keccak256(&buf);

        self.meta
            .insert(APP_HASH_KEY, &app_hash[..])
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        self.block_open.store(false, Ordering::SeqCst);

        let height = self.height(true)?;
        debug!(height, app_hash = %hex::encode(app_hash), "state committed");

        let events = std::mem::take(&mut *self.pending_events.lock());
        self.dispatch(&events, height);
        Ok(app_hash)
    }

    /// Discard the staging layer without touching committed state
    pub fn rollback(&self) {
        self.reset_staging();
        self.block_open.store(false, Ordering::SeqCst);
    }

    fn reset_staging(&self) {
        self.app_tree.rollback();
        self.process_tree.rollback();
        self.vote_tree.rollback();
        self.pending_events.lock().clear();
        self.each_listener(EventKind::Rollback, |l| l.on_rollback());
    }

    pub fn app_hash(&self) -> Result<[u8; 32], Error> {
        match self.meta.get(APP_HASH_KEY).map_err(storage_err)? {
            Some(raw) if raw.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&raw);
                Ok(hash)
            }
            _ => Ok([0u8; 32]),
        }
    }

    /// The committed roots of the three trees, in app/process/vote order
    pub fn roots(&self) -> Result<[[u8; 32]; 3], Error> {
        Ok([
            self.app_tree.root()?,
            self.process_tree.root()?,
            self.vote_tree.root()?,
        ])
    }

    // ___ app tree ___

    pub fn header(&self, committed: bool) -> Result<Option<BlockHeader>, Error> {
        match self.app_tree.get(HEADER_KEY, committed)? {
            Some(raw) => Ok(Some(serde_cbor::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn height(&self, committed: bool) -> Result<i64, Error> {
        Ok(self.header(committed)?.map(|h| h.height).unwrap_or(0))
    }

    pub fn oracles(&self, committed: bool) -> Result<Vec<Address>, Error> {
        match self.app_tree.get(ORACLE_KEY, committed)? {
            Some(raw) => Ok(serde_cbor::from_slice(&raw)?),
            None => Ok(vec![]),
        }
    }

    pub fn add_oracle(&self, address: Address) -> Result<(), Error> {
        let mut oracles = self.oracles(false)?;
        if !oracles.contains(&address) {
            oracles.push(address);
        }
        self.app_tree
            .set(ORACLE_KEY.to_vec(), serde_cbor::to_vec(&oracles)?);
        Ok(())
    }

    pub fn remove_oracle(&self, address: &Address) -> Result<(), Error> {
        let mut oracles = self.oracles(false)?;
        oracles.retain(|o| o != address);
        self.app_tree
            .set(ORACLE_KEY.to_vec(), serde_cbor::to_vec(&oracles)?);
        Ok(())
    }

    pub fn validators(&self, committed: bool) -> Result<Vec<Validator>, Error> {
        match self.app_tree.get(VALIDATOR_KEY, committed)? {
            Some(raw) => Ok(serde_cbor::from_slice(&raw)?),
            None => Ok(vec![]),
        }
    }

    pub fn add_validator(&self, validator: Validator) -> Result<(), Error> {
        let mut validators = self.validators(false)?;
        if !validators.iter().any(|v| v.address == validator.address) {
            validators.push(validator);
        }
        self.app_tree
            .set(VALIDATOR_KEY.to_vec(), serde_cbor::to_vec(&validators)?);
        Ok(())
    }

    pub fn remove_validator(&self, address: &Address) -> Result<(), Error> {
        let mut validators = self.validators(false)?;
        validators.retain(|v| v.address != *address);
        self.app_tree
            .set(VALIDATOR_KEY.to_vec(), serde_cbor::to_vec(&validators)?);
        Ok(())
    }

    // ___ process tree ___

    pub fn process(&self, pid: &ProcessId, committed: bool) -> Result<Option<Process>, Error> {
        match self.process_tree.get(pid.as_bytes(), committed)? {
            Some(raw) => Ok(Some(serde_cbor::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_process(&self, process: &Process) -> Result<(), Error> {
        self.process_tree.set(
            process.process_id.as_bytes().to_vec(),
            serde_cbor::to_vec(process)?,
        );
        Ok(())
    }

    fn must_process(&self, pid: &ProcessId) -> Result<Process, Error> {
        self.process(pid, false)?.ok_or_else(|| {
            Error::Validation(ValidationError::ProcessNotFound(pid.to_hex()))
        })
    }

    pub fn add_process(&self, process: Process) -> Result<(), Error> {
        let event = Event::AddProcess {
            process_id: process.process_id,
            entity_id: process.entity_id,
        };
        self.put_process(&process)?;
        self.pending_events.lock().push(event);
        Ok(())
    }

    pub fn cancel_process(&self, pid: &ProcessId) -> Result<(), Error> {
        let mut process = self.must_process(pid)?;
        process.status = ProcessStatus::Canceled;
        self.put_process(&process)?;
        self.pending_events
            .lock()
            .push(Event::CancelProcess { process_id: *pid });
        Ok(())
    }

    pub fn add_process_keys(
        &self,
        pid: &ProcessId,
        index: u8,
        public_key: &str,
        commitment_key: &str,
    ) -> Result<(), Error> {
        let mut process = self.must_process(pid)?;
        process.encryption_public_keys[index as usize] = public_key.to_string();
        process.commitment_keys[index as usize] = commitment_key.to_string();
        self.put_process(&process)?;
        self.pending_events.lock().push(Event::AddProcessKeys {
            process_id: *pid,
            public_key: public_key.to_string(),
            commitment_key: commitment_key.to_string(),
            index,
        });
        Ok(())
    }

    pub fn reveal_process_keys(
        &self,
        pid: &ProcessId,
        index: u8,
        private_key: &str,
        reveal_key: &str,
    ) -> Result<(), Error> {
        let mut process = self.must_process(pid)?;
        process.encryption_private_keys[index as usize] = private_key.to_string();
        process.reveal_keys[index as usize] = reveal_key.to_string();
        // a reveal only happens after the voting window, so a still-Ready
        // process is ended here; the last reveal moves it to Results
        if process.status == ProcessStatus::Ready {
            process.status = ProcessStatus::Ended;
        }
        if process.all_keys_revealed() {
            process.status = ProcessStatus::Results;
        }
        self.put_process(&process)?;
        self.pending_events.lock().push(Event::RevealKeys {
            process_id: *pid,
            private_key: private_key.to_string(),
            reveal_key: reveal_key.to_string(),
            index,
        });
        Ok(())
    }

    // ___ vote tree ___

    pub fn add_vote(&self, envelope: VoteEnvelope) -> Result<(), Error> {
        self.vote_tree
            .set(envelope.tree_key(), serde_cbor::to_vec(&envelope)?);
        self.pending_events.lock().push(Event::Vote(envelope));
        Ok(())
    }

    pub fn envelope(
        &self,
        pid: &ProcessId,
        nullifier: &Nullifier,
        committed: bool,
    ) -> Result<Option<VoteEnvelope>, Error> {
        match self
            .vote_tree
            .get(&envelope_key(pid, nullifier), committed)?
        {
            Some(raw) => Ok(Some(serde_cbor::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Nullifiers of the envelopes for a process, deterministic by byte
    /// order, paginated with `from`/`list_size`
    pub fn envelope_list(
        &self,
        pid: &ProcessId,
        from: usize,
        list_size: usize,
        committed: bool,
    ) -> Result<Vec<Nullifier>, Error> {
        let entries = self.vote_tree.iter_prefix(pid.as_bytes(), committed)?;
        entries
            .into_iter()
            .skip(from)
            .take(list_size)
            .map(|(key, _)| Nullifier::from_bytes(&key[ProcessId::LEN..]))
            .collect()
    }

    /// Count the envelopes of a process without materializing them
    pub fn count_votes(&self, pid: &ProcessId, committed: bool) -> Result<usize, Error> {
        self.vote_tree.count_prefix(pid.as_bytes(), committed)
    }

    // ___ events ___

    fn dispatch(&self, events: &[Event], height: i64) {
        for event in events {
            let kind = event.kind();
            self.each_listener(kind, |listener| match event {
                Event::AddProcess {
                    process_id,
                    entity_id,
                } => listener.on_process(process_id, entity_id),
                Event::CancelProcess { process_id } => listener.on_cancel_process(process_id),
                Event::AddProcessKeys {
                    process_id,
                    public_key,
                    commitment_key,
                    index,
                } => listener.on_process_keys(process_id, public_key, commitment_key, *index),
                Event::RevealKeys {
                    process_id,
                    private_key,
                    reveal_key,
                    index,
                } => listener.on_reveal_keys(process_id, private_key, reveal_key, *index),
                Event::Vote(envelope) => listener.on_vote(envelope),
            });
        }
        self.each_listener(EventKind::Commit, |listener| listener.on_commit(height));
    }

    fn each_listener<F: Fn(&dyn EventListener)>(&self, kind: EventKind, f: F) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|(kinds, listener)| {
            let Some(listener) = listener.upgrade() else {
                return false;
            };
            if kinds.contains(&kind) {
                f(listener.as_ref());
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballotchain::{CensusProof, EntityId};
    use std::sync::atomic::AtomicUsize;

    fn open_state() -> (tempfile::TempDir, State) {
        let dir = tempfile::tempdir().unwrap();
        let state = State::open(dir.path().join("state")).unwrap();
        (dir, state)
    }

    fn sample_process(pid: [u8; 32]) -> Process {
        ballotchain::NewProcessTx {
            process_id: ProcessId::from(pid),
            entity_id: EntityId::from([1u8; 20]),
            census_root: [2u8; 32],
            census_uri: None,
            start_block: 0,
            number_of_blocks: 10,
            envelope_type: Default::default(),
            mode: Default::default(),
            nonce: ballotchain::util::random_hex(32),
            signature: vec![],
        }
        .into_process()
    }

    fn sample_envelope(pid: [u8; 32], null: [u8; 32]) -> VoteEnvelope {
        VoteEnvelope {
            process_id: ProcessId::from(pid),
            nullifier: Nullifier::from(null),
            vote_package: b"{\"votes\":[0]}".to_vec(),
            encryption_key_indexes: vec![],
            proof: CensusProof {
                key: vec![0u8; 20],
                siblings: vec![],
            },
            signature: vec![0u8; 65],
        }
    }

    fn block(state: &State, height: i64) {
        state
            .begin_block(BlockHeader {
                chain_id: "test".into(),
                height,
                timestamp: height * 10,
            })
            .unwrap();
    }

    #[test]
    fn app_hash_covers_all_three_roots() {
        let (_dir, state) = open_state();
        block(&state, 1);
        state.add_process(sample_process([7u8; 32])).unwrap();
        let hash = state.commit().unwrap();

        let roots = state.roots().unwrap();
        let mut buf = Vec::new();
        for root in roots {
            buf.extend_from_slice(&root);
        }
        assert_eq!(hash, keccak256(&buf));
        assert_eq!(state.app_hash().unwrap(), hash);
        assert_eq!(state.height(true).unwrap(), 1);
    }

    #[test]
    fn staged_process_invisible_until_commit() {
        let (_dir, state) = open_state();
        block(&state, 1);
        let pid = ProcessId::from([7u8; 32]);
        state.add_process(sample_process([7u8; 32])).unwrap();
        assert!(state.process(&pid, true).unwrap().is_none());
        assert!(state.process(&pid, false).unwrap().is_some());
        state.commit().unwrap();
        assert!(state.process(&pid, true).unwrap().is_some());
    }

    #[test]
    fn rollback_discards_block() {
        let (_dir, state) = open_state();
        block(&state, 1);
        state.add_process(sample_process([7u8; 32])).unwrap();
        state.rollback();
        block(&state, 1);
        state.commit().unwrap();
        assert!(state
            .process(&ProcessId::from([7u8; 32]), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn envelope_list_is_nullifier_ordered() {
        let (_dir, state) = open_state();
        block(&state, 1);
        state.add_process(sample_process([7u8; 32])).unwrap();
        state.add_vote(sample_envelope([7u8; 32], [3u8; 32])).unwrap();
        state.add_vote(sample_envelope([7u8; 32], [1u8; 32])).unwrap();
        state.add_vote(sample_envelope([7u8; 32], [2u8; 32])).unwrap();
        state.commit().unwrap();

        let pid = ProcessId::from([7u8; 32]);
        let list = state.envelope_list(&pid, 0, 100, true).unwrap();
        assert_eq!(
            list,
            vec![
                Nullifier::from([1u8; 32]),
                Nullifier::from([2u8; 32]),
                Nullifier::from([3u8; 32]),
            ]
        );
        assert_eq!(state.count_votes(&pid, true).unwrap(), 3);
        assert_eq!(state.envelope_list(&pid, 1, 1, true).unwrap().len(), 1);
    }

    #[test]
    fn listeners_receive_commit_batch() {
        struct Counter {
            processes: AtomicUsize,
            votes: AtomicUsize,
            commits: AtomicUsize,
        }
        impl EventListener for Counter {
            fn on_process(&self, _pid: &ProcessId, _eid: &EntityId) {
                self.processes.fetch_add(1, Ordering::SeqCst);
            }
            fn on_vote(&self, _envelope: &VoteEnvelope) {
                self.votes.fetch_add(1, Ordering::SeqCst);
            }
            fn on_commit(&self, _height: i64) {
                self.commits.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_dir, state) = open_state();
        let counter = Arc::new(Counter {
            processes: AtomicUsize::new(0),
            votes: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        });
        let listener: Arc<dyn EventListener> = counter.clone();
        state.add_event(
            &[EventKind::AddProcess, EventKind::Vote, EventKind::Commit],
            &listener,
        );

        block(&state, 1);
        state.add_process(sample_process([7u8; 32])).unwrap();
        state.add_vote(sample_envelope([7u8; 32], [1u8; 32])).unwrap();

        // nothing dispatched before commit
        assert_eq!(counter.processes.load(Ordering::SeqCst), 0);
        state.commit().unwrap();
        assert_eq!(counter.processes.load(Ordering::SeqCst), 1);
        assert_eq!(counter.votes.load(Ordering::SeqCst), 1);
        assert_eq!(counter.commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oracle_and_validator_sets() {
        let (_dir, state) = open_state();
        block(&state, 1);
        let oracle = Address::from([9u8; 20]);
        state.add_oracle(oracle).unwrap();
        state.add_oracle(oracle).unwrap(); // idempotent
        state
            .add_validator(Validator {
                address: Address::from([8u8; 20]),
                public_key: hex::encode([1u8; 32]),
                power: 10,
                key_index: Some(1),
            })
            .unwrap();
        state.commit().unwrap();

        assert_eq!(state.oracles(true).unwrap(), vec![oracle]);
        assert_eq!(state.validators(true).unwrap().len(), 1);

        block(&state, 2);
        state.remove_oracle(&oracle).unwrap();
        state.commit().unwrap();
        assert!(state.oracles(true).unwrap().is_empty());
    }
}
