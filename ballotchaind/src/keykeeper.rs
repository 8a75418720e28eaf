//! The key-keeper committee member: derives per-process encryption key
//! shares, publishes the public half when a process appears and reveals
//! the private half at the scheduled height.
//!
//! Local KV scheme:
//!   `p_{pidHex}`  -> packed process keys (129 bytes)
//!   `b_{height}`  -> CBOR list of pidHex strings scheduled for reveal

use crate::app::TxSender;
use crate::state::{EventKind, EventListener, State};
use ballotchain::{
    AdminTx, EntityId, Error, ProcessId, ProcessKeys, Signable, Signer, Transaction,
    ValidationError, MAX_KEY_INDEX,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

const DB_PREFIX_PROCESS: &str = "p_";
const DB_PREFIX_BLOCK: &str = "b_";

/// Blocks of grace before the startup rescue retries a scheduled reveal
const RESCUE_GRACE_BLOCKS: i64 = 2;

enum Job {
    Publish {
        process_id: ProcessId,
        keys: ProcessKeys,
    },
    RevealBucket {
        height: i64,
    },
}

#[derive(Default)]
struct Pools {
    /// Keys generated during the current block, published at commit
    key_pool: HashMap<ProcessId, ProcessKeys>,
    /// Reveal heights decided during the current block
    block_pool: HashMap<ProcessId, i64>,
}

struct KeeperInner {
    state: Arc<State>,
    storage: sled::Db,
    signer: Signer,
    sender: Arc<dyn TxSender>,
    index: u8,
    pools: Mutex<Pools>,
}

pub struct KeyKeeper {
    inner: Arc<KeeperInner>,
    jobs: Mutex<mpsc::Sender<Job>>,
}

impl KeyKeeper {
    pub fn new<P: AsRef<Path>>(
        path: P,
        state: Arc<State>,
        signer: Signer,
        sender: Arc<dyn TxSender>,
        index: u8,
    ) -> Result<Arc<Self>, Error> {
        if index == 0 || index >= MAX_KEY_INDEX {
            return Err(Error::Validation(ValidationError::KeyIndexOutOfRange(index)));
        }
        let storage = sled::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        let inner = Arc::new(KeeperInner {
            state: state.clone(),
            storage,
            signer,
            sender,
            index,
            pools: Mutex::new(Pools::default()),
        });

        let (jobs, receiver) = mpsc::channel();
        let worker_inner = inner.clone();
        thread::Builder::new()
            .name("keykeeper".to_string())
            .spawn(move || worker_loop(worker_inner, receiver))
            .map_err(|e| Error::Storage(e.to_string()))?;

        let keeper = Arc::new(KeyKeeper {
            inner,
            jobs: Mutex::new(jobs),
        });
        let listener: Arc<dyn EventListener> = keeper.clone();
        state.add_event(
            &[
                EventKind::Rollback,
                EventKind::AddProcess,
                EventKind::CancelProcess,
                EventKind::Commit,
            ],
            &listener,
        );
        Ok(keeper)
    }

    pub fn index(&self) -> u8 {
        self.inner.index
    }

    /// Startup rescue: after block replay, retry every scheduled reveal
    /// old enough that normal operation has clearly missed it.
    pub fn reveal_unpublished(&self) -> Result<(), Error> {
        let current = self.inner.state.height(true)?;
        let mut pending = Vec::new();
        for entry in self.inner.storage.scan_prefix(DB_PREFIX_BLOCK) {
            let (key, _) = entry.map_err(|e| Error::Storage(e.to_string()))?;
            let Some(height) = parse_bucket_height(&key) else {
                continue;
            };
            if height + RESCUE_GRACE_BLOCKS < current {
                pending.push(height);
            }
        }
        for height in pending {
            warn!(height, "found pending key reveals, running rescue");
            self.inner.process_bucket(height);
        }
        Ok(())
    }

    /// Periodically log how many processes this keeper holds keys for
    pub fn print_info(self: &Arc<Self>, every: Duration) {
        let keeper = self.clone();
        thread::Builder::new()
            .name("keykeeper-info".to_string())
            .spawn(move || loop {
                thread::sleep(every);
                let stored = keeper
                    .inner
                    .storage
                    .scan_prefix(DB_PREFIX_PROCESS)
                    .count();
                info!(stored, "keykeeper stored keys");
            })
            .ok();
    }
}

impl EventListener for KeyKeeper {
    fn on_rollback(&self) {
        let mut pools = self.inner.pools.lock();
        pools.key_pool.clear();
        pools.block_pool.clear();
    }

    fn on_process(&self, process_id: &ProcessId, _entity_id: &EntityId) {
        let inner = &self.inner;
        let process = match inner.state.process(process_id, true) {
            Ok(Some(process)) => process,
            Ok(None) => {
                error!(pid = %process_id, "cannot get process from state");
                return;
            }
            Err(err) => {
                error!(pid = %process_id, %err, "cannot get process from state");
                return;
            }
        };
        if !process.requires_keys() {
            return;
        }
        // slots already filled on the start-up block replay
        if process.key_published(inner.index) {
            return;
        }
        let mut pools = inner.pools.lock();
        if pools.key_pool.contains_key(process_id) {
            error!(pid = %process_id, "keys for process already exist in the pool queue");
            return;
        }
        match ProcessKeys::derive(&inner.signer.secret_bytes(), process_id, inner.index) {
            Ok(keys) => {
                pools.key_pool.insert(*process_id, keys);
                pools.block_pool.insert(*process_id, process.end_block());
            }
            Err(err) => error!(pid = %process_id, %err, "cannot generate process keys"),
        }
    }

    fn on_cancel_process(&self, process_id: &ProcessId) {
        let inner = &self.inner;
        let process = match inner.state.process(process_id, true) {
            Ok(Some(process)) => process,
            _ => {
                error!(pid = %process_id, "cannot get canceled process from state");
                return;
            }
        };
        if !process.requires_keys() {
            return;
        }
        let height = inner.state.height(true).unwrap_or(0);
        info!(pid = %process_id, "process canceled, scheduling reveal keys for next block");
        inner.pools.lock().block_pool.insert(*process_id, height + 1);
    }

    fn on_commit(&self, height: i64) {
        self.inner.schedule_reveal_keys();
        let publishes: Vec<(ProcessId, ProcessKeys)> = {
            let mut pools = self.inner.pools.lock();
            pools.key_pool.drain().collect()
        };
        let jobs = self.jobs.lock();
        for (process_id, keys) in publishes {
            jobs.send(Job::Publish { process_id, keys }).ok();
        }
        jobs.send(Job::RevealBucket { height }).ok();
    }
}

fn worker_loop(inner: Arc<KeeperInner>, jobs: mpsc::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Publish { process_id, keys } => {
                if let Err(err) = inner.publish_keys(&process_id, &keys) {
                    error!(pid = %process_id, %err, "cannot publish keys for process");
                }
            }
            Job::RevealBucket { height } => inner.process_bucket(height),
        }
    }
}

impl KeeperInner {
    fn storage_err(err: sled::Error) -> Error {
        Error::Storage(err.to_string())
    }

    /// Move the reveal heights decided during the block into the durable
    /// bucket index. Runs synchronously under the commit bracket.
    fn schedule_reveal_keys(&self) {
        let scheduled: Vec<(ProcessId, i64)> = {
            let mut pools = self.pools.lock();
            pools.block_pool.drain().collect()
        };
        for (pid, height) in scheduled {
            if let Err(err) = self.schedule_one(&pid, height) {
                error!(pid = %pid, height, %err, "cannot save scheduled reveal");
                continue;
            }
            info!(pid = %pid, height, "scheduled reveal keys");
        }
    }

    fn schedule_one(&self, pid: &ProcessId, height: i64) -> Result<(), Error> {
        let key = bucket_key(height);
        let mut pids: Vec<String> = match self.storage.get(&key).map_err(Self::storage_err)? {
            Some(raw) => serde_cbor::from_slice(&raw)?,
            None => vec![],
        };
        let pid_hex = pid.to_hex();
        if !pids.contains(&pid_hex) {
            pids.push(pid_hex);
        }
        self.storage
            .insert(key, serde_cbor::to_vec(&pids)?)
            .map_err(Self::storage_err)?;
        self.storage.flush().map_err(Self::storage_err)?;
        Ok(())
    }

    /// Submit the publish transaction and persist the derived material.
    /// The local entry must not exist yet: the publish happens exactly once
    /// per process.
    fn publish_keys(&self, pid: &ProcessId, keys: &ProcessKeys) -> Result<(), Error> {
        info!(pid = %pid, index = self.index, "publishing keys for process");
        let mut tx = AdminTx::add_process_keys(*pid, keys);
        tx.sign(&self.signer)?;
        self.submit(&Transaction::Admin(tx))?;

        let db_key = process_key(pid);
        if self
            .storage
            .get(&db_key)
            .map_err(Self::storage_err)?
            .is_some()
        {
            return Err(Error::Storage(format!(
                "keys for process {pid} already exist"
            )));
        }
        self.storage
            .insert(db_key, &keys.encode()[..])
            .map_err(Self::storage_err)?;
        self.storage.flush().map_err(Self::storage_err)?;
        Ok(())
    }

    /// Reveal every process scheduled for `height`. Failed pids stay in the
    /// bucket so the rescue loop can retry them later.
    fn process_bucket(&self, height: i64) {
        let key = bucket_key(height);
        let pids: Vec<String> = match self.storage.get(&key) {
            Ok(Some(raw)) => match serde_cbor::from_slice(&raw) {
                Ok(pids) => pids,
                Err(err) => {
                    error!(height, %err, "cannot unmarshal scheduled pids");
                    return;
                }
            },
            Ok(None) => return,
            Err(err) => {
                error!(height, %err, "cannot read reveal bucket");
                return;
            }
        };

        let mut failed = Vec::new();
        for pid_hex in pids {
            let pid = match ProcessId::from_hex(&pid_hex) {
                Ok(pid) => pid,
                Err(err) => {
                    error!(%pid_hex, %err, "invalid pid in reveal bucket");
                    continue;
                }
            };
            info!(pid = %pid, height, "revealing keys for process");
            if let Err(err) = self.reveal_keys(&pid) {
                error!(pid = %pid, %err, "cannot reveal process keys");
                failed.push(pid_hex);
            }
        }

        // failed reveals keep their bucket entry for the rescue loop
        let result = if failed.is_empty() {
            self.storage.remove(&key).map(|_| ())
        } else {
            match serde_cbor::to_vec(&failed) {
                Ok(raw) => self.storage.insert(&key, raw).map(|_| ()),
                Err(err) => {
                    error!(height, %err, "cannot marshal failed reveal list");
                    return;
                }
            }
        };
        if let Err(err) = result.and_then(|_| self.storage.flush().map(|_| ())) {
            error!(height, %err, "cannot update reveal bucket");
        }
    }

    fn reveal_keys(&self, pid: &ProcessId) -> Result<(), Error> {
        // if the slot is already filled on-chain there is nothing to do
        if let Ok(Some(process)) = self.state.process(pid, true) {
            if process.key_revealed(self.index) {
                self.storage
                    .remove(process_key(pid))
                    .map_err(Self::storage_err)?;
                return Ok(());
            }
        }

        let keys = match self.storage.get(process_key(pid)).map_err(Self::storage_err)? {
            Some(raw) => ProcessKeys::decode(&raw)?,
            None => {
                // alarm condition: the material was persisted at publish
                // time, but derivation is deterministic so it can always
                // be rebuilt
                warn!(pid = %pid, "local key material missing at reveal, re-deriving");
                ProcessKeys::derive(&self.signer.secret_bytes(), pid, self.index)?
            }
        };

        let mut tx = AdminTx::reveal_process_keys(*pid, &keys);
        tx.sign(&self.signer)?;
        self.submit(&Transaction::Admin(tx))?;

        self.storage
            .remove(process_key(pid))
            .map_err(Self::storage_err)?;
        self.storage.flush().map_err(Self::storage_err)?;
        Ok(())
    }

    /// Send a transaction through the local mempool, retrying transport
    /// failures with bounded exponential delay
    fn submit(&self, tx: &Transaction) -> Result<(), Error> {
        let raw = tx.pack()?;
        let mut delay = Duration::from_millis(100);
        let mut last_err = None;
        for _ in 0..5 {
            match self.sender.send_tx(&raw) {
                Ok(result) if result.code == 0 => return Ok(()),
                Ok(result) => return Err(Error::SendTx(result.data)),
                Err(err) => {
                    last_err = Some(err);
                    thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::SendTx("submission failed".to_string())))
    }
}

fn process_key(pid: &ProcessId) -> Vec<u8> {
    format!("{DB_PREFIX_PROCESS}{pid}").into_bytes()
}

fn bucket_key(height: i64) -> Vec<u8> {
    format!("{DB_PREFIX_BLOCK}{height}").into_bytes()
}

fn parse_bucket_height(key: &[u8]) -> Option<i64> {
    std::str::from_utf8(key)
        .ok()?
        .strip_prefix(DB_PREFIX_BLOCK)?
        .parse()
        .ok()
}
