//! The anchor-chain oracle bridge: translates log events observed on the
//! external anchor chain into signed node transactions. The event listener
//! itself (RPC subscriptions, ABI decoding) lives outside the node; this
//! is the contract it feeds.

use crate::app::TxSender;
use crate::state::State;
use ballotchain::{
    Address, AdminTx, CancelProcessTx, EntityId, EnvelopeType, Error, NewProcessTx, ProcessId,
    ProcessMode, ProcessStatus, Signable, Signer, Transaction,
};
use std::sync::Arc;
use tracing::{debug, info};

/// A decoded anchor-chain log event
#[derive(Debug, Clone)]
pub enum AnchorEvent {
    ProcessCreated {
        process_id: ProcessId,
        entity_id: EntityId,
        census_root: [u8; 32],
        census_uri: Option<String>,
        start_block: i64,
        number_of_blocks: i64,
        envelope_type: EnvelopeType,
        mode: ProcessMode,
    },
    ProcessCanceled {
        process_id: ProcessId,
    },
    OracleAdded {
        address: Address,
    },
    OracleRemoved {
        address: Address,
    },
    ValidatorAdded {
        address: Address,
        public_key: String,
        power: u64,
        key_index: Option<u8>,
    },
    ValidatorRemoved {
        address: Address,
    },
}

/// Mirrors anchor-chain events into the node's mempool, signed with the
/// oracle identity
pub struct OracleBridge {
    signer: Signer,
    sender: Arc<dyn TxSender>,
    state: Arc<State>,
}

impl OracleBridge {
    pub fn new(signer: Signer, sender: Arc<dyn TxSender>, state: Arc<State>) -> Self {
        OracleBridge {
            signer,
            sender,
            state,
        }
    }

    /// Translate one event into a transaction, skipping events the
    /// committed state already reflects (startup replays re-deliver old
    /// logs)
    pub fn handle_event(&self, event: AnchorEvent) -> Result<(), Error> {
        match event {
            AnchorEvent::ProcessCreated {
                process_id,
                entity_id,
                census_root,
                census_uri,
                start_block,
                number_of_blocks,
                envelope_type,
                mode,
            } => {
                if self.state.process(&process_id, true)?.is_some() {
                    info!(pid = %process_id, "process already exists, skipping");
                    return Ok(());
                }
                info!(pid = %process_id, "found new process on the anchor chain");
                let mut tx = NewProcessTx {
                    process_id,
                    entity_id,
                    census_root,
                    census_uri,
                    start_block,
                    number_of_blocks,
                    envelope_type,
                    mode,
                    nonce: ballotchain::util::random_hex(32),
                    signature: vec![],
                };
                tx.sign(&self.signer)?;
                self.submit(Transaction::NewProcess(tx))
            }
            AnchorEvent::ProcessCanceled { process_id } => {
                let Some(process) = self.state.process(&process_id, true)? else {
                    return Err(Error::Validation(
                        ballotchain::ValidationError::ProcessNotFound(process_id.to_hex()),
                    ));
                };
                if process.status == ProcessStatus::Canceled {
                    info!(pid = %process_id, "process already canceled, skipping");
                    return Ok(());
                }
                info!(pid = %process_id, "found cancel process order on the anchor chain");
                let mut tx = CancelProcessTx {
                    process_id,
                    nonce: ballotchain::util::random_hex(32),
                    signature: vec![],
                };
                tx.sign(&self.signer)?;
                self.submit(Transaction::CancelProcess(tx))
            }
            AnchorEvent::OracleAdded { address } => {
                if self.state.oracles(true)?.contains(&address) {
                    return Ok(());
                }
                let mut tx = AdminTx::add_oracle(address);
                tx.sign(&self.signer)?;
                self.submit(Transaction::Admin(tx))
            }
            AnchorEvent::OracleRemoved { address } => {
                if !self.state.oracles(true)?.contains(&address) {
                    return Ok(());
                }
                let mut tx = AdminTx::remove_oracle(address);
                tx.sign(&self.signer)?;
                self.submit(Transaction::Admin(tx))
            }
            AnchorEvent::ValidatorAdded {
                address,
                public_key,
                power,
                key_index,
            } => {
                if self
                    .state
                    .validators(true)?
                    .iter()
                    .any(|v| v.address == address)
                {
                    return Ok(());
                }
                let mut tx = AdminTx::add_validator(address, public_key, power, key_index);
                tx.sign(&self.signer)?;
                self.submit(Transaction::Admin(tx))
            }
            AnchorEvent::ValidatorRemoved { address } => {
                if !self
                    .state
                    .validators(true)?
                    .iter()
                    .any(|v| v.address == address)
                {
                    return Ok(());
                }
                let mut tx = AdminTx::remove_validator(address);
                tx.sign(&self.signer)?;
                self.submit(Transaction::Admin(tx))
            }
        }
    }

    fn submit(&self, tx: Transaction) -> Result<(), Error> {
        let raw = tx.pack()?;
        let result = self.sender.send_tx(&raw)?;
        if result.code != 0 {
            return Err(Error::SendTx(result.data));
        }
        debug!(hash = %hex::encode(result.hash), "oracle transaction sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::BaseApp;
    use crate::genesis::GenesisAppState;

    fn setup() -> (tempfile::TempDir, Arc<BaseApp>, OracleBridge) {
        let dir = tempfile::tempdir().unwrap();
        let app = BaseApp::open(dir.path().join("state")).unwrap();
        let oracle = Signer::random();
        app.init_chain(&GenesisAppState {
            chain_id: "test".into(),
            validators: vec![],
            oracles: vec![oracle.address()],
        })
        .unwrap();
        let bridge = OracleBridge::new(oracle, app.clone(), app.state().clone());
        (dir, app, bridge)
    }

    fn created_event(pid: [u8; 32]) -> AnchorEvent {
        AnchorEvent::ProcessCreated {
            process_id: ProcessId::from(pid),
            entity_id: EntityId::from([1u8; 20]),
            census_root: [2u8; 32],
            census_uri: Some("ipfs://bafy".into()),
            start_block: 0,
            number_of_blocks: 10,
            envelope_type: Default::default(),
            mode: Default::default(),
        }
    }

    #[test]
    fn process_created_reaches_the_mempool() {
        let (_dir, app, bridge) = setup();
        bridge.handle_event(created_event([5u8; 32])).unwrap();
        assert_eq!(app.mempool_len(), 1);

        let raw = app.mempool_drain().pop().unwrap();
        match Transaction::unpack(&raw).unwrap() {
            Transaction::NewProcess(tx) => {
                assert_eq!(tx.process_id, ProcessId::from([5u8; 32]));
                assert_eq!(tx.recover_signer().unwrap(), bridge.signer.address());
            }
            other => panic!("unexpected transaction {other:?}"),
        }
    }

    #[test]
    fn replayed_events_are_skipped() {
        let (_dir, app, bridge) = setup();
        bridge.handle_event(created_event([5u8; 32])).unwrap();

        // deliver the queued transaction so the process is committed
        let raw = app.mempool_drain().pop().unwrap();
        app.begin_block(crate::state::BlockHeader {
            chain_id: "test".into(),
            height: 1,
            timestamp: 1,
        })
        .unwrap();
        assert!(app.deliver_tx(&raw).is_ok());
        app.commit().unwrap();

        // the same anchor event again produces no transaction
        bridge.handle_event(created_event([5u8; 32])).unwrap();
        assert_eq!(app.mempool_len(), 0);
    }

    #[test]
    fn cancel_unknown_process_is_an_error() {
        let (_dir, _app, bridge) = setup();
        assert!(bridge
            .handle_event(AnchorEvent::ProcessCanceled {
                process_id: ProcessId::from([9u8; 32]),
            })
            .is_err());
    }
}
