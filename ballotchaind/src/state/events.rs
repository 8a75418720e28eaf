use ballotchain::{EntityId, ProcessId, VoteEnvelope};

/// The state transitions listeners can subscribe to. Events are queued
/// while a block is delivered and fired in deliver order at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Rollback,
    AddProcess,
    CancelProcess,
    AddProcessKeys,
    RevealKeys,
    Vote,
    Commit,
}

#[derive(Debug, Clone)]
pub enum Event {
    AddProcess {
        process_id: ProcessId,
        entity_id: EntityId,
    },
    CancelProcess {
        process_id: ProcessId,
    },
    AddProcessKeys {
        process_id: ProcessId,
        public_key: String,
        commitment_key: String,
        index: u8,
    },
    RevealKeys {
        process_id: ProcessId,
        private_key: String,
        reveal_key: String,
        index: u8,
    },
    Vote(VoteEnvelope),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AddProcess { .. } => EventKind::AddProcess,
            Event::CancelProcess { .. } => EventKind::CancelProcess,
            Event::AddProcessKeys { .. } => EventKind::AddProcessKeys,
            Event::RevealKeys { .. } => EventKind::RevealKeys,
            Event::Vote(_) => EventKind::Vote,
        }
    }
}

/// Reacts to committed state transitions. Handlers run synchronously under
/// the commit bracket and must return quickly: anything that does I/O or
/// can block belongs on the listener's own worker.
///
/// Default implementations ignore every event, so listeners only override
/// the kinds they registered for.
pub trait EventListener: Send + Sync {
    fn on_rollback(&self) {}

    fn on_process(&self, _process_id: &ProcessId, _entity_id: &EntityId) {}

    fn on_cancel_process(&self, _process_id: &ProcessId) {}

    fn on_process_keys(
        &self,
        _process_id: &ProcessId,
        _public_key: &str,
        _commitment_key: &str,
        _index: u8,
    ) {
    }

    fn on_reveal_keys(
        &self,
        _process_id: &ProcessId,
        _private_key: &str,
        _reveal_key: &str,
        _index: u8,
    ) {
    }

    fn on_vote(&self, _envelope: &VoteEnvelope) {}

    fn on_commit(&self, _height: i64) {}
}
