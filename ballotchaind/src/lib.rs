//! The ballotchain node: replicated application state over a generic BFT
//! consensus engine, plus the two state-driven subsystems: the key keeper
//! that manages per-process encryption key shares and the scrutinizer that
//! tallies committed envelopes.

pub mod app;
pub mod config;
pub mod genesis;
pub mod keykeeper;
pub mod oracle;
pub mod scrutinizer;
pub mod state;
pub mod txvalidator;

pub use app::{AppInfo, BaseApp, QueryRequest, QueryResponse, SendTxResult, TxResult, TxSender};
pub use config::Config;
pub use genesis::{GenesisAppState, Validator};
pub use keykeeper::KeyKeeper;
pub use oracle::{AnchorEvent, OracleBridge};
pub use scrutinizer::{ProcessVotes, Scrutinizer, MAX_OPTIONS, MAX_QUESTIONS};
pub use state::{BlockHeader, Event, EventKind, EventListener, State};
pub use txvalidator::TxEffect;
