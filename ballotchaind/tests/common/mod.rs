//! Shared harness for the end-to-end tests: a full application with an
//! oracle, a census of voters and optionally a key keeper, driven block by
//! block the way the consensus engine would.

use ballotchain::{
    CensusTree, EntityId, EnvelopeType, NewProcessTx, ProcessId, Signable, Signer, Transaction,
    VotePackage, VoteTx,
};
use ballotchaind::state::BlockHeader;
use ballotchaind::{
    BaseApp, GenesisAppState, KeyKeeper, Scrutinizer, TxResult, Validator,
};
use std::sync::Arc;
use std::time::Duration;

pub const KEEPER_INDEX: u8 = 1;

pub struct TestNode {
    pub _dir: tempfile::TempDir,
    pub app: Arc<BaseApp>,
    pub oracle: Signer,
    pub keeper_signer: Signer,
    pub keeper: Option<Arc<KeyKeeper>>,
    pub scrutinizer: Arc<Scrutinizer>,
    pub voters: Vec<Signer>,
    pub census: CensusTree,
    pub height: i64,
}

impl TestNode {
    pub fn new(with_keeper: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let app = BaseApp::open(dir.path().join("state")).unwrap();
        let oracle = Signer::random();
        let keeper_signer = Signer::random();

        app.init_chain(&GenesisAppState {
            chain_id: "ballotchain-test".into(),
            validators: vec![Validator {
                address: keeper_signer.address(),
                public_key: hex::encode([1u8; 32]),
                power: 10,
                key_index: Some(KEEPER_INDEX),
            }],
            oracles: vec![oracle.address()],
        })
        .unwrap();

        let scrutinizer =
            Scrutinizer::new(dir.path().join("scrutinizer"), app.state().clone()).unwrap();
        let keeper = with_keeper.then(|| {
            KeyKeeper::new(
                dir.path().join("keykeeper"),
                app.state().clone(),
                keeper_signer.clone(),
                app.clone(),
                KEEPER_INDEX,
            )
            .unwrap()
        });

        let voters: Vec<Signer> = (0..4).map(|_| Signer::random()).collect();
        let census =
            CensusTree::from_members(voters.iter().map(|v| v.address().as_bytes().to_vec()));

        TestNode {
            _dir: dir,
            app,
            oracle,
            keeper_signer,
            keeper,
            scrutinizer,
            voters,
            census,
            height: 0,
        }
    }

    /// Produce the next block from the given transactions plus whatever the
    /// in-process components left in the mempool
    pub fn next_block(&mut self, txs: &[Vec<u8>]) -> Vec<TxResult> {
        self.height += 1;
        self.app
            .begin_block(BlockHeader {
                chain_id: "ballotchain-test".into(),
                height: self.height,
                timestamp: self.height * 10,
            })
            .unwrap();
        let mut results = Vec::new();
        for raw in self.app.mempool_drain() {
            results.push(self.app.deliver_tx(&raw));
        }
        for raw in txs {
            results.push(self.app.deliver_tx(raw));
        }
        self.app.commit().unwrap();
        results
    }

    /// Produce empty blocks up to (and including) `height`
    pub fn advance_to(&mut self, height: i64) {
        while self.height < height {
            self.next_block(&[]);
        }
    }

    pub fn new_process_tx(
        &self,
        pid: [u8; 32],
        start_block: i64,
        number_of_blocks: i64,
        envelope_type: EnvelopeType,
    ) -> Vec<u8> {
        let mut tx = NewProcessTx {
            process_id: ProcessId::from(pid),
            entity_id: EntityId::from([2u8; 20]),
            census_root: self.census.root(),
            census_uri: None,
            start_block,
            number_of_blocks,
            envelope_type,
            mode: Default::default(),
            nonce: ballotchain::util::random_hex(32),
            signature: vec![],
        };
        tx.sign(&self.oracle).unwrap();
        Transaction::NewProcess(tx).pack().unwrap()
    }

    pub fn vote_tx(&self, voter: usize, pid: [u8; 32], package: Vec<u8>, indexes: Vec<u8>) -> Vec<u8> {
        let voter = &self.voters[voter];
        let mut tx = VoteTx {
            process_id: ProcessId::from(pid),
            nonce: ballotchain::util::random_hex(32),
            proof: self.census.prove(voter.address().as_bytes()).unwrap(),
            vote_package: package,
            encryption_key_indexes: indexes,
            signature: vec![],
        };
        tx.sign(voter).unwrap();
        Transaction::Vote(tx).pack().unwrap()
    }

    pub fn plain_vote_tx(&self, voter: usize, pid: [u8; 32], votes: Vec<u32>) -> Vec<u8> {
        self.vote_tx(
            voter,
            pid,
            VotePackage::new(votes).encode().unwrap(),
            vec![],
        )
    }
}

/// Poll until `cond` holds; the keeper and scrutinizer workers run
/// asynchronously
pub fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}
