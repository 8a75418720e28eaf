//! End-to-end scenarios: full blocks driven through the application the
//! way the consensus engine would, with the key keeper and scrutinizer
//! reacting to committed state.

mod common;

use ballotchain::{ecies, EnvelopeType, ProcessId, ProcessKeys, ProcessStatus, VotePackage};
use common::{wait_until, TestNode, KEEPER_INDEX};

const PID: [u8; 32] = [7u8; 32];

fn encrypted() -> EnvelopeType {
    EnvelopeType {
        encrypted_votes: true,
        ..Default::default()
    }
}

#[test]
fn plain_live_process_full_lifecycle() {
    let mut node = TestNode::new(false);
    let pid = ProcessId::from(PID);

    // height 1: create the process and cast three votes
    let create = node.new_process_tx(PID, 0, 10, EnvelopeType::default());
    let votes = [
        node.plain_vote_tx(0, PID, vec![0]),
        node.plain_vote_tx(1, PID, vec![1]),
        node.plain_vote_tx(2, PID, vec![1]),
    ];
    let results = node.next_block(&[
        create,
        votes[0].clone(),
        votes[1].clone(),
        votes[2].clone(),
    ]);
    assert!(results.iter().all(|r| r.is_ok()));

    // the live tally is visible right away
    wait_until(|| node.scrutinizer.vote_result(&pid).ok() == Some(vec![vec![1, 2]]));

    // at the end of the window the results are materialized and frozen
    node.advance_to(10);
    wait_until(|| node.scrutinizer.compute_result(&pid).is_err());
    assert_eq!(node.scrutinizer.vote_result(&pid).unwrap(), vec![vec![1, 2]]);

    // a later vote is out of the window
    let late = node.plain_vote_tx(3, PID, vec![0]);
    let results = node.next_block(&[late]);
    assert_eq!(results[0].code, 1);
    assert!(results[0].info.contains("outside process window"));
}

#[test]
fn encrypted_process_with_one_keeper() {
    let mut node = TestNode::new(true);
    let pid = ProcessId::from(PID);

    assert_eq!(node.keeper.as_ref().unwrap().index(), KEEPER_INDEX);

    // height 1: the oracle announces an encrypted process; the keeper
    // reacts to the commit by queueing its key publication
    node.next_block(&[node.new_process_tx(PID, 0, 10, encrypted())]);
    wait_until(|| node.app.mempool_len() > 0);

    // height 2: the publish transaction lands
    node.next_block(&[]);
    let process = node.app.state().process(&pid, true).unwrap().unwrap();
    assert!(process.key_published(KEEPER_INDEX));

    // the published slots match the deterministic derivation and the
    // commitment closes the Poseidon chain over the private key
    let expected =
        ProcessKeys::derive(&node.keeper_signer.secret_bytes(), &pid, KEEPER_INDEX).unwrap();
    assert_eq!(
        process.encryption_public_keys[KEEPER_INDEX as usize],
        expected.public_key_hex()
    );
    assert_eq!(
        process.commitment_keys[KEEPER_INDEX as usize],
        expected.commitment_key_hex()
    );

    // height 3: one envelope encrypted to the published key
    let package = VotePackage::new(vec![2]).encode().unwrap();
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(
        &hex::decode(&process.encryption_public_keys[KEEPER_INDEX as usize]).unwrap(),
    );
    let sealed = ecies::encrypt(&public_key, &package).unwrap();
    let results = node.next_block(&[node.vote_tx(0, PID, sealed, vec![KEEPER_INDEX])]);
    assert!(results.iter().all(|r| r.is_ok()));

    // private keys must stay unrevealed while the process runs
    let process = node.app.state().process(&pid, true).unwrap().unwrap();
    assert!(process.encryption_private_keys[KEEPER_INDEX as usize].is_empty());
    assert!(matches!(
        node.scrutinizer.vote_result(&pid),
        Err(ballotchain::Error::NoResultsYet)
    ));

    // reaching the end height schedules the reveal; the transaction lands
    // in the following block and the process reaches Results
    node.advance_to(10);
    wait_until(|| node.app.mempool_len() > 0);
    node.next_block(&[]);

    let process = node.app.state().process(&pid, true).unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Results);
    assert_eq!(
        process.encryption_private_keys[KEEPER_INDEX as usize],
        expected.private_key_hex()
    );
    assert_eq!(
        process.reveal_keys[KEEPER_INDEX as usize],
        expected.reveal_key_hex()
    );

    // the scrutinizer decrypts and materializes the tally
    wait_until(|| node.scrutinizer.vote_result(&pid).ok() == Some(vec![vec![0, 0, 1]]));
}

#[test]
fn canceled_live_process_keeps_tally_at_cancel_time() {
    let mut node = TestNode::new(false);
    let pid = ProcessId::from(PID);

    node.next_block(&[
        node.new_process_tx(PID, 0, 100, EnvelopeType::default()),
        node.plain_vote_tx(0, PID, vec![1]),
        node.plain_vote_tx(1, PID, vec![0]),
    ]);
    wait_until(|| node.scrutinizer.vote_result(&pid).ok() == Some(vec![vec![1, 1]]));

    node.advance_to(4);
    let mut cancel = ballotchain::CancelProcessTx {
        process_id: pid,
        nonce: ballotchain::util::random_hex(32),
        signature: vec![],
    };
    ballotchain::Signable::sign(&mut cancel, &node.oracle).unwrap();
    let results = node.next_block(&[ballotchain::Transaction::CancelProcess(cancel)
        .pack()
        .unwrap()]);
    assert!(results[0].is_ok());

    // the running tally is materialized at cancel time and further
    // recomputation refuses to run
    wait_until(|| node.scrutinizer.compute_result(&pid).is_err());
    assert_eq!(node.scrutinizer.vote_result(&pid).unwrap(), vec![vec![1, 1]]);
    assert_eq!(
        node.app.state().process(&pid, true).unwrap().unwrap().status,
        ProcessStatus::Canceled
    );
}

#[test]
fn canceled_encrypted_process_reveals_keys_early() {
    let mut node = TestNode::new(true);
    let pid = ProcessId::from(PID);

    node.next_block(&[node.new_process_tx(PID, 0, 100, encrypted())]);
    wait_until(|| node.app.mempool_len() > 0);
    node.next_block(&[]); // publish lands at height 2

    node.advance_to(4);
    let mut cancel = ballotchain::CancelProcessTx {
        process_id: pid,
        nonce: ballotchain::util::random_hex(32),
        signature: vec![],
    };
    ballotchain::Signable::sign(&mut cancel, &node.oracle).unwrap();
    node.next_block(&[ballotchain::Transaction::CancelProcess(cancel)
        .pack()
        .unwrap()]); // height 5: canceled, reveal scheduled for 6

    node.next_block(&[]); // height 6: bucket fires, reveal submitted
    wait_until(|| node.app.mempool_len() > 0);
    node.next_block(&[]); // height 7: reveal lands

    let process = node.app.state().process(&pid, true).unwrap().unwrap();
    assert!(node.height <= 7);
    assert!(!process.encryption_private_keys[KEEPER_INDEX as usize].is_empty());
    assert_eq!(process.status, ProcessStatus::Results);
}

#[test]
fn duplicate_envelope_leaves_vote_tree_untouched() {
    let mut node = TestNode::new(false);

    node.next_block(&[node.new_process_tx(PID, 0, 10, EnvelopeType::default())]);
    let first = node.plain_vote_tx(0, PID, vec![1]);
    let results = node.next_block(&[first]);
    assert!(results[0].is_ok());
    let roots_before = node.app.state().roots().unwrap();

    // the same voter again: different nonce, same nullifier
    let duplicate = node.plain_vote_tx(0, PID, vec![0]);
    let results = node.next_block(&[duplicate]);
    assert_eq!(results[0].code, 1);

    let roots_after = node.app.state().roots().unwrap();
    assert_eq!(roots_before[2], roots_after[2]);
    assert_eq!(
        node.app
            .state()
            .count_votes(&ProcessId::from(PID), true)
            .unwrap(),
        1
    );
}

#[test]
fn only_oracles_may_administrate() {
    let mut node = TestNode::new(false);

    // a non-oracle signer forges a process creation
    let stranger = ballotchain::Signer::random();
    let mut tx = ballotchain::NewProcessTx {
        process_id: ProcessId::from(PID),
        entity_id: ballotchain::EntityId::from([2u8; 20]),
        census_root: node.census.root(),
        census_uri: None,
        start_block: 0,
        number_of_blocks: 10,
        envelope_type: Default::default(),
        mode: Default::default(),
        nonce: ballotchain::util::random_hex(32),
        signature: vec![],
    };
    ballotchain::Signable::sign(&mut tx, &stranger).unwrap();
    let forged = ballotchain::Transaction::NewProcess(tx.clone()).pack().unwrap();

    let results = node.next_block(&[forged]);
    assert_eq!(results[0].code, 1);
    assert!(results[0].info.contains("not an oracle"));
    assert!(node
        .app
        .state()
        .process(&ProcessId::from(PID), true)
        .unwrap()
        .is_none());

    // the same body signed by the oracle is accepted
    ballotchain::Signable::sign(&mut tx, &node.oracle).unwrap();
    let honest = ballotchain::Transaction::NewProcess(tx).pack().unwrap();
    let results = node.next_block(&[honest]);
    assert!(results[0].is_ok());
}

#[test]
fn lost_local_state_is_rebuilt_deterministically() {
    // what lands on chain is exactly what a from-scratch derivation
    // produces, so a keeper that loses its local store between submission
    // and persist can always rebuild the same material
    let mut node = TestNode::new(true);
    node.next_block(&[node.new_process_tx(PID, 0, 10, encrypted())]);
    wait_until(|| node.app.mempool_len() > 0);
    node.next_block(&[]);

    let pid = ProcessId::from(PID);
    let process = node.app.state().process(&pid, true).unwrap().unwrap();
    let rebuilt =
        ProcessKeys::derive(&node.keeper_signer.secret_bytes(), &pid, KEEPER_INDEX).unwrap();
    assert_eq!(
        process.encryption_public_keys[KEEPER_INDEX as usize],
        rebuilt.public_key_hex()
    );
    assert_eq!(
        process.commitment_keys[KEEPER_INDEX as usize],
        rebuilt.commitment_key_hex()
    );

    // replaying the process creation is rejected and the keeper, seeing
    // its slot already filled, publishes nothing new
    let replay = node.new_process_tx(PID, 0, 10, encrypted());
    let results = node.next_block(&[replay]);
    assert_eq!(results.last().unwrap().code, 1);
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(node.app.mempool_len(), 0);
}

#[test]
fn identical_blocks_reproduce_the_app_hash() {
    // two fresh nodes with identical genesis and identical raw blocks
    // arrive at identical app hashes
    let oracle = ballotchain::Signer::from_hex(
        "2a871d0798f97d79848a013d4936a73bf4cc922c825d33c1cf7073dff6d409c6",
    )
    .unwrap();

    let build = |dir: &tempfile::TempDir| {
        let app = ballotchaind::BaseApp::open(dir.path().join("state")).unwrap();
        app.init_chain(&ballotchaind::GenesisAppState {
            chain_id: "ballotchain-test".into(),
            validators: vec![],
            oracles: vec![oracle.address()],
        })
        .unwrap();
        app
    };
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let app_a = build(&dir_a);
    let app_b = build(&dir_b);

    let mut tx = ballotchain::NewProcessTx {
        process_id: ProcessId::from(PID),
        entity_id: ballotchain::EntityId::from([2u8; 20]),
        census_root: [3u8; 32],
        census_uri: None,
        start_block: 0,
        number_of_blocks: 10,
        envelope_type: Default::default(),
        mode: Default::default(),
        nonce: ballotchain::util::random_hex(32),
        signature: vec![],
    };
    ballotchain::Signable::sign(&mut tx, &oracle).unwrap();
    let raw = ballotchain::Transaction::NewProcess(tx).pack().unwrap();

    let header = ballotchaind::BlockHeader {
        chain_id: "ballotchain-test".into(),
        height: 1,
        timestamp: 10,
    };
    app_a.begin_block(header.clone()).unwrap();
    assert!(app_a.deliver_tx(&raw).is_ok());
    let hash_a = app_a.commit().unwrap();

    app_b.begin_block(header).unwrap();
    assert!(app_b.deliver_tx(&raw).is_ok());
    let hash_b = app_b.commit().unwrap();

    assert_eq!(hash_a, hash_b);
    assert_ne!(hash_a, [0u8; 32]);
}

#[test]
fn query_surface_reads_committed_state() {
    let mut node = TestNode::new(false);
    node.next_block(&[
        node.new_process_tx(PID, 0, 10, EnvelopeType::default()),
        node.plain_vote_tx(0, PID, vec![1]),
    ]);

    let pid_hex = ProcessId::from(PID).to_hex();
    let response = node.app.query(
        format!(r#"{{"method":"getProcess","processId":"{pid_hex}"}}"#).as_bytes(),
    );
    assert_eq!(response.code, 0);
    let process: ballotchain::Process = serde_cbor::from_slice(&response.value).unwrap();
    assert_eq!(process.process_id, ProcessId::from(PID));

    let response = node.app.query(
        format!(r#"{{"method":"getEnvelopeHeight","processId":"{pid_hex}"}}"#).as_bytes(),
    );
    assert_eq!(response.code, 0);
    let count: u64 = serde_cbor::from_slice(&response.value).unwrap();
    assert_eq!(count, 1);

    let response = node.app.query(
        format!(r#"{{"method":"getEnvelopeList","processId":"{pid_hex}"}}"#).as_bytes(),
    );
    let nullifiers: Vec<String> = serde_cbor::from_slice(&response.value).unwrap();
    assert_eq!(nullifiers.len(), 1);

    let response = node.app.query(
        format!(
            r#"{{"method":"getEnvelopeStatus","processId":"{pid_hex}","nullifier":"{}"}}"#,
            nullifiers[0]
        )
        .as_bytes(),
    );
    assert_eq!(response.code, 0);

    let response = node.app.query(br#"{"method":"getBlockHeight"}"#);
    let height: i64 = serde_cbor::from_slice(&response.value).unwrap();
    assert_eq!(height, 1);
}
