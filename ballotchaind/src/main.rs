use ballotchaind::{BaseApp, Config, GenesisAppState, KeyKeeper, Scrutinizer};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(address = %config.signer.address(), "starting ballotchain node");

    let app = BaseApp::open(config.data_dir.join("state")).expect("cannot open application state");

    let info = app.info().expect("cannot read application state");
    if info.last_block_height == 0 {
        let genesis = match &config.genesis_path {
            Some(path) => {
                let raw = std::fs::read(path).expect("cannot read genesis file");
                GenesisAppState::from_json(&raw).expect("cannot parse genesis file")
            }
            None => GenesisAppState {
                chain_id: config.chain_id.clone(),
                ..Default::default()
            },
        };
        app.init_chain(&genesis).expect("cannot initialize chain");
    }

    let _scrutinizer = Scrutinizer::new(
        config.data_dir.join("scrutinizer"),
        app.state().clone(),
    )
    .expect("cannot start scrutinizer");

    let keykeeper = config.keykeeper_index.map(|index| {
        let keeper = KeyKeeper::new(
            config.data_dir.join("keykeeper"),
            app.state().clone(),
            config.signer.clone(),
            app.clone(),
            index,
        )
        .expect("cannot start key keeper");
        // retry reveals that were lost before the last shutdown
        keeper
            .reveal_unpublished()
            .expect("key keeper rescue failed");
        keeper.print_info(Duration::from_secs(60));
        keeper
    });

    if let Some(keeper) = &keykeeper {
        info!(index = keeper.index(), "key keeper enabled");
    }

    // the consensus engine drives the application from here: block
    // production, replay and the query surface all arrive through the
    // BaseApp hooks
    info!("application ready, waiting for the consensus engine");
    loop {
        std::thread::park();
    }
}
