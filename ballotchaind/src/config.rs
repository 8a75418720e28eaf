use ballotchain::Signer;
use std::env::var;
use std::path::PathBuf;

/// Node configuration, read from the environment
pub struct Config {
    pub data_dir: PathBuf,
    pub signer: Signer,
    pub chain_id: String,
    /// Key-keeper slot this node serves, if any
    pub keykeeper_index: Option<u8>,
    /// Path to the genesis document consumed on first start
    pub genesis_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir: PathBuf = match var("BALLOTCHAIN_DATA_DIR") {
            Ok(val) => val.into(),
            Err(_e) => "./ballotchain-data".into(),
        };

        let signer = match var("BALLOTCHAIN_SECRET_KEY") {
            Ok(val) => match Signer::from_hex(&val) {
                Ok(signer) => signer,
                Err(e) => panic!("BALLOTCHAIN_SECRET_KEY is not a valid key: {e}"),
            },
            Err(_e) => {
                panic!("BALLOTCHAIN_SECRET_KEY environment variable must be set")
            }
        };

        let chain_id = var("BALLOTCHAIN_CHAIN_ID").unwrap_or_else(|_| "0x2".to_string());

        let keykeeper_index = match var("BALLOTCHAIN_KEYKEEPER_INDEX") {
            Ok(val) => match val.parse::<u8>() {
                Ok(index) => Some(index),
                Err(_e) => panic!("BALLOTCHAIN_KEYKEEPER_INDEX must be a small integer"),
            },
            Err(_e) => None,
        };

        let genesis_path = var("BALLOTCHAIN_GENESIS").ok().map(PathBuf::from);

        Config {
            data_dir,
            signer,
            chain_id,
            keykeeper_index,
            genesis_path,
        }
    }
}
