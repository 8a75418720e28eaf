use ballotchain::{keccak256, Error};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// One authenticated key-value tree. Committed entries live in a sled tree;
/// a block-scoped staging overlay collects the writes of the block in
/// flight. `None` in the overlay marks a pending delete.
///
/// The root is the keccak256 Merkle root over the sorted leaf hashes
/// `keccak256(key ‖ value)`; the empty tree has the zero root.
pub struct StateTree {
    tree: sled::Tree,
    staging: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    root_cache: Mutex<Option<[u8; 32]>>,
}

pub const ZERO_ROOT: [u8; 32] = [0u8; 32];

fn storage_err(err: sled::Error) -> Error {
    Error::Storage(err.to_string())
}

impl StateTree {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, Error> {
        let tree = db.open_tree(name).map_err(storage_err)?;
        Ok(StateTree {
            tree,
            staging: Mutex::new(BTreeMap::new()),
            root_cache: Mutex::new(None),
        })
    }

    /// Read a value. With `committed = false` the staging overlay shadows
    /// the committed entry.
    pub fn get(&self, key: &[u8], committed: bool) -> Result<Option<Vec<u8>>, Error> {
        if !committed {
            if let Some(staged) = self.staging.lock().get(key) {
                return Ok(staged.clone());
            }
        }
        Ok(self
            .tree
            .get(key)
            .map_err(storage_err)?
            .map(|v| v.to_vec()))
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.staging.lock().insert(key, Some(value));
    }

    pub fn delete(&self, key: Vec<u8>) {
        self.staging.lock().insert(key, None);
    }

    /// All entries under `prefix` in ascending key order, staging merged
    /// unless `committed`
    pub fn iter_prefix(
        &self,
        prefix: &[u8],
        committed: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for entry in self.tree.scan_prefix(prefix) {
            let (key, value) = entry.map_err(storage_err)?;
            merged.insert(key.to_vec(), Some(value.to_vec()));
        }
        if !committed {
            for (key, value) in self.staging.lock().iter() {
                if key.starts_with(prefix) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    pub fn count_prefix(&self, prefix: &[u8], committed: bool) -> Result<usize, Error> {
        Ok(self.iter_prefix(prefix, committed)?.len())
    }

    /// Flush the staging overlay into the committed tree and recompute the
    /// root. Any persistence failure here is fatal to the caller.
    pub fn commit(&self) -> Result<[u8; 32], Error> {
        let staged = std::mem::take(&mut *self.staging.lock());
        for (key, value) in staged {
            match value {
                Some(value) => {
                    self.tree.insert(key, value).map_err(storage_err)?;
                }
                None => {
                    self.tree.remove(key).map_err(storage_err)?;
                }
            }
        }
        let root = self.compute_root()?;
        *self.root_cache.lock() = Some(root);
        Ok(root)
    }

    pub fn rollback(&self) {
        self.staging.lock().clear();
    }

    pub fn staged_len(&self) -> usize {
        self.staging.lock().len()
    }

    /// The committed root
    pub fn root(&self) -> Result<[u8; 32], Error> {
        if let Some(root) = *self.root_cache.lock() {
            return Ok(root);
        }
        let root = self.compute_root()?;
        *self.root_cache.lock() = Some(root);
        Ok(root)
    }

    fn compute_root(&self) -> Result<[u8; 32], Error> {
        // sled iterates in ascending key order, so the leaf sequence is
        // deterministic across nodes
        let mut leaves = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(storage_err)?;
            let mut buf = Vec::with_capacity(key.len() + value.len());
            buf.extend_from_slice(&key);
            buf.extend_from_slice(&value);
            leaves.push(keccak256(&buf));
        }
        Ok(merkle_root(&leaves))
    }
}

fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return ZERO_ROOT;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            let a = level[i];
            let b = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&a);
            buf[32..].copy_from_slice(&b);
            next.push(keccak256(&buf));
            i += 2;
        }
        level = next;
    }
    level[0]
}
