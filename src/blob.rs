//! Content-addressed blob staging.
//!
//! A blob is uploaded in chunks. Its key is always the SHA-256 of the seed
//! followed by every byte appended so far, so a client can check each
//! chunk landed by recomputing the digest locally. Every append re-keys
//! the entry; the previous key stops resolving.
//!
//! Flow: `begin(seed)` → N × `append(key, bytes)` → `commit(key, dest)`

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hmac_sha256::Hash;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::BlobError;

/// Running digest identifying a pending blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey(pub [u8; 32]);

impl BlobKey {
    /// Key a client should expect after sending `seed` then `chunks`.
    pub fn expected(seed: &[u8], chunks: &[&[u8]]) -> Self {
        let mut hash = Hash::new();
        hash.update(seed);
        for chunk in chunks {
            hash.update(chunk);
        }
        Self(hash.finalize())
    }
}

struct PendingBlob {
    file: NamedTempFile,
    hash: Hash,
}

/// Staging area for in-flight uploads.
pub struct BlobStore {
    dir: PathBuf,
    pending: Mutex<HashMap<BlobKey, PendingBlob>>,
}

impl BlobStore {
    /// Open the staging directory, discarding anything a previous run left.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let dir = dir.into();
        reset_dir(&dir)?;
        info!("BLOB: staging in {}", dir.display());
        Ok(Self {
            dir,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Allocate a staging file primed with `seed`.
    pub fn begin(&self, seed: &[u8]) -> Result<BlobKey, BlobError> {
        let mut hash = Hash::new();
        hash.update(seed);
        let key = BlobKey(hash.clone().finalize());

        let mut pending = self.pending.lock();
        if pending.contains_key(&key) {
            warn!("BLOB: seed digest already pending");
            return Err(BlobError::KeyCollision);
        }
        let file = NamedTempFile::new_in(&self.dir)?;
        pending.insert(key, PendingBlob { file, hash });
        Ok(key)
    }

    /// Append `data` to the blob under `key`.
    ///
    /// Returns `Ok(None)` when no blob is pending under `key`. A failed
    /// write drops the entry so no key ever describes a partial file.
    pub fn append(&self, key: &BlobKey, data: &[u8]) -> Result<Option<BlobKey>, BlobError> {
        let mut pending = self.pending.lock();
        let Some(mut entry) = pending.remove(key) else {
            return Ok(None);
        };

        let mut next = entry.hash.clone();
        next.update(data);
        let next_key = BlobKey(next.clone().finalize());

        if pending.contains_key(&next_key) {
            pending.insert(*key, entry);
            warn!("BLOB: append would collide with another pending blob");
            return Err(BlobError::KeyCollision);
        }

        if let Err(e) = entry.file.write_all(data) {
            warn!("BLOB: write failed, dropping blob: {e}");
            return Err(e.into());
        }

        entry.hash = next;
        pending.insert(next_key, entry);
        Ok(Some(next_key))
    }

    /// Flush the blob under `key` to disk and move it to `dest`.
    pub fn commit(&self, key: &BlobKey, dest: &Path) -> Result<(), BlobError> {
        let entry = self.pending.lock().remove(key).ok_or(BlobError::UnknownKey)?;
        let mut file = entry.file;
        file.flush()?;
        file.as_file().sync_all()?;

        if let Err(e) = file.persist(dest) {
            // rename(2) cannot cross filesystems; fall back to a copy
            debug!("BLOB: rename to {} failed ({}), copying", dest.display(), e.error);
            fs::copy(e.file.path(), dest)?;
        }
        debug!("BLOB: committed {}", dest.display());
        Ok(())
    }

    /// Drop every pending blob and recreate the staging directory empty.
    pub fn purge_all(&self) -> Result<(), BlobError> {
        let mut pending = self.pending.lock();
        let dropped = pending.len();
        pending.clear();
        reset_dir(&self.dir)?;
        info!("BLOB: purged {} pending blobs", dropped);
        Ok(())
    }
}

/// Remove `dir` if present and recreate it empty.
pub(crate) fn reset_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::open(tmp.path().join("blobs")).unwrap();
        (tmp, store)
    }

    #[test]
    fn key_chain_tracks_all_bytes() {
        let (_tmp, store) = store();
        let k0 = store.begin(b"seed").unwrap();
        assert_eq!(k0, BlobKey::expected(b"seed", &[]));

        let k1 = store.append(&k0, b"hello ").unwrap().unwrap();
        let k2 = store.append(&k1, b"world").unwrap().unwrap();
        assert_eq!(k2, BlobKey::expected(b"seed", &[b"hello ", b"world"]));

        // The superseded key no longer resolves.
        assert_eq!(store.append(&k0, b"x").unwrap(), None);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn commit_moves_exact_bytes() {
        let (tmp, store) = store();
        let k = store.begin(b"s").unwrap();
        let k = store.append(&k, b"abc").unwrap().unwrap();
        let k = store.append(&k, b"def").unwrap().unwrap();

        let dest = tmp.path().join("out.bin");
        store.commit(&k, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"abcdef");
        assert_eq!(store.commit(&k, &dest), Err(BlobError::UnknownKey));
    }

    #[test]
    fn identical_seed_collides() {
        let (_tmp, store) = store();
        store.begin(b"same").unwrap();
        assert_eq!(store.begin(b"same"), Err(BlobError::KeyCollision));
    }

    #[test]
    fn append_collision_keeps_old_key() {
        let (_tmp, store) = store();
        // "ab" + "c" and "a" + "bc" reach the same digest.
        let a = store.begin(b"ab").unwrap();
        store.append(&a, b"c").unwrap().unwrap();
        let b = store.begin(b"a").unwrap();

        assert_eq!(store.append(&b, b"bc"), Err(BlobError::KeyCollision));
        assert!(store.append(&b, b"x").unwrap().is_some());
    }

    #[test]
    fn purge_empties_staging_dir() {
        let (_tmp, store) = store();
        let k = store.begin(b"p").unwrap();
        store.append(&k, b"data").unwrap();
        store.purge_all().unwrap();

        assert_eq!(store.pending_count(), 0);
        assert!(store.dir().exists());
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 0);
    }
}
