//! Content hash records, which let a file that was touched but not modified
//! keep the time its content last changed.
//!
//! Each dependency checked with hashing gets a 28 byte record under the cache
//! directory, mirroring its absolute path: the time as a little-endian f64
//! followed by the SHA-1 digest of the content.  The mtime of the record
//! itself says when the content was last verified.

use crate::fs::{create_parent_dir, stat, MTime};
use anyhow::anyhow;
use filetime::FileTime;
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

const RECORD_LEN: usize = 28;
const CHUNK_LEN: usize = 64 * 1024;

type Hash = [u8; 20];

#[derive(Debug, PartialEq)]
struct Record {
    time: f64,
    hash: Hash,
}

impl Record {
    fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[..8].copy_from_slice(&self.time.to_le_bytes());
        buf[8..].copy_from_slice(&self.hash);
        buf
    }

    fn decode(buf: &[u8]) -> Option<Record> {
        if buf.len() != RECORD_LEN {
            return None;
        }
        let mut time = [0u8; 8];
        time.copy_from_slice(&buf[..8]);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&buf[8..]);
        Some(Record {
            time: f64::from_le_bytes(time),
            hash,
        })
    }
}

fn hash_file(path: &Path) -> std::io::Result<Hash> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_LEN];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize());
    Ok(hash)
}

/// The on-disk store of hash records.
#[derive(Debug, Clone)]
pub struct HashCache {
    dir: PathBuf,
}

impl HashCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        HashCache { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the record for an absolute path lives.  The path is normalized
    /// lexically first, so `a/../b` and `b` share a record.
    pub fn record_path(&self, path: &Path) -> PathBuf {
        let mut rel = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    rel.pop();
                }
                Component::Normal(name) => rel.push(name),
            }
        }
        self.dir.join(rel)
    }

    fn write(&self, record_path: &Path, record: &Record) -> std::io::Result<()> {
        create_parent_dir(record_path)?;
        std::fs::write(record_path, record.encode())
    }

    /// Hashes the file and writes a fresh record stamped with its mtime.
    fn refresh(&self, path: &Path, record_path: &Path, mtime: f64) -> anyhow::Result<f64> {
        let hash = hash_file(path).map_err(|err| anyhow!("hash {}: {}", path.display(), err))?;
        self.write(record_path, &Record { time: mtime, hash })
            .map_err(|err| anyhow!("write {}: {}", record_path.display(), err))?;
        Ok(mtime)
    }

    /// The effective time of an existing file whose mtime is `mtime`: the
    /// time its content last changed, as far as the records know.
    pub fn time_of(&self, path: &Path, mtime: f64) -> anyhow::Result<f64> {
        let record_path = self.record_path(path);
        let record_mtime = match stat(&record_path) {
            Ok(MTime::Stamp(t)) => t,
            _ => return self.refresh(path, &record_path, mtime),
        };
        let record = match std::fs::read(&record_path)
            .ok()
            .and_then(|buf| Record::decode(&buf))
        {
            Some(record) => record,
            None => return self.refresh(path, &record_path, mtime),
        };
        if record_mtime > mtime {
            return Ok(record.time);
        }
        let hash = hash_file(path).map_err(|err| anyhow!("hash {}: {}", path.display(), err))?;
        if hash != record.hash {
            self.write(&record_path, &Record { time: mtime, hash })
                .map_err(|err| anyhow!("write {}: {}", record_path.display(), err))?;
            return Ok(mtime);
        }
        filetime::set_file_mtime(&record_path, FileTime::now())
            .map_err(|err| anyhow!("touch {}: {}", record_path.display(), err))?;
        Ok(mtime.min(record.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::secs_of;

    fn now() -> f64 {
        secs_of(FileTime::now())
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn record_layout() {
        let record = Record {
            time: 1.5,
            hash: [7; 20],
        };
        let buf = record.encode();
        assert_eq!(&buf[..8], &1.5f64.to_le_bytes());
        assert_eq!(Record::decode(&buf), Some(record));
        assert_eq!(Record::decode(&buf[1..]), None);
    }

    #[test]
    fn record_path_mirrors_absolute_path() {
        let cache = HashCache::new("/cache");
        assert_eq!(
            cache.record_path(Path::new("/src/lib.c")),
            Path::new("/cache/src/lib.c")
        );
    }

    #[test]
    fn record_path_drops_parent_components() {
        let cache = HashCache::new("/cache");
        assert_eq!(
            cache.record_path(Path::new("/work/sub/../lib.c")),
            Path::new("/cache/work/lib.c")
        );
        assert_eq!(
            cache.record_path(Path::new("/work/./../../x")),
            Path::new("/cache/x")
        );
    }

    #[test]
    fn touched_file_keeps_old_time() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = HashCache::new(dir.path().join("cache"));
        let path = dir.path().join("lib.c");
        std::fs::write(&path, "int x;")?;
        set_mtime(&path, 1_000);

        assert_eq!(cache.time_of(&path, 1_000.0)?, 1_000.0);
        let record_path = cache.record_path(&path);
        assert_eq!(std::fs::metadata(&record_path)?.len(), RECORD_LEN as u64);

        // Touch without modifying, newer than the record.
        let later = now() as i64 + 100;
        set_mtime(&path, later);
        assert_eq!(cache.time_of(&path, later as f64)?, 1_000.0);
        let record = Record::decode(&std::fs::read(&record_path)?).unwrap();
        assert_eq!(record.hash, hash_file(&path)?);
        assert_eq!(record.time, 1_000.0);

        // Modify: the new mtime wins.
        std::fs::write(&path, "int y;")?;
        let latest = later + 100;
        set_mtime(&path, latest);
        assert_eq!(cache.time_of(&path, latest as f64)?, latest as f64);
        Ok(())
    }

    #[test]
    fn corrupt_record_is_rewritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = HashCache::new(dir.path().join("cache"));
        let path = dir.path().join("f");
        std::fs::write(&path, "x")?;
        let record_path = cache.record_path(&path);
        create_parent_dir(&record_path)?;
        std::fs::write(&record_path, "short")?;
        assert_eq!(cache.time_of(&path, 5.0)?, 5.0);
        assert_eq!(std::fs::metadata(&record_path)?.len(), RECORD_LEN as u64);
        Ok(())
    }

    #[test]
    fn fresh_record_short_circuits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = HashCache::new(dir.path().join("cache"));
        let path = dir.path().join("f");
        std::fs::write(&path, "x")?;
        set_mtime(&path, 1_000);
        cache.time_of(&path, 1_000.0)?;
        // The record is newer than the file, so its time is trusted even if
        // the content changed behind an unchanged mtime.
        std::fs::write(&path, "y")?;
        set_mtime(&path, 1_000);
        assert_eq!(cache.time_of(&path, 1_000.0)?, 1_000.0);
        Ok(())
    }
}
