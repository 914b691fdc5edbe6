use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a group's image cache. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn acquire(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create {}", cache_dir.display()))?;
        let path = cache_dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "image cache {} is locked by another qqsum run",
                cache_dir.display()
            )
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::CacheLock;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("group_1");

        let first = CacheLock::acquire(&dir).expect("first lock");
        assert!(first.path().exists());
        let err = CacheLock::acquire(&dir).expect_err("already locked");
        assert!(err.to_string().contains("locked by another qqsum run"));

        drop(first);
        CacheLock::acquire(&dir).expect("lock after release");
    }
}
