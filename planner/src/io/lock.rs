//! Advisory lock against two processes driving one workspace.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::io::workspace::{Area, LOCK_FILE};

/// Held for the lifetime of a mutating command; removed on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(Area::Control.path(LOCK_FILE));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("write lock {}", path.display()))?;
                debug!(path = %path.display(), "workspace lock acquired");
                Ok(Self { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                bail!(
                    "workspace is locked by pid {} ({}); remove the file if that process is gone",
                    holder.trim(),
                    path.display()
                )
            }
            Err(err) => Err(err).with_context(|| format!("create lock {}", path.display())),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(err = %err, path = %self.path.display(), "failed to release workspace lock");
        }
    }
}
