//! Whiteout Manager (spec §4.3): creates, detects and removes whiteout
//! marker files on the RW branch.

use tracing::trace;

use crate::copyup::CopyupEngine;
use crate::error::Result;
use crate::host::HostFs;
use crate::path::{BranchConfig, LogicalPath, PathMapper, SpecialKind};

pub struct WhiteoutManager;

impl WhiteoutManager {
    /// Whether a whiteout for `logical` exists on the RW branch.
    pub async fn exists(host: &dyn HostFs, roots: &BranchConfig, logical: &LogicalPath) -> Result<bool> {
        if logical.is_root() {
            // The root can never be whited out: there is no parent
            // directory component to host a `.wh.` sidecar for it.
            return Ok(false);
        }
        let wh = PathMapper::to_special(roots, logical, SpecialKind::Whiteout)?;
        Ok(host.lstat(wh.as_path()).await.is_ok())
    }

    /// Materialise the `.wh.` marker for `logical`, creating intermediate
    /// RW directories as needed (spec §4.3; reuses the Copy-up Engine's
    /// `find_path` the same way `me.rs::create_me` and `copyup.rs::copyup`
    /// do). Spec I1: only valid when `logical` exists on RO; callers are
    /// expected to have established that already.
    pub async fn create_whiteout(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<()> {
        CopyupEngine::find_path(host, roots, logical).await?;
        let wh = PathMapper::to_special(roots, logical, SpecialKind::Whiteout)?;
        trace!(path = %wh.as_path().display(), "creating whiteout");
        host.create_file(wh.as_path(), 0o000, false).await?;
        Ok(())
    }

    /// Idempotent removal: silently succeeds when no whiteout is present
    /// (spec L1). Invoked by any operation that re-creates a logically
    /// deleted name.
    pub async fn unlink_whiteout(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<()> {
        if logical.is_root() {
            return Ok(());
        }
        let wh = PathMapper::to_special(roots, logical, SpecialKind::Whiteout)?;
        match host.unlink(wh.as_path()).await {
            Ok(()) => {
                trace!(path = %wh.as_path().display(), "removed whiteout");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
