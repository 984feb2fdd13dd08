//! Copy-up Engine (spec §4.5): materialises an RO file onto the RW branch,
//! consuming any deported-metadata sidecar in the process.

use tracing::{debug, warn};

use crate::error::Result;
use crate::host::{AttrChange, HostFs};
use crate::me::{merge_attr, MeStore, VALID_MODES_MASK};
use crate::path::{BranchConfig, ConcretePath, LogicalPath, PathMapper};

/// Bytes copied per `read_at`/`write_at` round trip during copy-up.
const COPY_CHUNK: u32 = 1 << 20;

pub struct CopyupEngine;

impl CopyupEngine {
    /// `copyup(logical) -> ConcretePath | Error` (spec §4.5).
    pub async fn copyup(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<ConcretePath> {
        let ro = PathMapper::to_ro(roots, logical)?;
        let ro_stat = host.lstat(ro.as_path()).await?;

        Self::find_path(host, roots, logical).await?;

        let rw = PathMapper::to_rw(roots, logical)?;
        host.create_file(rw.as_path(), ro_stat.mode & VALID_MODES_MASK, false).await?;

        debug!(path = %rw.as_path().display(), "copy-up: materialising RW file");

        if let Err(err) = Self::copy_data_and_attrs(host, roots, logical, &ro, &rw).await {
            // Step 6: unlink the partial RW file on any failure past
            // creation; the ME file is untouched unless it was already
            // committed to the RW inode (handled inside the helper).
            if let Err(rollback_err) = host.unlink(rw.as_path()).await {
                warn!(
                    path = %rw.as_path().display(),
                    error = %rollback_err,
                    "copy-up rollback failed to remove partial RW file"
                );
            }
            return Err(err);
        }

        Ok(rw)
    }

    async fn copy_data_and_attrs(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
        ro: &ConcretePath,
        rw: &ConcretePath,
    ) -> Result<()> {
        let ro_stat = host.lstat(ro.as_path()).await?;

        let mut offset = 0u64;
        loop {
            let chunk = host.read_at(ro.as_path(), offset, COPY_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            host.write_at(rw.as_path(), offset, &chunk).await?;
            offset += len as u64;
            if len < COPY_CHUNK as usize {
                break;
            }
        }

        match MeStore::find_me_opt(host, roots, logical).await? {
            Some((_, me_stat)) => {
                let merged = merge_attr(&ro_stat, &me_stat);
                let change = AttrChange {
                    mode: Some(merged.mode & VALID_MODES_MASK),
                    uid: Some(merged.uid),
                    gid: Some(merged.gid),
                    size: None,
                    atime: Some(merged.atime),
                    mtime: Some(merged.mtime),
                };
                host.notify_change(rw.as_path(), &change).await?;
                // Only now has the merged attribute set been committed to
                // the new RW inode (spec I2) — safe to drop the ME file.
                MeStore::delete_me(host, roots, logical).await?;
            }
            None => {
                let change = AttrChange {
                    mode: Some(ro_stat.mode & VALID_MODES_MASK),
                    uid: Some(ro_stat.uid),
                    gid: Some(ro_stat.gid),
                    size: None,
                    atime: Some(ro_stat.atime),
                    mtime: Some(ro_stat.mtime),
                };
                host.notify_change(rw.as_path(), &change).await?;
            }
        }

        Ok(())
    }

    /// `find_path(logical)`: walk the logical path's ancestor directories
    /// and materialise any that are missing on RW, copying the RO
    /// directory's attributes when RO has a counterpart, or creating a
    /// fresh directory otherwise (spec §4.5).
    pub async fn find_path(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<()> {
        let mut chain = Vec::new();
        let (mut parent, _) = logical.split()?;
        while !parent.is_root() {
            chain.push(parent.clone());
            let (next, _) = parent.split()?;
            parent = next;
        }
        chain.reverse();

        for dir in chain {
            let rw_dir = PathMapper::to_rw(roots, &dir)?;
            if host.lstat(rw_dir.as_path()).await.is_ok() {
                continue;
            }
            let ro_dir = PathMapper::to_ro(roots, &dir)?;
            match host.lstat(ro_dir.as_path()).await {
                Ok(ro_stat) => {
                    host.mkdir(rw_dir.as_path(), ro_stat.mode & VALID_MODES_MASK).await?;
                    let change = AttrChange {
                        mode: None,
                        uid: Some(ro_stat.uid),
                        gid: Some(ro_stat.gid),
                        size: None,
                        atime: Some(ro_stat.atime),
                        mtime: Some(ro_stat.mtime),
                    };
                    // Best-effort: a failure here leaves a freshly
                    // created directory with default ownership, which is
                    // still a usable (if imprecise) parent chain entry.
                    let _ = host.notify_change(rw_dir.as_path(), &change).await;
                }
                Err(_) => {
                    host.mkdir(rw_dir.as_path(), 0o755).await?;
                }
            }
        }

        Ok(())
    }
}

/// Wires [`CopyupEngine`] into the [`crate::branch::Copyup`] callback the
/// Branch Resolver invokes on a `CreateCopyup` miss, without the resolver
/// depending on this module directly (see `branch.rs` for why).
pub struct StdCopyup;

#[async_trait::async_trait]
impl crate::branch::Copyup for StdCopyup {
    async fn copyup(
        &self,
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<ConcretePath> {
        CopyupEngine::copyup(host, roots, logical).await
    }
}
