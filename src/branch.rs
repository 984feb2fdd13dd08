//! Branch Resolver (spec §4.2): maps a logical path plus an intent to a
//! concrete path and an origin tag, triggering copy-up when required.

use crate::error::{Error, Result};
use crate::host::HostFs;
use crate::path::{BranchConfig, ConcretePath, LogicalPath, PathMapper, SpecialKind};
use crate::whiteout::WhiteoutManager;

/// Why resolution is being performed, controlling which branch(es) are
/// consulted and whether a miss on RO triggers copy-up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Intent {
    /// RW shadows RO; fall through to RO read-only if RW is absent.
    Any,
    /// Consult only the RO branch (used by the Directory Merger).
    MustRO,
    /// Consult only the RW branch (used by the Directory Merger).
    MustRW,
    /// Like `Any`, but an RO-only hit is copied up before returning.
    CreateCopyup,
}

/// Which branch satisfied a resolution, and whether copy-up just ran.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OriginTag {
    ReadOnly,
    ReadWrite,
    ReadWriteCopyup,
}

/// Callback the resolver uses to perform copy-up without owning a
/// [`crate::copyup::CopyupEngine`] directly (avoids a module cycle: the
/// copy-up engine itself never needs to resolve a path through here).
#[async_trait::async_trait]
pub trait Copyup: Send + Sync {
    async fn copyup(
        &self,
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<ConcretePath>;
}

/// Pure-ish resolution logic over a [`HostFs`] (spec §4.2 algorithm).
pub struct BranchResolver;

impl BranchResolver {
    pub async fn find_file(
        host: &dyn HostFs,
        roots: &BranchConfig,
        copyup: &dyn Copyup,
        logical: &LogicalPath,
        intent: Intent,
    ) -> Result<(ConcretePath, OriginTag)> {
        // Step 1: a whiteout means the entry is logically deleted,
        // regardless of RO presence (spec I1).
        if WhiteoutManager::exists(host, roots, logical).await? {
            return Err(Error::NotFound);
        }

        // Step 2: RW always shadows RO, unless the caller explicitly wants
        // the RO side (used by the directory merger to see both sides).
        if intent != Intent::MustRO {
            let rw = PathMapper::to_rw(roots, logical)?;
            if host.lstat(rw.as_path()).await.is_ok() {
                return Ok((rw, OriginTag::ReadWrite));
            }
        }

        if intent == Intent::MustRW {
            return Err(Error::NotFound);
        }

        // Step 3: fall back to RO.
        let ro = PathMapper::to_ro(roots, logical)?;
        if host.lstat(ro.as_path()).await.is_ok() {
            return match intent {
                Intent::Any | Intent::MustRO => Ok((ro, OriginTag::ReadOnly)),
                Intent::CreateCopyup => {
                    let rw = copyup.copyup(host, roots, logical).await?;
                    Ok((rw, OriginTag::ReadWriteCopyup))
                }
                Intent::MustRW => unreachable!("handled above"),
            };
        }

        Err(Error::NotFound)
    }
}

/// Compute the `.wh.`/`.me.` sidecar path for `logical`, exposed for
/// callers that need it without re-deriving it (e.g. the dispatcher's
/// post-create whiteout cleanup).
pub fn special_path(
    roots: &BranchConfig,
    logical: &LogicalPath,
    kind: SpecialKind,
) -> Result<ConcretePath> {
    PathMapper::to_special(roots, logical, kind)
}
