//! ME Store (spec §4.4): deported-metadata sidecars for RO files whose
//! owner, times or alterable mode bits have been changed without a
//! copy-up, plus the attribute merge rule those sidecars feed into.

use tracing::trace;

use crate::copyup::CopyupEngine;
use crate::error::{Error, Result};
use crate::host::{AttrChange, HostFs, Stat};
use crate::path::{BranchConfig, ConcretePath, LogicalPath, PathMapper, SpecialKind};

/// Alterable permission/special bits: rwx for user/group/other plus
/// setuid/setgid/sticky (spec §3). Everything outside this mask is the
/// file-type bits, which an ME file never carries.
pub const VALID_MODES_MASK: u32 = 0o7777;

pub struct MeStore;

impl MeStore {
    /// `find_me(logical) -> (ConcretePath, Stat) | NotFound` (spec §4.4).
    pub async fn find_me(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<(ConcretePath, Stat)> {
        let me = PathMapper::to_special(roots, logical, SpecialKind::Me)?;
        let stat = host.lstat(me.as_path()).await.map_err(|_| Error::NotFound)?;
        Ok((me, stat))
    }

    /// Like [`Self::find_me`], but treats absence as `None` rather than an
    /// error — the shape most call sites in the Attribute Engine and
    /// Copy-up Engine actually want.
    pub async fn find_me_opt(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<Option<(ConcretePath, Stat)>> {
        match Self::find_me(host, roots, logical).await {
            Ok(found) => Ok(Some(found)),
            Err(Error::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create a zero-size ME file carrying `stat`'s owner/times/alterable
    /// mode. Ensures the RW parent directory chain exists first, reusing
    /// the Copy-up Engine's materialiser (spec §4.4).
    pub async fn create_me(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
        stat: &Stat,
    ) -> Result<()> {
        CopyupEngine::find_path(host, roots, logical).await?;
        let me = PathMapper::to_special(roots, logical, SpecialKind::Me)?;
        host.create_file(me.as_path(), stat.mode & VALID_MODES_MASK, false).await?;
        let change = AttrChange {
            mode: Some(stat.mode & VALID_MODES_MASK),
            uid: Some(stat.uid),
            gid: Some(stat.gid),
            size: None,
            atime: Some(stat.atime),
            mtime: Some(stat.mtime),
        };
        host.notify_change(me.as_path(), &change).await?;
        trace!(path = %me.as_path().display(), "created ME sidecar");
        Ok(())
    }

    /// Apply `requested` (only the fields the caller actually wants
    /// changed) to the ME file for `logical`, creating it first from
    /// `data_stat` if it doesn't exist yet, so the merge rule in
    /// [`merge_attr`] always has a complete record to read (spec §4.4).
    pub async fn set_me(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
        data_stat: &Stat,
        requested: &AttrChange,
    ) -> Result<()> {
        match Self::find_me(host, roots, logical).await {
            Ok((me, _existing)) => {
                host.notify_change(me.as_path(), requested).await?;
                Ok(())
            }
            Err(Error::NotFound) => {
                let baseline = Stat {
                    kind: data_stat.kind,
                    mode: requested.mode.unwrap_or(data_stat.mode & VALID_MODES_MASK)
                        | (data_stat.mode & !VALID_MODES_MASK),
                    nlink: data_stat.nlink,
                    uid: requested.uid.unwrap_or(data_stat.uid),
                    gid: requested.gid.unwrap_or(data_stat.gid),
                    size: data_stat.size,
                    atime: requested.atime.unwrap_or(data_stat.atime),
                    mtime: requested.mtime.unwrap_or(data_stat.mtime),
                    ctime: data_stat.ctime,
                };
                Self::create_me(host, roots, logical, &baseline).await
            }
            Err(err) => Err(err),
        }
    }

    /// Delete the ME file for `logical`, if present (used after copy-up
    /// consumes it, and by `unlink` when removing an ME-carrying entry).
    pub async fn delete_me(
        host: &dyn HostFs,
        roots: &BranchConfig,
        logical: &LogicalPath,
    ) -> Result<()> {
        let me = PathMapper::to_special(roots, logical, SpecialKind::Me)?;
        match host.unlink(me.as_path()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// `merge_attr(data_stat, me_stat) -> Stat` (spec §3 mode composition):
/// owner/times/alterable-mode come from the ME file, file-type bits and
/// size/nlink come from the data file.
pub fn merge_attr(data: &Stat, me: &Stat) -> Stat {
    Stat {
        kind: data.kind,
        mode: (data.mode & !VALID_MODES_MASK) | (me.mode & VALID_MODES_MASK),
        nlink: data.nlink,
        uid: me.uid,
        gid: me.gid,
        size: data.size,
        atime: me.atime,
        mtime: me.mtime,
        ctime: me.ctime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StdHostFs;
    use std::fs;
    use tempfile::TempDir;

    fn roots(rw: &TempDir, ro: &TempDir) -> BranchConfig {
        BranchConfig::new(ro.path(), rw.path()).unwrap()
    }

    #[tokio::test]
    async fn create_me_then_find_me_round_trips_alterable_mode() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(ro.path().join("a")).unwrap();
        fs::write(ro.path().join("a/b.txt"), b"hi").unwrap();
        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let logical = LogicalPath::new("/a/b.txt").unwrap();
        let data_stat = host.lstat(&ro.path().join("a/b.txt")).await.unwrap();

        let mut stat = data_stat;
        stat.mode = (stat.mode & !VALID_MODES_MASK) | 0o600;
        MeStore::create_me(&host, &roots, &logical, &stat).await.unwrap();

        let (_, me_stat) = MeStore::find_me(&host, &roots, &logical).await.unwrap();
        assert_eq!(me_stat.mode & VALID_MODES_MASK, 0o600);
        assert_eq!(me_stat.uid, stat.uid);
    }

    #[test]
    fn merge_attr_takes_type_bits_from_data_and_rest_from_me() {
        let data = Stat {
            kind: crate::host::FileKind::Regular,
            mode: 0o100644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 42,
            atime: filetime::FileTime::from_unix_time(1, 0),
            mtime: filetime::FileTime::from_unix_time(1, 0),
            ctime: filetime::FileTime::from_unix_time(1, 0),
        };
        let me = Stat {
            kind: crate::host::FileKind::Regular,
            mode: 0o000600,
            nlink: 9,
            uid: 1000,
            gid: 1000,
            size: 999,
            atime: filetime::FileTime::from_unix_time(2, 0),
            mtime: filetime::FileTime::from_unix_time(2, 0),
            ctime: filetime::FileTime::from_unix_time(2, 0),
        };
        let merged = merge_attr(&data, &me);
        assert_eq!(merged.mode, 0o100600);
        assert_eq!(merged.uid, 1000);
        assert_eq!(merged.size, 42);
        assert_eq!(merged.nlink, 1);
    }
}
