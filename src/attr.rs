//! Attribute Engine (spec §4.7): routes `setattr` to either a direct
//! in-place update on the RW branch or ME creation/update, and merges ME
//! attributes back in on `getattr`.

use filetime::FileTime;

use crate::branch::{BranchResolver, Copyup, Intent, OriginTag};
use crate::error::Result;
use crate::host::{AttrChange, HostFs, Stat};
use crate::me::{merge_attr, MeStore};
use crate::path::{BranchConfig, LogicalPath};

/// Strategy for updating a timestamp, mirroring the NFSv3 `sattr3` choice
/// between leaving a field alone, stamping the host's current time, or
/// taking a client-supplied value.
#[derive(Debug, Copy, Clone)]
pub enum SetTime {
    DontChange,
    ServerCurrent,
    ClientProvided(FileTime),
}

/// The attribute-change request passed to [`AttributeEngine::set_attr`].
#[derive(Debug, Default, Clone)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: SetTime,
    pub mtime: SetTime,
}

impl Default for SetTime {
    fn default() -> Self {
        SetTime::DontChange
    }
}

impl SetAttr {
    fn into_host_change(self) -> AttrChange {
        let now = || FileTime::from_system_time(std::time::SystemTime::now());
        AttrChange {
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            atime: match self.atime {
                SetTime::DontChange => None,
                SetTime::ServerCurrent => Some(now()),
                SetTime::ClientProvided(t) => Some(t),
            },
            mtime: match self.mtime {
                SetTime::DontChange => None,
                SetTime::ServerCurrent => Some(now()),
                SetTime::ClientProvided(t) => Some(t),
            },
        }
    }
}

pub struct AttributeEngine;

impl AttributeEngine {
    /// `setattr(logical, attr) -> () | Error` (spec §4.7).
    pub async fn set_attr(
        host: &dyn HostFs,
        roots: &BranchConfig,
        copyup: &dyn Copyup,
        logical: &LogicalPath,
        attr: SetAttr,
    ) -> Result<()> {
        let (real_path, origin) =
            BranchResolver::find_file(host, roots, copyup, logical, Intent::Any).await?;

        match origin {
            OriginTag::ReadWrite | OriginTag::ReadWriteCopyup => {
                let change = attr.into_host_change();
                host.notify_change(real_path.as_path(), &change).await?;
                Ok(())
            }
            OriginTag::ReadOnly => {
                let data_stat = host.lstat(real_path.as_path()).await?;
                let change = attr.into_host_change();
                MeStore::set_me(host, roots, logical, &data_stat, &change).await
            }
        }
    }

    /// `getattr(logical) -> Stat | Error` (spec §4.7).
    pub async fn get_attr(
        host: &dyn HostFs,
        roots: &BranchConfig,
        copyup: &dyn Copyup,
        logical: &LogicalPath,
    ) -> Result<Stat> {
        let (real_path, origin) =
            BranchResolver::find_file(host, roots, copyup, logical, Intent::Any).await?;
        let data_stat = host.lstat(real_path.as_path()).await?;

        if origin == OriginTag::ReadOnly {
            if let Some((_, me_stat)) = MeStore::find_me_opt(host, roots, logical).await? {
                return Ok(merge_attr(&data_stat, &me_stat));
            }
        }
        Ok(data_stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copyup::StdCopyup;
    use crate::host::StdHostFs;
    use crate::me::VALID_MODES_MASK;
    use std::fs;
    use tempfile::TempDir;

    fn roots(rw: &TempDir, ro: &TempDir) -> BranchConfig {
        BranchConfig::new(ro.path(), rw.path()).unwrap()
    }

    #[tokio::test]
    async fn setattr_on_ro_file_creates_me_and_getattr_merges() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(ro.path().join("a")).unwrap();
        fs::write(ro.path().join("a/b.txt"), b"x").unwrap();
        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/a/b.txt").unwrap();

        let mut attr = SetAttr::default();
        attr.mode = Some(0o600);
        AttributeEngine::set_attr(&host, &roots, &copyup, &logical, attr).await.unwrap();

        assert!(rw.path().join("a/.me.b.txt").exists());
        let merged = AttributeEngine::get_attr(&host, &roots, &copyup, &logical).await.unwrap();
        assert_eq!(merged.mode & VALID_MODES_MASK, 0o600);
    }

    #[tokio::test]
    async fn setattr_on_rw_file_applies_directly() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::write(rw.path().join("native.txt"), b"x").unwrap();
        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/native.txt").unwrap();

        let mut attr = SetAttr::default();
        attr.mode = Some(0o640);
        AttributeEngine::set_attr(&host, &roots, &copyup, &logical, attr).await.unwrap();

        let meta = fs::metadata(rw.path().join("native.txt")).unwrap();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert!(!rw.path().join(".me.native.txt").exists());
    }
}
