//! Operation Dispatcher (spec §4.8 + §6): composes every other component
//! into the externally observable filesystem operations.

use std::sync::Arc;

use tracing::warn;

use crate::attr::{AttributeEngine, SetAttr};
use crate::branch::{BranchResolver, Copyup, Intent, OriginTag};
use crate::dirmerge::{DirHandle, MergedEntry};
use crate::error::{Error, Result};
use crate::host::{HostFs, Stat};
use crate::lock::PathLocks;
use crate::me::MeStore;
use crate::path::{BranchConfig, ConcretePath, LogicalPath, NameClass, PathMapper};
use crate::whiteout::WhiteoutManager;

/// `open`'s caller-supplied intent: whether the file is being opened for
/// writing, which decides if a read-only hit should copy up (spec §4.8).
#[derive(Debug, Copy, Clone, Default)]
pub struct OpenFlags {
    pub write: bool,
}

/// Origin of an `llseek` offset, mirroring the POSIX `whence` values.
#[derive(Debug, Copy, Clone)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// A handle returned by `open`, forwarding `read`/`write`/`llseek` to the
/// concrete file chosen at open time (spec §4.8: "store the underlying
/// handle and forward all subsequent read/write/seek to it").
pub struct FileHandle {
    path: ConcretePath,
    pos: u64,
}

impl FileHandle {
    pub fn path(&self) -> &ConcretePath {
        &self.path
    }
}

/// Statfs result, the host's raw numbers with `f_type`/`f_fsid` overridden
/// by mount configuration (spec §6).
#[derive(Debug, Copy, Clone)]
pub struct FsStat {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
    pub available_files: u64,
    pub name_max: u32,
    pub fs_type: u32,
    pub fsid: u64,
}

/// Composes the Path Mapper, Branch Resolver, Whiteout Manager, ME Store,
/// Copy-up Engine, Directory Merger and Attribute Engine into one surface.
pub struct Dispatcher {
    host: Arc<dyn HostFs>,
    roots: BranchConfig,
    copyup: Arc<dyn Copyup>,
    locks: PathLocks,
    fs_type: u32,
    fsid: u64,
}

impl Dispatcher {
    pub fn new(
        host: Arc<dyn HostFs>,
        roots: BranchConfig,
        copyup: Arc<dyn Copyup>,
        fs_type: u32,
        fsid: u64,
    ) -> Self {
        Dispatcher { host, roots, copyup, locks: PathLocks::new(), fs_type, fsid }
    }

    fn host(&self) -> &dyn HostFs {
        self.host.as_ref()
    }

    fn copyup(&self) -> &dyn Copyup {
        self.copyup.as_ref()
    }

    /// `lookup(logical) -> Stat`: resolves the entry and returns its merged
    /// attributes, failing with `NotFound` if it does not resolve.
    pub async fn lookup(&self, logical: &LogicalPath) -> Result<Stat> {
        AttributeEngine::get_attr(self.host(), &self.roots, self.copyup(), logical).await
    }

    /// `getattr(logical) -> Stat` (spec P1/P3).
    pub async fn getattr(&self, logical: &LogicalPath) -> Result<Stat> {
        AttributeEngine::get_attr(self.host(), &self.roots, self.copyup(), logical).await
    }

    /// `setattr(logical, attr)` (spec L3/L4).
    pub async fn setattr(&self, logical: &LogicalPath, attr: SetAttr) -> Result<()> {
        let _guard = self.locks.lock(logical).await;
        AttributeEngine::set_attr(self.host(), &self.roots, self.copyup(), logical, attr).await
    }

    /// `permission(logical)`: resolves which branch's file to check, then
    /// delegates the actual credential check to the host (spec §1's
    /// "credentials retrieval" collaborator) via `HostFs::access`. This is
    /// the check `open`'s post-copy-up rollback below depends on to ever
    /// observe a failure.
    pub async fn permission(&self, logical: &LogicalPath) -> Result<()> {
        let (real, _) =
            BranchResolver::find_file(self.host(), &self.roots, self.copyup(), logical, Intent::Any)
                .await?;
        self.host().access(real.as_path()).await?;
        Ok(())
    }

    /// `open(logical, flags)` (spec §4.8): a write-intending open triggers
    /// copy-up; a failed post-copy-up permission check unwinds the new RW
    /// file (and any ME the copy-up might have recreated).
    pub async fn open(&self, logical: &LogicalPath, flags: OpenFlags) -> Result<FileHandle> {
        let _guard = self.locks.lock(logical).await;
        let intent = if flags.write { Intent::CreateCopyup } else { Intent::Any };
        let (real, origin) =
            BranchResolver::find_file(self.host(), &self.roots, self.copyup(), logical, intent)
                .await?;

        if origin == OriginTag::ReadWriteCopyup {
            if let Err(err) = self.permission(logical).await {
                if let Err(rollback_err) = self.host().unlink(real.as_path()).await {
                    warn!(
                        path = %real.as_path().display(),
                        error = %rollback_err,
                        "open: failed to unwind copy-up after permission check failure"
                    );
                }
                if let Err(rollback_err) =
                    MeStore::delete_me(self.host(), &self.roots, logical).await
                {
                    warn!(error = %rollback_err, "open: failed to clean up ME during copy-up unwind");
                }
                return Err(err);
            }
        }

        Ok(FileHandle { path: real, pos: 0 })
    }

    /// `close(handle)`: nothing to release beyond dropping the handle; the
    /// host operations behind it are path-based and hold no live file
    /// descriptor between calls.
    pub fn close(&self, _handle: FileHandle) {}

    /// `read(handle, len)`, advancing the handle's cursor by the number of
    /// bytes actually returned.
    pub async fn read(&self, handle: &mut FileHandle, len: u32) -> Result<Vec<u8>> {
        let data = self.host().read_at(handle.path.as_path(), handle.pos, len).await?;
        handle.pos += data.len() as u64;
        Ok(data)
    }

    /// `write(handle, data)`, advancing the handle's cursor by the number
    /// of bytes written.
    pub async fn write(&self, handle: &mut FileHandle, data: &[u8]) -> Result<u32> {
        let written = self.host().write_at(handle.path.as_path(), handle.pos, data).await?;
        handle.pos += written as u64;
        Ok(written)
    }

    /// `llseek(handle, pos)`: thin passthrough, pure cursor arithmetic with
    /// no union-specific logic.
    pub fn llseek(&self, handle: &mut FileHandle, from: SeekFrom) -> Result<u64> {
        let new_pos = match from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => handle.pos as i64 + delta,
            SeekFrom::End(_) => return Err(Error::InvalidPath), // requires a stat the caller hasn't provided
        };
        if new_pos < 0 {
            return Err(Error::InvalidPath);
        }
        handle.pos = new_pos as u64;
        Ok(handle.pos)
    }

    /// `opendir(logical)`.
    pub async fn opendir(&self, logical: &LogicalPath) -> Result<DirHandle> {
        DirHandle::open(self.host(), &self.roots, self.copyup(), logical).await
    }

    /// `readdir(handle)`.
    pub async fn readdir(&self, handle: &mut DirHandle) -> Result<Option<MergedEntry>> {
        handle.next(self.host()).await
    }

    /// `closedir(handle)`: nothing to release, symmetric with `close`.
    pub fn closedir(&self, _handle: DirHandle) {}

    fn reject_reserved_name(logical: &LogicalPath) -> Result<()> {
        let (_, name) = logical.split()?;
        if PathMapper::classify(&name) != NameClass::Normal {
            return Err(Error::InvalidPath);
        }
        Ok(())
    }

    /// Shared preamble for `create`/`mkdir`/`mknod`/`symlink` (spec P7 and
    /// the create-family table): reject reserved target names, refuse a
    /// non-whited-out existing entry, and make sure the RW parent chain
    /// exists.
    async fn prepare_create(&self, logical: &LogicalPath) -> Result<()> {
        Self::reject_reserved_name(logical)?;
        match BranchResolver::find_file(self.host(), &self.roots, self.copyup(), logical, Intent::Any)
            .await
        {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }
        crate::copyup::CopyupEngine::find_path(self.host(), &self.roots, logical).await
    }

    async fn finish_create(&self, logical: &LogicalPath) -> Result<()> {
        WhiteoutManager::unlink_whiteout(self.host(), &self.roots, logical).await
    }

    /// `create(logical, mode)`.
    pub async fn create(&self, logical: &LogicalPath, mode: u32) -> Result<ConcretePath> {
        let _guard = self.locks.lock(logical).await;
        self.prepare_create(logical).await?;
        let rw = PathMapper::to_rw(&self.roots, logical)?;
        self.host().create_file(rw.as_path(), mode, true).await?;
        self.finish_create(logical).await?;
        Ok(rw)
    }

    /// `mkdir(logical, mode)`.
    pub async fn mkdir(&self, logical: &LogicalPath, mode: u32) -> Result<ConcretePath> {
        let _guard = self.locks.lock(logical).await;
        self.prepare_create(logical).await?;
        let rw = PathMapper::to_rw(&self.roots, logical)?;
        self.host().mkdir(rw.as_path(), mode).await?;
        self.finish_create(logical).await?;
        Ok(rw)
    }

    /// `mknod(logical, kind, mode, device)`.
    pub async fn mknod(
        &self,
        logical: &LogicalPath,
        kind: crate::host::FileKind,
        mode: u32,
        device: Option<crate::host::DeviceId>,
    ) -> Result<ConcretePath> {
        let _guard = self.locks.lock(logical).await;
        self.prepare_create(logical).await?;
        let rw = PathMapper::to_rw(&self.roots, logical)?;
        self.host().mknod(rw.as_path(), kind, mode, device).await?;
        self.finish_create(logical).await?;
        Ok(rw)
    }

    /// `symlink(target, logical)`.
    pub async fn symlink(&self, target: &std::path::Path, logical: &LogicalPath) -> Result<ConcretePath> {
        let _guard = self.locks.lock(logical).await;
        self.prepare_create(logical).await?;
        let rw = PathMapper::to_rw(&self.roots, logical)?;
        self.host().symlink(target, rw.as_path()).await?;
        self.finish_create(logical).await?;
        Ok(rw)
    }

    /// `link(old, new)` (spec §4.8): a RO-origin `old` cannot be hard-linked
    /// across branches, so the dispatcher falls back to a symlink pointing
    /// at the RO concrete path; a RW-origin `old` is hard-linked directly.
    pub async fn link(&self, old: &LogicalPath, new: &LogicalPath) -> Result<ConcretePath> {
        if old == new {
            // A name always exists at itself; also avoids self-deadlocking
            // on the non-reentrant per-path lock below.
            return Err(Error::AlreadyExists);
        }
        // Acquire both path locks in one fixed order (by path, not by
        // caller-supplied old/new order) so a concurrent `link(A, B)` and
        // `link(B, A)` can't deadlock each other AB-BA style.
        let (_first_guard, _second_guard) = if old.as_path() < new.as_path() {
            (self.locks.lock(old).await, self.locks.lock(new).await)
        } else {
            (self.locks.lock(new).await, self.locks.lock(old).await)
        };
        Self::reject_reserved_name(new)?;
        match BranchResolver::find_file(self.host(), &self.roots, self.copyup(), new, Intent::Any)
            .await
        {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let (old_real, old_origin) =
            BranchResolver::find_file(self.host(), &self.roots, self.copyup(), old, Intent::Any)
                .await?;
        crate::copyup::CopyupEngine::find_path(self.host(), &self.roots, new).await?;
        let new_rw = PathMapper::to_rw(&self.roots, new)?;

        match old_origin {
            OriginTag::ReadOnly => {
                self.host().symlink(old_real.as_path(), new_rw.as_path()).await?;
            }
            OriginTag::ReadWrite | OriginTag::ReadWriteCopyup => {
                self.host().hard_link(old_real.as_path(), new_rw.as_path()).await?;
            }
        }

        WhiteoutManager::unlink_whiteout(self.host(), &self.roots, new).await?;
        Ok(new_rw)
    }

    /// `unlink(logical)` (spec §4.8 table).
    pub async fn unlink(&self, logical: &LogicalPath) -> Result<()> {
        let _guard = self.locks.lock(logical).await;
        self.remove_entry(logical, RemoveKind::File).await
    }

    /// `rmdir(logical)`: as `unlink`, preceded by an emptiness check over
    /// the merged view (spec §4.8).
    pub async fn rmdir(&self, logical: &LogicalPath) -> Result<()> {
        let _guard = self.locks.lock(logical).await;
        let mut handle = DirHandle::open(self.host(), &self.roots, self.copyup(), logical).await?;
        if !handle.entries(self.host()).await?.is_empty() {
            return Err(Error::NotEmpty);
        }
        self.remove_entry(logical, RemoveKind::Dir).await
    }

    async fn remove_entry(&self, logical: &LogicalPath, kind: RemoveKind) -> Result<()> {
        let (real, origin) =
            BranchResolver::find_file(self.host(), &self.roots, self.copyup(), logical, Intent::Any)
                .await?;

        match origin {
            OriginTag::ReadWrite | OriginTag::ReadWriteCopyup => {
                kind.remove(self.host(), real.as_path()).await?;
                let ro = PathMapper::to_ro(&self.roots, logical)?;
                if self.host().lstat(ro.as_path()).await.is_ok() {
                    WhiteoutManager::create_whiteout(self.host(), &self.roots, logical).await?;
                }
                Ok(())
            }
            OriginTag::ReadOnly => {
                let saved_me = MeStore::find_me_opt(self.host(), &self.roots, logical).await?;
                if saved_me.is_some() {
                    MeStore::delete_me(self.host(), &self.roots, logical).await?;
                }
                if let Err(err) = WhiteoutManager::create_whiteout(self.host(), &self.roots, logical).await
                {
                    if let Some((_, me_stat)) = saved_me {
                        if let Err(rollback_err) =
                            MeStore::create_me(self.host(), &self.roots, logical, &me_stat).await
                        {
                            warn!(
                                error = %rollback_err,
                                "unlink: failed to restore ME after whiteout creation failure"
                            );
                        }
                    }
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// `statfs`: the RO branch's dynamic numbers with `f_type`/`f_fsid`
    /// overridden by mount configuration (spec §6).
    pub async fn statfs(&self) -> Result<FsStat> {
        let raw = self.host().statfs(self.roots.ro_root()).await?;
        Ok(FsStat {
            total_bytes: raw.total_bytes,
            free_bytes: raw.free_bytes,
            available_bytes: raw.available_bytes,
            total_files: raw.total_files,
            free_files: raw.free_files,
            available_files: raw.available_files,
            name_max: raw.name_max,
            fs_type: self.fs_type,
            fsid: self.fsid,
        })
    }
}

enum RemoveKind {
    File,
    Dir,
}

impl RemoveKind {
    async fn remove(&self, host: &dyn HostFs, path: &std::path::Path) -> Result<()> {
        match self {
            RemoveKind::File => host.unlink(path).await.map_err(Error::from),
            RemoveKind::Dir => host.rmdir(path).await.map_err(Error::from),
        }
    }
}
