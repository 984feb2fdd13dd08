//! The host OS's VFS dispatch surface, consumed as a trait (spec §1).
//!
//! Everything in this module is platform glue rather than core design: the
//! [`HostFs`] trait is the narrow seam the rest of the crate is written
//! against, and [`StdHostFs`] is the one concrete implementation, backed by
//! `tokio::fs`, that makes the crate runnable. A FUSE or NFS frontend could
//! swap in a different `HostFs` without touching the union logic.

use std::ffi::OsString;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filetime::FileTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task;

/// Intrinsic file-type bits, distinct from the alterable permission bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::FileTypeExt;
        let ft = meta.file_type();
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::Regular
        }
    }
}

/// A device major/minor pair, used by [`HostFs::mknod`].
#[derive(Debug, Copy, Clone)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

/// Attribute snapshot returned by [`HostFs::lstat`].
///
/// `mode` carries both the file-type and the alterable bits, matching
/// `st_mode` semantics; callers mask with [`crate::me::VALID_MODES_MASK`]
/// when they need only the alterable part.
#[derive(Debug, Copy, Clone)]
pub struct Stat {
    pub kind: FileKind,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
}

impl Stat {
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Stat {
            kind: FileKind::from_metadata(meta),
            mode: meta.mode(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            atime: FileTime::from_unix_time(meta.atime(), meta.atime_nsec() as u32),
            mtime: FileTime::from_unix_time(meta.mtime(), meta.mtime_nsec() as u32),
            ctime: FileTime::from_unix_time(meta.ctime(), meta.ctime_nsec() as u32),
        }
    }
}

/// One entry returned by [`HostFs::read_dir`].
#[derive(Debug, Clone)]
pub struct Dirent {
    pub name: OsString,
    pub kind: FileKind,
}

/// Attribute change requested of the host, the host-facing counterpart of
/// [`crate::attr::SetAttr`]. `ctime` is deliberately absent: POSIX hosts
/// bump it automatically as a side effect of any other change.
#[derive(Debug, Default, Clone)]
pub struct AttrChange {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
}

impl AttrChange {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && self.atime.is_none()
            && self.mtime.is_none()
    }
}

/// Dynamic + static filesystem statistics, the host counterpart of `statfs`.
#[derive(Debug, Copy, Clone)]
pub struct RawStatfs {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
    pub available_files: u64,
    pub name_max: u32,
}

/// The host primitives the core needs: lstat, open/create, read, write,
/// notify_change, and the readdir callback surface (spec §1).
#[async_trait]
pub trait HostFs: Send + Sync {
    async fn lstat(&self, path: &Path) -> io::Result<Stat>;
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<Dirent>>;
    async fn read_at(&self, path: &Path, offset: u64, len: u32) -> io::Result<Vec<u8>>;
    async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<u32>;
    async fn create_file(&self, path: &Path, mode: u32, exclusive: bool) -> io::Result<()>;
    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;
    async fn mknod(
        &self,
        path: &Path,
        kind: FileKind,
        mode: u32,
        device: Option<DeviceId>,
    ) -> io::Result<()>;
    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    async fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    async fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()>;
    async fn unlink(&self, path: &Path) -> io::Result<()>;
    async fn rmdir(&self, path: &Path) -> io::Result<()>;
    async fn notify_change(&self, path: &Path, change: &AttrChange) -> io::Result<()>;
    async fn statfs(&self, path: &Path) -> io::Result<RawStatfs>;
    /// The "credentials/ambient identity retrieval" collaborator named as
    /// out of scope in spec §1: checks whether the calling process has
    /// read access to `path` against the host's real credentials. Backs
    /// the dispatcher's `permission` operation (spec §6) and its
    /// post-copy-up check in `open` (spec §4.8).
    async fn access(&self, path: &Path) -> io::Result<()>;
}

/// The one real [`HostFs`]: every call is forwarded to `tokio::fs`, with the
/// handful of operations `tokio::fs` has no wrapper for (`chmod`, `chown`,
/// `mknod`, `statvfs`) run on the blocking pool, the same way `ShadowFS`
/// hands permission changes to `task::spawn_blocking`.
#[derive(Debug, Default)]
pub struct StdHostFs;

#[async_trait]
impl HostFs for StdHostFs {
    async fn lstat(&self, path: &Path) -> io::Result<Stat> {
        let meta = fs::symlink_metadata(path).await?;
        Ok(Stat::from_metadata(&meta))
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<Dirent>> {
        let mut rd = fs::read_dir(path).await?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(Dirent { name: entry.file_name(), kind: FileKind::from_metadata(&meta) });
        }
        Ok(out)
    }

    async fn read_at(&self, path: &Path, offset: u64, len: u32) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(path).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<u32> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(data.len() as u32)
    }

    async fn create_file(&self, path: &Path, mode: u32, exclusive: bool) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if exclusive {
            options.create_new(true);
        }
        options.open(path).await?;
        set_mode(path, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::create_dir(path).await?;
        set_mode(path, mode).await
    }

    async fn mknod(
        &self,
        path: &Path,
        kind: FileKind,
        mode: u32,
        device: Option<DeviceId>,
    ) -> io::Result<()> {
        let path = path.to_path_buf();
        let full_mode = mode | node_type_bits(kind);
        let dev = device.map(|d| libc_makedev(d.major, d.minor)).unwrap_or(0);
        task::spawn_blocking(move || unsafe {
            let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
            let rc = libc::mknod(c_path.as_ptr(), full_mode as libc::mode_t, dev);
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::Other))?
    }

    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let target = target.to_path_buf();
        let link = link.to_path_buf();
        task::spawn_blocking(move || std::os::unix::fs::symlink(&target, &link))
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::Other))?
    }

    async fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path).await
    }

    async fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::hard_link(src, dst).await
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path).await
    }

    async fn notify_change(&self, path: &Path, change: &AttrChange) -> io::Result<()> {
        if let Some(size) = change.size {
            let file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(size).await?;
        }
        if let Some(mode) = change.mode {
            set_mode(path, mode).await?;
        }
        if change.uid.is_some() || change.gid.is_some() {
            set_owner(path, change.uid, change.gid).await?;
        }
        if change.atime.is_some() || change.mtime.is_some() {
            set_times(path, change.atime, change.mtime).await?;
        }
        Ok(())
    }

    async fn statfs(&self, path: &Path) -> io::Result<RawStatfs> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || raw_statfs(&path)).await.map_err(|_| io::Error::from(io::ErrorKind::Other))?
    }

    async fn access(&self, path: &Path) -> io::Result<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || unsafe {
            let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
            let rc = libc::access(c_path.as_ptr(), libc::R_OK);
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::Other))?
    }
}

async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
    })
    .await
    .map_err(|_| io::Error::from(io::ErrorKind::Other))?
}

async fn set_owner(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || unsafe {
        let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let uid = uid.map(|v| v as libc::uid_t).unwrap_or(u32::MAX as libc::uid_t);
        let gid = gid.map(|v| v as libc::gid_t).unwrap_or(u32::MAX as libc::gid_t);
        let rc = libc::lchown(c_path.as_ptr(), uid, gid);
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    })
    .await
    .map_err(|_| io::Error::from(io::ErrorKind::Other))?
}

async fn set_times(
    path: &Path,
    atime: Option<FileTime>,
    mtime: Option<FileTime>,
) -> io::Result<()> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let existing = std::fs::symlink_metadata(&path)?;
        let existing_stat = Stat::from_metadata(&existing);
        let atime = atime.unwrap_or(existing_stat.atime);
        let mtime = mtime.unwrap_or(existing_stat.mtime);
        if existing.file_type().is_symlink() {
            filetime::set_symlink_file_times(&path, atime, mtime)
        } else {
            filetime::set_file_times(&path, atime, mtime)
        }
    })
    .await
    .map_err(|_| io::Error::from(io::ErrorKind::Other))?
}

fn node_type_bits(kind: FileKind) -> u32 {
    (match kind {
        FileKind::CharDevice => libc::S_IFCHR,
        FileKind::BlockDevice => libc::S_IFBLK,
        FileKind::Fifo => libc::S_IFIFO,
        FileKind::Socket => libc::S_IFSOCK,
        FileKind::Regular => libc::S_IFREG,
        FileKind::Directory => libc::S_IFDIR,
    }) as u32
}

fn libc_makedev(major: u32, minor: u32) -> libc::dev_t {
    unsafe { libc::makedev(major, minor) }
}

fn raw_statfs(path: &Path) -> io::Result<RawStatfs> {
    use std::mem::MaybeUninit;
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut buf = MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), buf.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let stat = unsafe { buf.assume_init() };
    let frsize = stat.f_frsize.max(1) as u64;
    Ok(RawStatfs {
        total_bytes: stat.f_blocks as u64 * frsize,
        free_bytes: stat.f_bfree as u64 * frsize,
        available_bytes: stat.f_bavail as u64 * frsize,
        total_files: stat.f_files as u64,
        free_files: stat.f_ffree as u64,
        available_files: stat.f_favail as u64,
        name_max: stat.f_namemax as u32,
    })
}
