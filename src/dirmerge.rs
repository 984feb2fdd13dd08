//! Directory Merger (spec §4.6): produces the deduplicated,
//! whiteout-respecting listing used by `opendir`/`readdir`/`closedir`.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::branch::{BranchResolver, Copyup, Intent};
use crate::error::{Error, Result};
use crate::host::{FileKind, HostFs};
use crate::path::{BranchConfig, ConcretePath, LogicalPath, NameClass, PathMapper};

/// One merged, user-visible directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    pub name: String,
    pub kind: FileKind,
    pub ino: u64,
}

enum State {
    Fresh,
    Populated { entries: Vec<MergedEntry>, cursor: usize },
}

/// The `OpenFileHandle` of spec §3: created at `opendir`, its entry list
/// populated lazily on the first `readdir`, and advanced by cursor on
/// every call after. Not `Sync` by design — concurrent `readdir` on the
/// same handle is unsupported (spec §5), so callers own it exclusively.
pub struct DirHandle {
    dir_logical: LogicalPath,
    ro_dir: Option<ConcretePath>,
    rw_dir: Option<ConcretePath>,
    state: State,
}

impl DirHandle {
    /// `opendir`: resolve both branch sides independently (zero-length /
    /// `None` if a side is absent), without yet reading either directory.
    pub async fn open(
        host: &dyn HostFs,
        roots: &BranchConfig,
        copyup: &dyn Copyup,
        logical: &LogicalPath,
    ) -> Result<Self> {
        let rw_dir = match BranchResolver::find_file(host, roots, copyup, logical, Intent::MustRW).await
        {
            Ok((path, _)) => Some(path),
            Err(Error::NotFound) => None,
            Err(err) => return Err(err),
        };
        let ro_dir = match BranchResolver::find_file(host, roots, copyup, logical, Intent::MustRO).await
        {
            Ok((path, _)) => Some(path),
            Err(Error::NotFound) => None,
            Err(err) => return Err(err),
        };
        if rw_dir.is_none() && ro_dir.is_none() {
            return Err(Error::NotFound);
        }
        Ok(DirHandle { dir_logical: logical.clone(), ro_dir, rw_dir, state: State::Fresh })
    }

    /// Populate the entry list on first call; a no-op on every call after.
    async fn ensure_populated(&mut self, host: &dyn HostFs) -> Result<()> {
        if matches!(self.state, State::Populated { .. }) {
            return Ok(());
        }
        let entries = Self::merge(host, &self.dir_logical, self.rw_dir.as_ref(), self.ro_dir.as_ref())
            .await?;
        self.state = State::Populated { entries, cursor: 0 };
        Ok(())
    }

    /// `readdir`: return the next merged entry, or `None` at EOF.
    pub async fn next(&mut self, host: &dyn HostFs) -> Result<Option<MergedEntry>> {
        self.ensure_populated(host).await?;
        match &mut self.state {
            State::Populated { entries, cursor } => {
                if *cursor >= entries.len() {
                    return Ok(None);
                }
                let entry = entries[*cursor].clone();
                *cursor += 1;
                Ok(Some(entry))
            }
            State::Fresh => unreachable!("ensure_populated always transitions to Populated"),
        }
    }

    /// The full merged listing, for callers (like `rmdir`'s emptiness
    /// check) that need it all at once rather than by cursor.
    pub async fn entries(&mut self, host: &dyn HostFs) -> Result<&[MergedEntry]> {
        self.ensure_populated(host).await?;
        match &self.state {
            State::Populated { entries, .. } => Ok(entries),
            State::Fresh => unreachable!(),
        }
    }

    async fn merge(
        host: &dyn HostFs,
        dir_logical: &LogicalPath,
        rw_dir: Option<&ConcretePath>,
        ro_dir: Option<&ConcretePath>,
    ) -> Result<Vec<MergedEntry>> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut pending_whiteouts = HashSet::new();

        if let Some(rw) = rw_dir {
            for dirent in host.read_dir(rw.as_path()).await? {
                let name = dirent.name.to_string_lossy().into_owned();
                match PathMapper::classify(&name) {
                    NameClass::Me => continue,
                    NameClass::Whiteout => {
                        if ro_dir.is_some() {
                            if let Some(hidden) = PathMapper::hidden_name(&name) {
                                pending_whiteouts.insert(hidden.to_string());
                            }
                        }
                    }
                    NameClass::Normal => {
                        let ino = name_to_ino(&dir_logical.join(&name)?);
                        seen.insert(name.clone());
                        entries.push(MergedEntry { name, kind: dirent.kind, ino });
                    }
                }
            }
        }

        if let Some(ro) = ro_dir {
            for dirent in host.read_dir(ro.as_path()).await? {
                let name = dirent.name.to_string_lossy().into_owned();
                if pending_whiteouts.contains(&name) || seen.contains(&name) {
                    continue;
                }
                let ino = name_to_ino(&dir_logical.join(&name)?);
                entries.push(MergedEntry { name, kind: dirent.kind, ino });
            }
        }

        Ok(entries)
    }
}

/// `name_to_ino(logical_path)`: a stable, process-local inode number
/// derived from the logical path. The union has no persistent inode
/// table of its own; this is purely a cache key / dedup key and carries
/// no cross-mount meaning.
fn name_to_ino(logical: &LogicalPath) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    logical.as_path().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copyup::StdCopyup;
    use crate::host::StdHostFs;
    use std::fs;
    use tempfile::TempDir;

    fn roots(rw: &TempDir, ro: &TempDir) -> BranchConfig {
        BranchConfig::new(ro.path(), rw.path()).unwrap()
    }

    #[tokio::test]
    async fn merges_dedups_and_hides_reserved_names() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(ro.path().join("dir")).unwrap();
        fs::write(ro.path().join("dir/x"), b"x").unwrap();
        fs::write(ro.path().join("dir/y"), b"y").unwrap();
        fs::create_dir(rw.path().join("dir")).unwrap();
        fs::write(rw.path().join("dir/z"), b"z").unwrap();
        fs::write(rw.path().join("dir/.wh.x"), b"").unwrap();
        fs::write(rw.path().join("dir/.me.y"), b"").unwrap();

        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/dir").unwrap();

        let mut handle = DirHandle::open(&host, &roots, &copyup, &logical).await.unwrap();
        let mut names: Vec<String> =
            handle.entries(&host).await.unwrap().iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["y".to_string(), "z".to_string()]);
    }

    #[tokio::test]
    async fn ro_only_entries_with_reserved_looking_names_are_not_hidden() {
        // classify()/is_me()/is_whiteout() only govern RW-branch basenames
        // (spec §4.6 step 1); the RO-side drop conditions in step 2 are
        // "pending whiteout" and "already seen from RW" only, so a RO-only
        // file that happens to be named like a sidecar is still a real,
        // user-visible entry.
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(ro.path().join("dir")).unwrap();
        fs::write(ro.path().join("dir/.me.foo"), b"x").unwrap();
        fs::write(ro.path().join("dir/.wh.bar"), b"x").unwrap();

        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/dir").unwrap();

        let mut handle = DirHandle::open(&host, &roots, &copyup, &logical).await.unwrap();
        let mut names: Vec<String> =
            handle.entries(&host).await.unwrap().iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec![".me.foo".to_string(), ".wh.bar".to_string()]);
    }

    #[tokio::test]
    async fn cursor_advances_to_eof() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(ro.path().join("d")).unwrap();
        fs::write(ro.path().join("d/a"), b"").unwrap();
        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/d").unwrap();

        let mut handle = DirHandle::open(&host, &roots, &copyup, &logical).await.unwrap();
        assert!(handle.next(&host).await.unwrap().is_some());
        assert!(handle.next(&host).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rw_only_directory_is_not_not_found() {
        let rw = TempDir::new().unwrap();
        let ro = TempDir::new().unwrap();
        fs::create_dir(rw.path().join("only_rw")).unwrap();
        let roots = roots(&rw, &ro);
        let host = StdHostFs;
        let copyup = StdCopyup;
        let logical = LogicalPath::new("/only_rw").unwrap();
        assert!(DirHandle::open(&host, &roots, &copyup, &logical).await.is_ok());
    }
}
