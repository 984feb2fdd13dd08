//! Path Mapper (spec §4.1): pure functions turning a logical path into a
//! concrete path on one branch or the other, plus the whiteout/ME sidecar
//! naming scheme.
//!
//! Reimplementations of the original source manipulated raw character
//! buffers keyed off branch-root prefix lengths (spec §9). This module
//! follows the suggested fix: a typed [`ConcretePath`] that always knows
//! which branch it belongs to, so no code downstream ever has to recompute
//! a prefix length after concatenation.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Platform path length limit the Path Mapper enforces (spec §4.1).
pub const MAX_PATH_LEN: usize = 4096;

/// Prefix used for whiteout sidecars: `.wh.<name>`.
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// Prefix used for deported-metadata sidecars: `.me.<name>`.
pub const ME_PREFIX: &str = ".me.";

/// Which branch a [`ConcretePath`] lives on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Branch {
    ReadOnly,
    ReadWrite,
}

/// The union-namespace path: always absolute, normalised (no `.`/`..`,
/// single separators between components).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalPath(PathBuf);

impl LogicalPath {
    /// Normalise an arbitrary path into a [`LogicalPath`].
    ///
    /// Rejects relative paths and anything without at least one directory
    /// separator component (spec §4.1 `InvalidPath`).
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(Error::InvalidPath);
        }
        let mut out = PathBuf::from("/");
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                Component::Normal(part) => out.push(part),
                Component::Prefix(_) => return Err(Error::InvalidPath),
            }
        }
        if out.as_os_str().len() > MAX_PATH_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(LogicalPath(out))
    }

    /// The root path `/`.
    pub fn root() -> Self {
        LogicalPath(PathBuf::from("/"))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Path::new("/")
    }

    /// Split into `(parent, basename)`. The root has no basename component
    /// to split off, which is itself a form of `InvalidPath` for any
    /// operation that needs to name an entry within a directory.
    pub fn split(&self) -> Result<(LogicalPath, String)> {
        let name = self.0.file_name().ok_or(Error::InvalidPath)?;
        let name = name.to_str().ok_or(Error::InvalidPath)?.to_owned();
        let parent = self.0.parent().unwrap_or(Path::new("/"));
        Ok((LogicalPath(parent.to_path_buf()), name))
    }

    /// Append a child name, producing the child's logical path.
    pub fn join(&self, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidPath);
        }
        let mut out = self.0.clone();
        out.push(name);
        if out.as_os_str().len() > MAX_PATH_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(LogicalPath(out))
    }
}

/// A concrete, branch-tagged filesystem path: `branch_root || suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcretePath {
    branch: Branch,
    full: PathBuf,
}

impl ConcretePath {
    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn as_path(&self) -> &Path {
        &self.full
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.full
    }
}

/// The two immutable branch roots established at mount (spec §3).
///
/// Invariant: neither root may be a prefix of the other in the logical
/// namespace, checked once at construction.
#[derive(Debug, Clone)]
pub struct BranchConfig {
    ro_root: PathBuf,
    rw_root: PathBuf,
}

impl BranchConfig {
    pub fn new(ro_root: impl Into<PathBuf>, rw_root: impl Into<PathBuf>) -> Result<Self> {
        let ro_root = ro_root.into();
        let rw_root = rw_root.into();
        if !ro_root.is_absolute() || !rw_root.is_absolute() {
            return Err(Error::InvalidPath);
        }
        if ro_root.starts_with(&rw_root) || rw_root.starts_with(&ro_root) {
            return Err(Error::InvalidPath);
        }
        Ok(BranchConfig { ro_root, rw_root })
    }

    pub fn ro_root(&self) -> &Path {
        &self.ro_root
    }

    pub fn rw_root(&self) -> &Path {
        &self.rw_root
    }

    fn root(&self, branch: Branch) -> &Path {
        match branch {
            Branch::ReadOnly => &self.ro_root,
            Branch::ReadWrite => &self.rw_root,
        }
    }

    fn concrete(&self, branch: Branch, suffix: &Path) -> Result<ConcretePath> {
        let mut full = self.root(branch).to_path_buf();
        // `suffix` is always a LogicalPath's absolute PathBuf; strip the
        // leading `/` so the join doesn't replace `full` outright.
        full.push(suffix.strip_prefix("/").unwrap_or(suffix));
        if full.as_os_str().len() > MAX_PATH_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(ConcretePath { branch, full })
    }
}

/// Pure path-mapping operations (spec §4.1).
pub struct PathMapper;

impl PathMapper {
    /// `to_ro(logical) -> ConcretePath`.
    pub fn to_ro(roots: &BranchConfig, logical: &LogicalPath) -> Result<ConcretePath> {
        roots.concrete(Branch::ReadOnly, logical.as_path())
    }

    /// `to_rw(logical) -> ConcretePath`.
    pub fn to_rw(roots: &BranchConfig, logical: &LogicalPath) -> Result<ConcretePath> {
        roots.concrete(Branch::ReadWrite, logical.as_path())
    }

    /// `to_special(logical, kind) -> ConcretePath`: the whiteout or ME
    /// sidecar for `logical`, always on the RW branch, in the same
    /// directory component as the hidden/deported name.
    pub fn to_special(
        roots: &BranchConfig,
        logical: &LogicalPath,
        kind: SpecialKind,
    ) -> Result<ConcretePath> {
        let (parent, name) = logical.split()?;
        let special_name = format!("{}{}", kind.prefix(), name);
        let special_logical = parent.join(&special_name)?;
        roots.concrete(Branch::ReadWrite, special_logical.as_path())
    }

    /// Classify a basename as normal, an ME sidecar, or a whiteout marker.
    pub fn classify(basename: &str) -> NameClass {
        if basename.starts_with(ME_PREFIX) {
            NameClass::Me
        } else if basename.starts_with(WHITEOUT_PREFIX) {
            NameClass::Whiteout
        } else {
            NameClass::Normal
        }
    }

    /// The real name a whiteout or ME sidecar basename hides, or `None` if
    /// `basename` is a normal (unprefixed) name.
    pub fn hidden_name(basename: &str) -> Option<&str> {
        basename
            .strip_prefix(WHITEOUT_PREFIX)
            .or_else(|| basename.strip_prefix(ME_PREFIX))
    }
}

/// Which sidecar kind [`PathMapper::to_special`] should build.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpecialKind {
    Me,
    Whiteout,
}

impl SpecialKind {
    fn prefix(self) -> &'static str {
        match self {
            SpecialKind::Me => ME_PREFIX,
            SpecialKind::Whiteout => WHITEOUT_PREFIX,
        }
    }
}

/// The result of [`PathMapper::classify`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NameClass {
    Normal,
    Me,
    Whiteout,
}

/// `is_me(name)` (spec §3).
pub fn is_me(name: &str) -> bool {
    name.starts_with(ME_PREFIX)
}

/// `is_whiteout(name)` (spec §3).
pub fn is_whiteout(name: &str) -> bool {
    name.starts_with(WHITEOUT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_dot_and_dotdot() {
        let p = LogicalPath::new("/a/./b/../c").unwrap();
        assert_eq!(p.as_path(), Path::new("/a/c"));
    }

    #[test]
    fn rejects_relative_paths() {
        assert_eq!(LogicalPath::new("a/b").unwrap_err(), Error::InvalidPath);
    }

    #[test]
    fn splits_parent_and_name() {
        let p = LogicalPath::new("/a/b.txt").unwrap();
        let (parent, name) = p.split().unwrap();
        assert_eq!(parent.as_path(), Path::new("/a"));
        assert_eq!(name, "b.txt");
    }

    #[test]
    fn to_special_places_sidecar_in_same_directory() {
        let roots = BranchConfig::new("/ro", "/rw").unwrap();
        let logical = LogicalPath::new("/a/b.txt").unwrap();
        let wh = PathMapper::to_special(&roots, &logical, SpecialKind::Whiteout).unwrap();
        assert_eq!(wh.as_path(), Path::new("/rw/a/.wh.b.txt"));
        let me = PathMapper::to_special(&roots, &logical, SpecialKind::Me).unwrap();
        assert_eq!(me.as_path(), Path::new("/rw/a/.me.b.txt"));
    }

    #[test]
    fn classifies_names() {
        assert_eq!(PathMapper::classify("foo"), NameClass::Normal);
        assert_eq!(PathMapper::classify(".me.foo"), NameClass::Me);
        assert_eq!(PathMapper::classify(".wh.foo"), NameClass::Whiteout);
    }

    #[test]
    fn rejects_overlapping_roots() {
        assert!(BranchConfig::new("/data", "/data/rw").is_err());
        assert!(BranchConfig::new("/data/ro", "/data").is_err());
    }
}
