//! Mount configuration (spec §6): the two branch roots, the `statfs`
//! magic number and fsid seed, loadable from a TOML file or the CLI.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::path::BranchConfig;

/// Default `f_type` reported by `statfs` when the mount config doesn't
/// override it: an arbitrary but stable magic distinguishing this union
/// from a plain passthrough mount.
pub const DEFAULT_FS_MAGIC: u32 = 0x756e_6673; // "unfs"

#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    pub ro_root: PathBuf,
    pub rw_root: PathBuf,
    #[serde(default = "default_fs_magic")]
    pub fs_magic: u32,
    #[serde(default)]
    pub fsid_seed: u64,
}

fn default_fs_magic() -> u32 {
    DEFAULT_FS_MAGIC
}

impl MountConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|_| Error::InvalidPath)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&text)
    }

    pub fn branch_config(&self) -> Result<BranchConfig> {
        BranchConfig::new(&self.ro_root, &self.rw_root)
    }
}

/// CLI surface for the demo mount binary: flags override config-file
/// values when both are given.
#[derive(Debug, Parser)]
#[command(name = "unionfs-mount", about = "Two-branch union filesystem core exerciser")]
pub struct Cli {
    /// Path to a TOML mount configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// RO branch root, overriding the config file.
    #[arg(long)]
    pub ro: Option<PathBuf>,

    /// RW branch root, overriding the config file.
    #[arg(long)]
    pub rw: Option<PathBuf>,
}

impl Cli {
    /// Resolve the effective [`MountConfig`] from the config file (if any)
    /// and CLI overrides.
    pub async fn resolve(self) -> Result<MountConfig> {
        let mut config = match &self.config {
            Some(path) => MountConfig::load(path).await?,
            None => MountConfig { ro_root: PathBuf::new(), rw_root: PathBuf::new(), fs_magic: DEFAULT_FS_MAGIC, fsid_seed: 0 },
        };
        if let Some(ro) = self.ro {
            config.ro_root = ro;
        }
        if let Some(rw) = self.rw {
            config.rw_root = rw;
        }
        if config.ro_root.as_os_str().is_empty() || config.rw_root.as_os_str().is_empty() {
            return Err(Error::InvalidPath);
        }
        Ok(config)
    }
}
