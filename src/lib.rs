//! A two-branch union filesystem core: merges a read-only branch and a
//! read-write branch into one logical namespace, copying files up to the
//! RW branch on first write and deporting metadata changes to `.me.`
//! sidecars when a write would otherwise be avoidable.

pub mod attr;
pub mod branch;
pub mod config;
pub mod copyup;
pub mod dirmerge;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod lock;
pub mod me;
pub mod path;
pub mod whiteout;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
