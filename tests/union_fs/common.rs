use std::sync::Arc;

use tempfile::TempDir;
use unionfs_core::copyup::StdCopyup;
use unionfs_core::host::StdHostFs;
use unionfs_core::path::BranchConfig;
use unionfs_core::Dispatcher;

pub struct Fixture {
    pub ro: TempDir,
    pub rw: TempDir,
    pub dispatcher: Dispatcher,
}

impl Fixture {
    pub fn new() -> Self {
        let ro = TempDir::new().expect("create ro temp dir");
        let rw = TempDir::new().expect("create rw temp dir");
        let roots = BranchConfig::new(ro.path(), rw.path()).expect("branch config");
        let dispatcher = Dispatcher::new(Arc::new(StdHostFs), roots, Arc::new(StdCopyup), 0x756e6673, 1);
        Fixture { ro, rw, dispatcher }
    }

    pub fn ro_path(&self, name: &str) -> std::path::PathBuf {
        self.ro.path().join(name)
    }

    pub fn rw_path(&self, name: &str) -> std::path::PathBuf {
        self.rw.path().join(name)
    }
}
