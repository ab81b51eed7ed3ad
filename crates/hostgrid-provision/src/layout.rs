//! On-disk directory layout of one service.
//!
//! ```text
//! {tenant_root}/{username}/{service}/
//!     data/                 tenant content, mounted into the primary container
//!     filebrowser_data/     companion database
//!     topology.toml         rendered declaration, re-read by every control call
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hostgrid_core::Topology;

use crate::error::{ProvisionError, ProvisionResult};

pub const DATA_DIR: &str = "data";
pub const COMPANION_DIR: &str = "filebrowser_data";
pub const COMPANION_DB: &str = "filebrowser.db";
pub const SCRIPTS_DIR: &str = "scripts";
pub const DECLARATION_FILE: &str = "topology.toml";

#[derive(Debug, Clone)]
pub struct ServiceLayout {
    root: PathBuf,
}

impl ServiceLayout {
    pub fn new(tenant_root: &Path, username: &str, service: &str) -> Self {
        Self {
            root: tenant_root.join(username).join(service),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn companion_dir(&self) -> PathBuf {
        self.root.join(COMPANION_DIR)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(SCRIPTS_DIR)
    }

    pub fn declaration_path(&self) -> PathBuf {
        self.root.join(DECLARATION_FILE)
    }

    /// Create `data/` and `filebrowser_data/` if absent.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(self.data_dir())?;
        fs::create_dir_all(self.companion_dir())?;
        Ok(())
    }

    /// Create every relative directory mount source of `topology`.
    pub fn ensure_mount_sources(&self, topology: &Topology) -> io::Result<()> {
        for dir in topology.directory_sources() {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn write_declaration(&self, topology: &Topology) -> ProvisionResult<()> {
        let text = topology
            .to_toml_string()
            .map_err(|e| ProvisionError::Declaration(e.to_string()))?;
        fs::write(self.declaration_path(), text)?;
        Ok(())
    }

    /// Read the persisted declaration. `Ok(None)` when it does not exist.
    pub fn read_declaration(&self) -> ProvisionResult<Option<Topology>> {
        let text = match fs::read_to_string(self.declaration_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let topology = Topology::from_toml_str(&text)
            .map_err(|e| ProvisionError::Declaration(e.to_string()))?;
        Ok(Some(topology))
    }
}
