//! Read-only files bundled with a service.

use crate::connector::Connector;
use crate::error::ConnectorError;
use std::path::{Component, Path, PathBuf};

/// Resource directory used when none was set.
pub const DEFAULT_RESOURCES_DIR: &str = "resources";

fn resolve(dir: &Path, name: &str) -> Result<PathBuf, ConnectorError> {
    let relative = Path::new(name);
    let contained = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(ConnectorError::Resource {
            name: name.to_string(),
            reason: "must be a relative path inside the resource directory".to_string(),
        });
    }
    Ok(dir.join(relative))
}

impl Connector {
    /// Directory that resource names are relative to.
    pub fn set_resources(&self, dir: impl Into<PathBuf>) {
        *self.inner.resources.write() = Some(dir.into());
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.inner
            .resources
            .read()
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_DIR))
    }

    pub fn read_resource(&self, name: &str) -> Result<Vec<u8>, ConnectorError> {
        let path = resolve(&self.resources_dir(), name)?;
        std::fs::read(&path).map_err(|e| ConnectorError::Resource {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn read_resource_string(&self, name: &str) -> Result<String, ConnectorError> {
        let bytes = self.read_resource(name)?;
        String::from_utf8(bytes).map_err(|e| ConnectorError::Resource {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
