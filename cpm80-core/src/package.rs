//! Program packages: ZIP archives of CP/M files with an optional JSON
//! manifest.
//!
//! A package is how a drive gets provisioned. The archive's files are
//! installed onto a [`VirtualDisk`] under their 8.3 names (nested paths
//! flatten to the file name). An optional `manifest.json` names the
//! package and may restrict which archive members are installed.

use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;

use crate::disk::{normalize_name, VirtualDisk};
use crate::error::{CpmError, CpmResult};

const MANIFEST_NAME: &str = "MANIFEST.JSON";

/// Package manifest schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Allow-list of archive members to install; empty means everything.
    #[serde(default)]
    pub files: Vec<String>,
}

impl Default for PackageManifest {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            version: None,
            description: None,
            files: Vec::new(),
        }
    }
}

/// A loaded package: manifest plus file contents keyed by 8.3 name.
#[derive(Debug, Clone)]
pub struct Package {
    pub manifest: PackageManifest,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Package {
    /// Copy every file onto the disk, clobbering same-named entries.
    pub fn install(&self, disk: &mut VirtualDisk) {
        for (name, data) in &self.files {
            disk.write(name, data.clone());
        }
        debug!(package = %self.manifest.name, files = self.files.len(), "package installed");
    }
}

/// Load a package from ZIP data.
pub fn load_package<R: Read + Seek>(reader: R) -> CpmResult<Package> {
    let mut archive = ZipArchive::new(reader)?;
    let mut manifest: Option<PackageManifest> = None;
    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let path = entry.name().to_string();
        let file_name = path.rsplit('/').next().unwrap_or(&path);
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        if file_name.eq_ignore_ascii_case(MANIFEST_NAME) {
            manifest = Some(serde_json::from_slice(&content)?);
        } else {
            files.insert(normalize_name(file_name), content);
        }
    }

    let manifest = manifest.unwrap_or_default();
    if !manifest.files.is_empty() {
        let allowed: Vec<String> = manifest.files.iter().map(|n| normalize_name(n)).collect();
        files.retain(|name, _| allowed.contains(name));
    }
    if files.is_empty() {
        return Err(CpmError::Package(format!(
            "package {:?} contains no files",
            manifest.name
        )));
    }

    Ok(Package { manifest, files })
}

/// Load a package from a `.zip` on the host filesystem.
pub fn load_package_from_path(path: &Path) -> CpmResult<Package> {
    let file = std::fs::File::open(path)?;
    load_package(std::io::BufReader::new(file))
}
