//! On-disk layout constants and validation.

use cap_std::fs::Dir;
use cap_std_ext::cap_std;
use cap_std_ext::dirext::CapStdExtDirExt;
use serde::{Deserialize, Serialize};

use crate::digest::DEFAULT_ALGORITHM;
use crate::error::{Error, IoResultExt, JsonResultExt, Result};

/// Path of the layout marker file.
pub const LAYOUT_MARKER: &str = "oci-layout";
/// Path of the blob directory for the default algorithm.
pub fn blob_dir(algorithm: &str) -> String {
    format!("blobs/{algorithm}")
}
/// Path of the references directory.
pub const REFS_DIR: &str = "refs";
/// Recognized layout marker version.
pub const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

/// Create a fresh layout at `dir`, which must be empty.
pub(crate) fn create(dir: &Dir) -> Result<()> {
    if dir.entries().ctx("listing target directory")?.next().is_some() {
        return Err(Error::already_exists("target directory is not empty"));
    }
    write_marker(dir)?;
    ensure_dir(dir, &blob_dir(DEFAULT_ALGORITHM))?;
    ensure_dir(dir, REFS_DIR)?;
    Ok(())
}

fn write_marker(dir: &Dir) -> Result<()> {
    let marker = LayoutMarker {
        image_layout_version: LAYOUT_VERSION.to_string(),
    };
    let json = serde_json::to_vec(&marker).ctx("serializing layout marker")?;
    dir.atomic_write(LAYOUT_MARKER, json).ctx("writing oci-layout")?;
    Ok(())
}

fn ensure_dir(dir: &Dir, path: &str) -> Result<()> {
    let mut builder = cap_std::fs::DirBuilder::new();
    builder.recursive(true);
    dir.ensure_dir_with(path, &builder).ctx(format!("creating {path}"))?;
    Ok(())
}

/// Validate that `dir` is a recognized OCI-layout-shaped CAS root.
/// Read-only filesystems validate fine — validation is read-only.
pub(crate) fn validate(dir: &Dir) -> Result<()> {
    let marker_bytes = dir
        .read_to_string(LAYOUT_MARKER)
        .map_err(|e| Error::invalid_layout(format!("missing or unreadable {LAYOUT_MARKER}: {e}")))?;
    let marker: LayoutMarker = serde_json::from_str(&marker_bytes)
        .map_err(|e| Error::invalid_layout(format!("malformed {LAYOUT_MARKER}: {e}")))?;
    if marker.image_layout_version != LAYOUT_VERSION {
        return Err(Error::invalid_layout(format!(
            "unrecognized imageLayoutVersion {:?}",
            marker.image_layout_version
        )));
    }
    validate_is_dir(dir, &blob_dir(DEFAULT_ALGORITHM))?;
    validate_is_dir(dir, REFS_DIR)?;
    Ok(())
}

fn validate_is_dir(dir: &Dir, path: &str) -> Result<()> {
    let meta = dir
        .symlink_metadata(path)
        .map_err(|_| Error::invalid_layout(format!("missing directory {path}")))?;
    if !meta.is_dir() {
        return Err(Error::invalid_layout(format!("{path} is not a directory")));
    }
    Ok(())
}
