//! Garbage collection: abandoned scratch-directory reclamation and the
//! optional unreferenced-blob sweep.

use std::collections::HashSet;
use std::io;

use cap_std::fs::{Dir, File};
use cap_std_ext::cap_std;
use cap_std_ext::dirext::CapStdExtDirExt;
use rustix::fd::AsFd;
use rustix::fs::FlockOperation;

use crate::digest::{Digest, DEFAULT_ALGORITHM};
use crate::engine::Engine;
use crate::error::{Error, IoResultExt, Result};
use crate::layout;

const SCRATCH_PREFIX: &str = ".temp-";

pub(crate) fn lock_exclusive_nonblocking(file: &File) -> io::Result<()> {
    rustix::fs::flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(io::Error::from)
}

/// Remove every `.temp-*` directory in `dir` with no live owner, skipping
/// `owned_scratch` (this engine instance's own directory, if any).
pub(crate) fn clean(dir: &Dir, owned_scratch: Option<&str>) -> Result<()> {
    for entry in dir.entries().ctx("listing CAS root")? {
        let entry = entry.ctx("reading CAS root entry")?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(SCRATCH_PREFIX) {
            continue;
        }
        if Some(name) == owned_scratch {
            continue;
        }
        if !entry.file_type().ctx("stat'ing scratch directory")?.is_dir() {
            continue;
        }
        if is_abandoned(dir, name)? {
            tracing::debug!(scratch = name, "reclaiming abandoned scratch directory");
            dir.remove_dir_all(name).ctx("removing abandoned scratch directory")?;
        } else {
            tracing::debug!(scratch = name, "scratch directory has a live owner, skipping");
        }
    }
    Ok(())
}

/// A scratch directory is abandoned if we can take its lock file's
/// exclusive flock (meaning no process currently holds it), or if it has
/// no lock file at all (a foreign directory that never followed the
/// protocol).
fn is_abandoned(dir: &Dir, name: &str) -> Result<bool> {
    let scratch_dir = match dir.open_dir(name) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::io(format!("opening {name}"), e)),
    };
    let lock_path = "lock";
    let lock_file = match scratch_dir.open(lock_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::io(format!("opening {name}/lock"), e)),
    };
    match lock_exclusive_nonblocking(&lock_file) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(Error::io(format!("locking {name}/lock"), e)),
    }
}

/// Resolve every reachable blob digest by walking each reference's
/// descriptor, then its manifest's config and layers, and delete any
/// stored blob not in that set. Optional extension, not invoked
/// automatically by `clean`.
pub(crate) fn sweep_unreferenced_blobs(engine: &Engine) -> Result<Vec<Digest>> {
    let mut reachable: HashSet<Digest> = HashSet::new();
    for name in list_reference_names(engine.dir())? {
        let descriptor = engine.get_reference(&name)?;
        collect_reachable(engine, &descriptor, &mut reachable)?;
    }

    let mut removed = Vec::new();
    for digest in engine.list_blobs()? {
        if !reachable.contains(&digest) {
            engine.delete_blob(&digest)?;
            removed.push(digest);
        }
    }
    Ok(removed)
}

fn list_reference_names(dir: &Dir) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in dir.entries_in(layout::REFS_DIR).ctx("listing references")? {
        let entry = entry.ctx("reading reference directory entry")?;
        if let Some(name) = entry.file_name().to_str() {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

fn collect_reachable(
    engine: &Engine,
    descriptor: &oci_spec::image::Descriptor,
    reachable: &mut HashSet<Digest>,
) -> Result<()> {
    use oci_spec::image::MediaType;

    let digest = Digest::parse(descriptor.digest())?;
    if digest.algorithm() != DEFAULT_ALGORITHM || !reachable.insert(digest.clone()) {
        return Ok(());
    }

    if *descriptor.media_type() == MediaType::ImageManifest {
        let manifest: oci_spec::image::ImageManifest = engine.get_blob_json(&digest)?;
        collect_reachable(engine, manifest.config(), reachable)?;
        for layer in manifest.layers() {
            collect_reachable(engine, layer, reachable)?;
        }
    }
    Ok(())
}
