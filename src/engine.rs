//! The content-addressable storage engine: persists digest-addressed
//! blobs and named references under a directory, with atomic writes and
//! crash-safe scratch-directory cleanup.

use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use cap_std::fs::{Dir, File, OpenOptions};
use cap_std_ext::cap_std;
use cap_std_ext::dirext::CapStdExtDirExt;
use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, CHUNK_SIZE};
use crate::digest::{Digest, DigestHasher, DEFAULT_ALGORITHM};
use crate::error::{Error, IoResultExt, JsonResultExt, Result};
use crate::gc;
use crate::layout;

/// A single-filename reference name, already validated against path
/// traversal (no `/`, `.`, or `..` components).
fn validate_ref_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::invalid_argument(format!(
            "invalid reference name {name:?}"
        )));
    }
    Ok(name)
}

fn blob_path(digest: &Digest) -> String {
    format!("{}/{}", layout::blob_dir(digest.algorithm()), digest.hex())
}

fn ref_path(name: &str) -> String {
    format!("{}/{name}", layout::REFS_DIR)
}

/// State of an [`Engine`]'s lazily created scratch directory.
struct Scratch {
    name: String,
    dir: Dir,
    /// Held open (and flocked) for the engine's lifetime; a dropped engine
    /// releases the lock, letting a future `Clean` reclaim the directory.
    _lock: File,
}

/// An open content-addressable store rooted at a directory.
pub struct Engine {
    dir: Dir,
    scratch: Mutex<Option<Scratch>>,
    /// Serializes mutating operations within this instance.
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}", std::process::id())
}

impl Engine {
    /// Initialize a fresh layout at `dir`. Fails if `dir` is non-empty.
    pub fn create(dir: &Dir) -> Result<Self> {
        layout::create(dir)?;
        Self::open(dir)
    }

    /// Initialize a fresh layout at the ambient path `root`.
    pub fn create_at(root: &Utf8Path) -> Result<Self> {
        let mut builder = cap_std::fs::DirBuilder::new();
        builder.recursive(true);
        cap_std::fs::Dir::create_ambient_dir_all(root, cap_std::ambient_authority())
            .ctx("creating root directory")?;
        let dir = cap_std::fs::Dir::open_ambient_dir(root, cap_std::ambient_authority())
            .ctx("opening root directory")?;
        Self::create(&dir)
    }

    /// Open an existing layout, validating the marker and sub-directories.
    pub fn open(dir: &Dir) -> Result<Self> {
        layout::validate(dir)?;
        let dir = dir.try_clone().ctx("cloning directory handle")?;
        tracing::debug!("opened CAS engine");
        Ok(Self {
            dir,
            scratch: Mutex::new(None),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open an existing layout at the ambient path `root`.
    pub fn open_at(root: &Utf8Path) -> Result<Self> {
        let dir = cap_std::fs::Dir::open_ambient_dir(root, cap_std::ambient_authority())
            .ctx("opening root directory")?;
        Self::open(&dir)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::invalid_argument("engine is closed"));
        }
        Ok(())
    }

    /// Release the scratch directory lock and open handles. Subsequent
    /// operations fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.scratch.lock().unwrap().take();
    }

    fn scratch_name(&self) -> Option<String> {
        self.scratch.lock().unwrap().as_ref().map(|s| s.name.clone())
    }

    /// Lazily create (or return) the `.temp-<random>` scratch directory
    /// owned by this engine instance, holding an exclusive flock on a
    /// `lock` file inside it for the engine's lifetime.
    fn ensure_scratch(&self) -> Result<()> {
        let mut guard = self.scratch.lock().unwrap();
        if guard.is_some() {
            return Ok(());
        }
        let name = format!(".temp-{}", unique_suffix());
        self.dir
            .create_dir(&name)
            .ctx(format!("creating scratch directory {name}"))?;
        let scratch_dir = self
            .dir
            .open_dir(&name)
            .ctx(format!("opening scratch directory {name}"))?;
        let mut opts = OpenOptions::new();
        opts.create(true).write(true).read(true);
        let lock_file = scratch_dir
            .open_with("lock", &opts)
            .ctx("creating scratch lock file")?;
        gc::lock_exclusive_nonblocking(&lock_file)
            .ctx("locking scratch directory (unexpectedly contended)")?;
        tracing::debug!(scratch = %name, "created scratch directory");
        *guard = Some(Scratch {
            name,
            dir: scratch_dir,
            _lock: lock_file,
        });
        Ok(())
    }

    fn with_scratch<T>(&self, f: impl FnOnce(&Dir) -> Result<T>) -> Result<T> {
        self.ensure_scratch()?;
        let guard = self.scratch.lock().unwrap();
        let scratch = guard.as_ref().expect("ensure_scratch just populated this");
        f(&scratch.dir)
    }

    /// Start streaming a new blob. The caller writes bytes, then calls
    /// [`BlobWriter::complete`] to finalize and atomically install it.
    pub fn blob_writer(&self) -> Result<BlobWriter<'_>> {
        self.ensure_open()?;
        self.ensure_scratch()?;
        let guard = self.scratch.lock().unwrap();
        let scratch = guard.as_ref().expect("ensure_scratch just populated this");
        let tmp_name = format!("blob-{}", unique_suffix());
        let mut opts = OpenOptions::new();
        opts.create_new(true).write(true).read(true);
        let file = scratch
            .dir
            .open_with(&tmp_name, &opts)
            .ctx("creating blob scratch file")?;
        Ok(BlobWriter {
            engine: self,
            tmp_name,
            file,
            hasher: Some(DigestHasher::new(DEFAULT_ALGORITHM)?),
            size: 0,
        })
    }

    /// Stream `reader` into a new blob, returning its digest and size.
    /// Idempotent: if the content already exists, the scratch file is
    /// discarded and the existing digest is returned.
    pub fn put_blob(&self, mut reader: impl Read) -> Result<(Digest, u64)> {
        self.put_blob_cancellable(&mut reader, &CancelToken::none())
    }

    /// As [`Self::put_blob`], honoring cancellation every [`CHUNK_SIZE`] bytes.
    pub fn put_blob_cancellable(
        &self,
        reader: &mut impl Read,
        cancel: &CancelToken,
    ) -> Result<(Digest, u64)> {
        let _lock = self.write_lock.lock().unwrap();
        let mut writer = self.blob_writer()?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            cancel.check()?;
            let n = reader.read(&mut buf).ctx("reading blob source")?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).ctx("writing blob scratch file")?;
        }
        writer.complete()
    }

    /// Serialize `value` to canonical JSON and store it as a blob.
    pub fn put_blob_json<T: Serialize>(&self, value: &T) -> Result<(Digest, u64)> {
        let bytes = serde_json::to_vec(value).ctx("serializing blob")?;
        self.put_blob(io::Cursor::new(bytes))
    }

    /// Open a blob for streaming read. Fails with [`Error::NotFound`] if
    /// absent.
    pub fn get_blob(&self, digest: &Digest) -> Result<File> {
        self.ensure_open()?;
        let path = blob_path(digest);
        self.dir.open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(format!("blob {digest}"))
            } else {
                Error::io(format!("opening blob {digest}"), e)
            }
        })
    }

    /// Read and JSON-decode a blob, verifying its digest first.
    pub fn get_blob_json<T: for<'de> Deserialize<'de>>(&self, digest: &Digest) -> Result<T> {
        let bytes = self.get_blob_bytes_verified(digest)?;
        serde_json::from_slice(&bytes).ctx(format!("parsing blob {digest}"))
    }

    /// Read a blob fully into memory and verify its computed digest matches
    /// `digest`, failing with [`Error::DigestMismatch`] on corruption.
    pub fn get_blob_bytes_verified(&self, digest: &Digest) -> Result<Vec<u8>> {
        let mut f = io::BufReader::new(self.get_blob(digest)?);
        let mut bytes = Vec::new();
        f.read_to_end(&mut bytes).ctx(format!("reading blob {digest}"))?;
        let found = Digest::of(&bytes)?;
        if digest.algorithm() == DEFAULT_ALGORITHM && found != *digest {
            return Err(Error::DigestMismatch {
                expected: digest.clone(),
                found,
            });
        }
        Ok(bytes)
    }

    /// Idempotent blob removal; missing is success.
    pub fn delete_blob(&self, digest: &Digest) -> Result<()> {
        self.ensure_open()?;
        let _lock = self.write_lock.lock().unwrap();
        match self.dir.remove_file(blob_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("deleting blob {digest}"), e)),
        }
    }

    /// Enumerate stored blobs by scanning `blobs/<algo>/`. Entries that do
    /// not validate as well-formed hex digests are skipped silently.
    pub fn list_blobs(&self) -> Result<Vec<Digest>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        let dir_path = layout::blob_dir(DEFAULT_ALGORITHM);
        let entries = match self.dir.entries_in(&dir_path) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::io("listing blobs", e)),
        };
        for entry in entries {
            let entry = entry.ctx("reading blob directory entry")?;
            let name = entry.file_name();
            let Some(hex) = name.to_str() else { continue };
            if let Ok(digest) = Digest::new(DEFAULT_ALGORITHM, hex) {
                out.push(digest);
            }
        }
        Ok(out)
    }

    /// Write `refs/<name>` atomically; overwrites silently.
    pub fn put_reference(&self, name: &str, descriptor: &oci_spec::image::Descriptor) -> Result<()> {
        self.ensure_open()?;
        let name = validate_ref_name(name)?;
        let _lock = self.write_lock.lock().unwrap();
        let json = serde_json::to_vec(descriptor).ctx("serializing reference")?;
        self.dir
            .atomic_write(ref_path(name), json)
            .ctx(format!("writing reference {name}"))?;
        tracing::debug!(reference = name, "wrote reference");
        Ok(())
    }

    /// Read and JSON-decode `refs/<name>`.
    pub fn get_reference(&self, name: &str) -> Result<oci_spec::image::Descriptor> {
        self.ensure_open()?;
        let name = validate_ref_name(name)?;
        let bytes = self.dir.read(ref_path(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(format!("reference {name}"))
            } else {
                Error::io(format!("reading reference {name}"), e)
            }
        })?;
        serde_json::from_slice(&bytes).ctx(format!("parsing reference {name}"))
    }

    /// Idempotent reference removal; missing is success.
    pub fn delete_reference(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let name = validate_ref_name(name)?;
        let _lock = self.write_lock.lock().unwrap();
        match self.dir.remove_file(ref_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("deleting reference {name}"), e)),
        }
    }

    /// Enumerate `refs/`.
    pub fn list_references(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        for entry in self.dir.entries_in(layout::REFS_DIR).ctx("listing references")? {
            let entry = entry.ctx("reading reference directory entry")?;
            if let Some(name) = entry.file_name().to_str() {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    /// Garbage-collect abandoned scratch directories.
    pub fn clean(&self) -> Result<()> {
        self.ensure_open()?;
        let _lock = self.write_lock.lock().unwrap();
        gc::clean(&self.dir, self.scratch_name().as_deref())
    }

    /// Extension, not invoked by [`Self::clean`]: remove blobs unreachable
    /// from every stored reference, resolving the descriptor graph through
    /// known OCI media types. Left optional since full blob collection is
    /// not required for correctness, only for reclaiming space.
    pub fn sweep_unreferenced_blobs(&self) -> Result<Vec<Digest>> {
        self.ensure_open()?;
        let _lock = self.write_lock.lock().unwrap();
        gc::sweep_unreferenced_blobs(self)
    }

    pub(crate) fn dir(&self) -> &Dir {
        &self.dir
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Streaming writer for a new blob: bytes are hashed as they are written
/// to a scratch file, and [`BlobWriter::complete`] atomically installs the
/// result at `blobs/<algo>/<hex>`. Dropping the writer without calling
/// `complete` removes the scratch file instead of leaking it.
pub struct BlobWriter<'a> {
    engine: &'a Engine,
    tmp_name: String,
    file: File,
    hasher: Option<DigestHasher>,
    size: u64,
}

impl<'a> Debug for BlobWriter<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("tmp_name", &self.tmp_name)
            .field("size", &self.size)
            .finish()
    }
}

impl<'a> Write for BlobWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher
            .as_mut()
            .expect("writer not yet completed")
            .write_all(buf)?;
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl<'a> BlobWriter<'a> {
    /// Finish writing: finalize the hash and rename the scratch file into
    /// place. If a blob with the same digest already exists, the scratch
    /// file is discarded instead (idempotent `PutBlob`).
    pub fn complete(mut self) -> Result<(Digest, u64)> {
        let hasher = self.hasher.take().expect("complete called at most once");
        let digest = hasher.finish()?;
        let size = self.size;
        let tmp_name = self.tmp_name.clone();
        let dest = blob_path(&digest);
        let engine = self.engine;
        engine.with_scratch(|scratch_dir| {
            if engine.dir.try_exists(&dest).ctx("checking existing blob")? {
                scratch_dir
                    .remove_file(&tmp_name)
                    .ctx("discarding duplicate scratch file")?;
                return Ok(());
            }
            if let Some(parent) = Utf8Path::new(&dest).parent() {
                if !parent.as_str().is_empty() {
                    let mut builder = cap_std::fs::DirBuilder::new();
                    builder.recursive(true);
                    engine
                        .dir
                        .ensure_dir_with(parent.as_str(), &builder)
                        .ctx("creating blob algorithm directory")?;
                }
            }
            scratch_dir
                .rename(&tmp_name, &engine.dir, &dest)
                .ctx("installing blob")?;
            Ok(())
        })?;
        tracing::debug!(%digest, size, "wrote blob");
        Ok((digest, size))
    }
}

impl<'a> Drop for BlobWriter<'a> {
    fn drop(&mut self) {
        // `complete` took the hasher; a writer that never completed still
        // has one, and its scratch file needs to be removed rather than
        // left behind in the engine's scratch directory.
        if self.hasher.is_none() {
            return;
        }
        let tmp_name = self.tmp_name.clone();
        let result = self.engine.with_scratch(|scratch_dir| {
            match scratch_dir.remove_file(&tmp_name) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::io("removing abandoned blob scratch file", e)),
            }
        });
        if let Err(e) = result {
            tracing::debug!(%tmp_name, error = %e, "failed to remove abandoned blob scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap_std_ext::cap_tempfile;
    use oci_spec::image::{DescriptorBuilder, MediaType};

    fn fixture() -> (cap_tempfile::TempDir, Engine) {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        let engine = Engine::create(&td).unwrap();
        (td, engine)
    }

    #[test]
    fn put_then_get_blob_roundtrips() {
        let (_td, engine) = fixture();
        let (digest, size) = engine.put_blob(io::Cursor::new(b"some contents".to_vec())).unwrap();
        assert_eq!(size, 13);
        let mut out = Vec::new();
        engine.get_blob(&digest).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"some contents");
    }

    #[test]
    fn put_blob_is_idempotent() {
        let (_td, engine) = fixture();
        let (d1, _) = engine.put_blob(io::Cursor::new(b"dup".to_vec())).unwrap();
        let (d2, _) = engine.put_blob(io::Cursor::new(b"dup".to_vec())).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(engine.list_blobs().unwrap().len(), 1);
    }

    #[test]
    fn put_empty_blob_is_well_known_digest() {
        let (_td, engine) = fixture();
        let (digest, size) = engine.put_blob(io::Cursor::new(Vec::new())).unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            digest.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let mut out = Vec::new();
        engine.get_blob(&digest).unwrap().read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn get_missing_blob_is_not_found() {
        let (_td, engine) = fixture();
        let bogus = Digest::of(b"never stored").unwrap();
        assert!(matches!(engine.get_blob(&bogus), Err(Error::NotFound(_))));
    }

    #[test]
    fn delete_blob_is_idempotent() {
        let (_td, engine) = fixture();
        let (digest, _) = engine.put_blob(io::Cursor::new(b"x".to_vec())).unwrap();
        engine.delete_blob(&digest).unwrap();
        engine.delete_blob(&digest).unwrap();
        assert!(engine.list_blobs().unwrap().is_empty());
    }

    #[test]
    fn list_blobs_empty_on_fresh_layout() {
        let (_td, engine) = fixture();
        assert!(engine.list_blobs().unwrap().is_empty());
    }

    #[test]
    fn list_blobs_empty_after_put_then_delete_all() {
        let (_td, engine) = fixture();
        let mut digests = Vec::new();
        for data in [&b"a"[..], &b"b"[..], &b"c"[..]] {
            let (d, _) = engine.put_blob(io::Cursor::new(data.to_vec())).unwrap();
            digests.push(d);
        }
        assert_eq!(engine.list_blobs().unwrap().len(), 3);
        for d in &digests {
            engine.delete_blob(d).unwrap();
        }
        assert!(engine.list_blobs().unwrap().is_empty());
    }

    #[test]
    fn reference_roundtrips_and_overwrites() {
        let (_td, engine) = fixture();
        let desc = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest("sha256:0325a15b888c1daf0db4c3ba4c5c6ee9b6a9f4e8ce48ff3f3f75c0e6f3a9a17c")
            .size(100_i64)
            .build()
            .unwrap();
        engine.put_reference("ref2", &desc).unwrap();
        let got = engine.get_reference("ref2").unwrap();
        assert_eq!(got, desc);

        let desc2 = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest("sha256:1111111111111111111111111111111111111111111111111111111111111111")
            .size(200_i64)
            .build()
            .unwrap();
        engine.put_reference("ref2", &desc2).unwrap();
        assert_eq!(engine.get_reference("ref2").unwrap(), desc2);
    }

    #[test]
    fn get_missing_reference_is_not_found() {
        let (_td, engine) = fixture();
        assert!(matches!(engine.get_reference("noent"), Err(Error::NotFound(_))));
    }

    #[test]
    fn delete_reference_is_idempotent() {
        let (_td, engine) = fixture();
        engine.delete_reference("noent").unwrap();
        engine.delete_reference("noent").unwrap();
    }

    #[test]
    fn reference_names_reject_path_separators() {
        let (_td, engine) = fixture();
        let desc = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest("sha256:2222222222222222222222222222222222222222222222222222222222222222")
            .size(1_i64)
            .build()
            .unwrap();
        assert!(matches!(
            engine.put_reference("sub/dir", &desc),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(engine.put_reference("..", &desc), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn list_references_enumerates_names() {
        let (_td, engine) = fixture();
        let desc = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest("sha256:3333333333333333333333333333333333333333333333333333333333333333")
            .size(1_i64)
            .build()
            .unwrap();
        engine.put_reference("a", &desc).unwrap();
        engine.put_reference("b", &desc).unwrap();
        let mut names = engine.list_references().unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn closed_engine_refuses_operations() {
        let (_td, engine) = fixture();
        engine.close();
        assert!(matches!(
            engine.put_blob(io::Cursor::new(Vec::new())),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn open_on_fresh_directory_is_invalid_layout() {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        assert!(matches!(Engine::open(&td), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn get_blob_json_detects_corruption() {
        let (_td, engine) = fixture();
        let (digest, _) = engine.put_blob_json(&serde_json::json!({"a": 1})).unwrap();
        let path = blob_path(&digest);
        engine.dir.write(&path, b"{\"a\": 2}").unwrap();
        let err = engine.get_blob_json::<serde_json::Value>(&digest).unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }

    fn scratch_blob_file_count(td: &cap_tempfile::TempDir) -> usize {
        let mut count = 0;
        for entry in td.entries().unwrap() {
            let entry = entry.unwrap();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(".temp-") {
                continue;
            }
            for inner in td.entries_in(&name).unwrap() {
                let inner = inner.unwrap();
                if inner.file_name().to_str().is_some_and(|n| n.starts_with("blob-")) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn dropping_an_incomplete_blob_writer_removes_its_scratch_file() {
        let (td, engine) = fixture();
        let mut writer = engine.blob_writer().unwrap();
        writer.write_all(b"never finished").unwrap();
        assert_eq!(scratch_blob_file_count(&td), 1);
        drop(writer);
        assert_eq!(scratch_blob_file_count(&td), 0);
    }

    #[test]
    fn cancelled_put_blob_leaves_no_scratch_file() {
        let (td, engine) = fixture();
        let cancel = CancelToken::none();
        cancel.cancel();
        let mut reader = io::Cursor::new(b"abandoned".to_vec());
        let err = engine.put_blob_cancellable(&mut reader, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(scratch_blob_file_count(&td), 0);
    }
}
