//! The image mutator: builds a new manifest+config+layer graph on top of
//! an existing one.

use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use oci_spec::image::{
    Descriptor, DescriptorBuilder, History, HistoryBuilder, ImageConfiguration, ImageManifest,
    MediaType,
};

use crate::cancel::{CancelToken, CHUNK_SIZE};
use crate::digest::DigestHasher;
use crate::engine::{BlobWriter, Engine};
use crate::error::{Error, Result};

/// The mutator's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Loaded,
    Dirty,
    Clean,
}

/// A stateful session that edits the manifest/config graph reachable from
/// a source descriptor.
pub struct Mutator {
    engine: Arc<Engine>,
    source: Descriptor,
    state: State,
    manifest: Option<ImageManifest>,
    config: Option<ImageConfiguration>,
}

/// Metadata merged into the top-level image config by [`Mutator::set`].
#[derive(Debug, Clone, Default)]
pub struct ConfigMeta {
    pub created: Option<String>,
    pub author: Option<String>,
}

impl Mutator {
    /// Begin a session editing the manifest `source` points at. Fails if
    /// `source` is not an OCI image manifest descriptor. No I/O beyond
    /// this check occurs here.
    pub fn new(engine: Arc<Engine>, source: Descriptor) -> Result<Self> {
        if *source.media_type() != MediaType::ImageManifest {
            return Err(Error::invalid_argument(format!(
                "source descriptor has media type {:?}, expected an image manifest",
                source.media_type()
            )));
        }
        Ok(Self {
            engine,
            source,
            state: State::Fresh,
            manifest: None,
            config: None,
        })
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.state != State::Fresh {
            return Ok(());
        }
        let digest = crate::digest::Digest::parse(self.source.digest())?;
        let manifest: ImageManifest = self.engine.get_blob_json(&digest)?;
        let config: ImageConfiguration = self.engine.get_blob_json(manifest.config())?;
        self.manifest = Some(manifest);
        self.config = Some(config);
        self.state = State::Loaded;
        Ok(())
    }

    fn manifest_mut(&mut self) -> &mut ImageManifest {
        self.manifest.as_mut().expect("ensure_loaded was called")
    }

    fn config_mut(&mut self) -> &mut ImageConfiguration {
        self.config.as_mut().expect("ensure_loaded was called")
    }

    /// Start writing a new gzip-compressed layer. Pass the result to
    /// [`Self::add`] or [`Self::add_non_distributable`] (or drop it to
    /// abandon the layer).
    pub fn layer_writer(&mut self, compression: Option<Compression>) -> Result<LayerWriter<'_>> {
        self.ensure_loaded()?;
        Ok(LayerWriter {
            uncompressed_hash: DigestHasher::new(crate::digest::DEFAULT_ALGORITHM)?,
            compressor: GzEncoder::new(
                self.engine.blob_writer()?,
                compression.unwrap_or_default(),
            ),
        })
    }

    /// Append a distributable gzip layer written via `layer` (see
    /// [`Self::layer_writer`]), and its history entry.
    pub fn add(&mut self, layer: LayerWriter<'_>, history: History) -> Result<()> {
        self.append_layer(layer, history, MediaType::ImageLayerGzip)
    }

    /// As [`Self::add`], but the layer is marked non-distributable.
    pub fn add_non_distributable(&mut self, layer: LayerWriter<'_>, history: History) -> Result<()> {
        self.append_layer(layer, history, MediaType::ImageLayerNonDistributableGzip)
    }

    /// Convenience wrapper around [`Self::layer_writer`] + [`Self::add`]
    /// for callers who already have the whole uncompressed tar stream in
    /// hand.
    pub fn add_stream(
        &mut self,
        reader: impl Read,
        history: History,
        compression: Option<Compression>,
    ) -> Result<()> {
        self.add_stream_cancellable(reader, history, compression, &CancelToken::none())
    }

    pub fn add_stream_cancellable(
        &mut self,
        mut reader: impl Read,
        history: History,
        compression: Option<Compression>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut writer = self.layer_writer(compression)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            cancel.check()?;
            let n = reader
                .read(&mut buf)
                .map_err(|e| Error::io("reading layer source", e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| Error::io("writing layer", e))?;
        }
        self.add(writer, history)
    }

    fn append_layer(
        &mut self,
        layer: LayerWriter<'_>,
        mut history: History,
        media_type: MediaType,
    ) -> Result<()> {
        self.ensure_loaded()?;
        let (uncompressed_digest, gz_digest, gz_size) = layer.complete()?;

        let descriptor = DescriptorBuilder::default()
            .media_type(media_type)
            .digest(gz_digest.to_string())
            .size(gz_size as i64)
            .build()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;

        history.set_empty_layer(false);

        let manifest = self.manifest_mut();
        manifest.layers_mut().push(descriptor);

        let config = self.config_mut();
        let mut rootfs = config.rootfs().clone();
        rootfs.diff_ids_mut().push(uncompressed_digest.to_string());
        config.set_rootfs(rootfs);
        config.history_mut().push(history);

        self.state = State::Dirty;
        self.verify_invariants()
    }

    /// Replace the embedded runtime config and top-level annotations.
    /// Does not add a layer.
    pub fn set(
        &mut self,
        new_runtime_config: oci_spec::image::Config,
        meta: ConfigMeta,
        annotations: Option<std::collections::HashMap<String, String>>,
        mut history: History,
    ) -> Result<()> {
        self.ensure_loaded()?;

        let config = self.config_mut();
        config.set_config(Some(new_runtime_config));
        if let Some(created) = meta.created {
            config.set_created(Some(created));
        }
        if let Some(author) = meta.author {
            config.set_author(Some(author));
        }

        history.set_empty_layer(true);
        config.history_mut().push(history);

        self.manifest_mut().set_annotations(annotations);

        self.state = State::Dirty;
        self.verify_invariants()
    }

    fn verify_invariants(&self) -> Result<()> {
        let manifest = self.manifest.as_ref().expect("ensure_loaded was called");
        let config = self.config.as_ref().expect("ensure_loaded was called");

        let non_empty_history = config.history().iter().filter(|h| !h.empty_layer().unwrap_or(false)).count();
        if manifest.layers().len() != non_empty_history || manifest.layers().len() != config.rootfs().diff_ids().len() {
            return Err(Error::invalid_argument(
                "layers, non-empty history entries, and diff_ids have diverged",
            ));
        }
        for layer in manifest.layers() {
            if !matches!(
                layer.media_type(),
                MediaType::ImageLayerGzip | MediaType::ImageLayerNonDistributableGzip
            ) {
                return Err(Error::invalid_argument(format!(
                    "layer has unsupported media type {:?}",
                    layer.media_type()
                )));
            }
        }
        Ok(())
    }

    /// Persist the staged graph: write the config blob, point the
    /// manifest at it, write the manifest blob, and return its
    /// descriptor. Naming a reference to it is the caller's concern.
    pub fn commit(&mut self) -> Result<Descriptor> {
        self.ensure_loaded()?;
        self.verify_invariants()?;

        let config = self.config.as_ref().expect("ensure_loaded was called");
        let (config_digest, config_size) = self.engine.put_blob_json(config)?;
        let config_descriptor = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest(config_digest.to_string())
            .size(config_size as i64)
            .build()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;

        let manifest = self.manifest_mut();
        manifest.set_config(config_descriptor);

        let manifest = self.manifest.as_ref().expect("ensure_loaded was called");
        let (manifest_digest, manifest_size) = self.engine.put_blob_json(manifest)?;
        let manifest_descriptor = DescriptorBuilder::default()
            .media_type(MediaType::ImageManifest)
            .digest(manifest_digest.to_string())
            .size(manifest_size as i64)
            .build()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;

        self.source = manifest_descriptor.clone();
        self.state = State::Clean;
        tracing::debug!(digest = %manifest_digest, "committed manifest");
        Ok(manifest_descriptor)
    }

    /// The manifest this session currently has staged (loads if needed).
    pub fn manifest(&mut self) -> Result<&ImageManifest> {
        self.ensure_loaded()?;
        Ok(self.manifest.as_ref().expect("ensure_loaded was called"))
    }

    /// The config this session currently has staged (loads if needed).
    pub fn config(&mut self) -> Result<&ImageConfiguration> {
        self.ensure_loaded()?;
        Ok(self.config.as_ref().expect("ensure_loaded was called"))
    }
}

/// A history entry builder convenience, stamping `created` with the
/// current time and `created_by` with `description`.
pub fn history_entry(description: impl Into<String>, comment: Option<String>) -> History {
    let now = chrono::offset::Utc::now();
    let mut builder = HistoryBuilder::default()
        .created(now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .created_by(description.into());
    if let Some(comment) = comment {
        builder = builder.comment(comment);
    }
    builder.build().expect("all required fields are set")
}

/// Tees an uncompressed layer stream through a digest (the eventual
/// `diff_id`) while gzip-compressing it into the underlying
/// [`BlobWriter`], whose digest becomes the layer's content digest.
pub struct LayerWriter<'a> {
    uncompressed_hash: DigestHasher,
    compressor: GzEncoder<BlobWriter<'a>>,
}

impl<'a> Write for LayerWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.uncompressed_hash.write_all(buf)?;
        self.compressor.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.compressor.flush()
    }
}

impl<'a> LayerWriter<'a> {
    fn complete(self) -> Result<(crate::digest::Digest, crate::digest::Digest, u64)> {
        let uncompressed_digest = self.uncompressed_hash.finish()?;
        let blob_writer = self.compressor.finish().map_err(|e| Error::io("finishing gzip stream", e))?;
        let (gz_digest, gz_size) = blob_writer.complete()?;
        Ok((uncompressed_digest, gz_digest, gz_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap_std_ext::{cap_std, cap_tempfile};
    use oci_spec::image::{ConfigBuilder, ImageConfigurationBuilder, ImageManifestBuilder, RootFsBuilder};
    use std::io::Cursor;

    fn empty_config_descriptor(engine: &Engine) -> Descriptor {
        let config = ImageConfigurationBuilder::default()
            .rootfs(RootFsBuilder::default().typ("layers").diff_ids(Vec::<String>::new()).build().unwrap())
            .history(Vec::<History>::new())
            .build()
            .unwrap();
        let (digest, size) = engine.put_blob_json(&config).unwrap();
        DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest(digest.to_string())
            .size(size as i64)
            .build()
            .unwrap()
    }

    fn fixture() -> (cap_tempfile::TempDir, Arc<Engine>, Descriptor) {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        let engine = Arc::new(Engine::create(&td).unwrap());
        let config_desc = empty_config_descriptor(&engine);
        let manifest = ImageManifestBuilder::default()
            .schema_version(oci_spec::image::SCHEMA_VERSION)
            .config(config_desc)
            .layers(Vec::<Descriptor>::new())
            .build()
            .unwrap();
        let (digest, size) = engine.put_blob_json(&manifest).unwrap();
        let manifest_desc = DescriptorBuilder::default()
            .media_type(MediaType::ImageManifest)
            .digest(digest.to_string())
            .size(size as i64)
            .build()
            .unwrap();
        (td, engine, manifest_desc)
    }

    #[test]
    fn new_rejects_non_manifest_descriptor() {
        let (_td, engine, _source) = fixture();
        let bad = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest("sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
            .size(0_i64)
            .build()
            .unwrap();
        assert!(matches!(Mutator::new(engine, bad), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn add_then_commit_grows_layers_diffids_and_history() {
        let (_td, engine, source) = fixture();
        let mut m = Mutator::new(engine.clone(), source).unwrap();
        m.add_stream(
            Cursor::new(b"contents".to_vec()),
            history_entry("new layer", Some("new layer".into())),
            None,
        )
        .unwrap();
        let descriptor = m.commit().unwrap();

        assert_eq!(m.manifest().unwrap().layers().len(), 1);
        assert_eq!(m.config().unwrap().rootfs().diff_ids().len(), 1);
        assert_eq!(m.config().unwrap().history().len(), 1);
        assert_eq!(m.config().unwrap().history()[0].empty_layer(), &Some(false));
        assert_eq!(
            m.config().unwrap().history()[0].created_by().clone().unwrap(),
            "new layer"
        );

        // Reopening a fresh mutator on the committed descriptor reloads
        // the same staged state.
        let mut reopened = Mutator::new(engine, descriptor.clone()).unwrap();
        assert_eq!(reopened.manifest().unwrap().layers().len(), 1);
    }

    #[test]
    fn add_non_distributable_sets_media_type() {
        let (_td, engine, source) = fixture();
        let mut m = Mutator::new(engine, source).unwrap();
        let mut writer = m.layer_writer(None).unwrap();
        writer.write_all(b"secret layer").unwrap();
        m.add_non_distributable(writer, history_entry("nd", None)).unwrap();
        assert_eq!(
            *m.manifest().unwrap().layers()[0].media_type(),
            MediaType::ImageLayerNonDistributableGzip
        );
    }

    #[test]
    fn set_replaces_config_without_adding_layer() {
        let (_td, engine, source) = fixture();
        let mut m = Mutator::new(engine, source).unwrap();
        let before_layers = m.manifest().unwrap().layers().len();

        let new_config = ConfigBuilder::default().user("default:user".to_string()).build().unwrap();
        m.set(new_config, ConfigMeta::default(), None, history_entry("set", None))
            .unwrap();

        assert_eq!(m.manifest().unwrap().layers().len(), before_layers);
        assert_eq!(
            m.config().unwrap().config().as_ref().unwrap().user().clone().unwrap(),
            "default:user"
        );
        assert_eq!(m.config().unwrap().history().last().unwrap().empty_layer(), &Some(true));
    }

    #[test]
    fn commit_changes_manifest_digest() {
        let (_td, engine, source) = fixture();
        let mut m = Mutator::new(engine, source.clone()).unwrap();
        m.add_stream(Cursor::new(b"x".to_vec()), history_entry("x", None), None)
            .unwrap();
        let committed = m.commit().unwrap();
        assert_ne!(committed.digest(), source.digest());
    }
}
