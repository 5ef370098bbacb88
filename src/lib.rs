//! # Content-addressable storage and image mutation for OCI layouts
//!
//! This library contains two layers for working with [OCI images] stored
//! as on-disk image layouts (a directory with an `oci-layout` marker,
//! content-addressed `blobs/<algo>/<hex>` files, and `refs/<name>` pointers
//! to manifests):
//!
//! - [`Engine`], a low-level content-addressable store: put/get/delete
//!   blobs and references, and reclaim abandoned scratch state.
//! - [`Mutator`], which builds a new manifest/config/layer graph on top of
//!   an existing one without ever rewriting an existing blob.
//!
//! ## Dependency on cap-std
//!
//! Like its predecessor in this space, this library operates in a
//! capability-oriented fashion via [cap-std] rather than ambient path
//! access, which matters when processing layer tar streams supplied by
//! untrusted sources.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! # use ocicore::cap_std;
//! # fn main() -> ocicore::Result<()> {
//! let d = cap_std::fs::Dir::open_ambient_dir("/path/to/layout", cap_std::ambient_authority())?;
//! let engine = ocicore::Engine::open(&d)?;
//! println!("{:?}", engine.list_references()?);
//! # Ok(())
//! # }
//! ```
//!
//! [cap-std]: https://docs.rs/cap-std/
//! [OCI images]: https://github.com/opencontainers/image-spec

mod cancel;
mod digest;
mod engine;
mod error;
mod gc;
mod layout;
mod mutator;

pub use cancel::{CancelToken, CHUNK_SIZE};
pub use digest::{Digest, DEFAULT_ALGORITHM};
pub use engine::{BlobWriter, Engine};
pub use error::{Error, Result};
pub use mutator::{history_entry, ConfigMeta, LayerWriter, Mutator};

// Re-export our dependencies that are used as part of the public API.
pub use cap_std_ext::cap_std;
pub use oci_spec;
