//! skillbundle packs, checks, and unpacks skill bundles:
//! a `SKILL.md` manifest plus whatever files go with it,
//! carried around as a ZIP archive.
//!
//! ```no_run
//! # use skillbundle::*;
//! let bytes = std::fs::read("code-review.zip")?;
//! let bundle = import_archive(&bytes, "code-review", &BundleConfig::default())?;
//! println!("{}: {}", bundle.name, bundle.description);
//! for entry in &bundle.entries {
//!     println!("  {}", entry.path);
//! }
//! // Later, hand the (normalized) archive back out:
//! std::fs::write("out.zip", export(&bundle))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Folders can be imported too, which packs them first:
//! ```no_run
//! # use skillbundle::*;
//! let bundle = import_folder("skills/code-review", "code-review", &BundleConfig::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! There's no general-purpose archive library underneath.
//! Bundles only need a small slice of the ZIP format, so this crate reads
//! and writes that slice itself: stored and DEFLATE entries on the way in,
//! stored entries on the way out, no Zip64, encryption, or multi-disk archives.
//! Everything works on byte slices already in memory,
//! and nothing keeps state between calls,
//! so it's fine to import from as many threads as you'd like.

pub mod bundle;
pub mod crc;
pub mod frontmatter;
pub mod normalize;
pub mod policy;
pub mod read;
pub mod result;
pub mod write;

pub use bundle::{export, import_archive, import_folder, BundleConfig, ImportedBundle};
pub use read::{ArchiveEntry, MANIFEST_NAME};
pub use result::{BundleError, BundleResult};

mod inflate;
mod spec;
