//! Importing and exporting whole skill bundles.
//!
//! Importing goes through these steps, stopping at the first failure:
//!
//! 1. Check the archive's size (before parsing anything)
//! 2. List its files and make sure there's a `SKILL.md`
//! 3. Strip a redundant top-level folder, if there is one
//! 4. Reject forbidden or unsafe paths
//! 5. Read the manifest and parse its frontmatter
//!
//! Exporting hands back the archive exactly as it was stored.

use std::collections::BTreeMap;

use camino::Utf8Path;
use log::*;

use crate::frontmatter::parse_frontmatter;
use crate::normalize::{detect_common_root, strip_root};
use crate::policy::{is_forbidden, is_unsafe, DEFAULT_FORBIDDEN_PATTERNS};
use crate::read::{self, extract_all, extract_one, is_manifest_path, ArchiveEntry};
use crate::result::*;
use crate::write::write_folder;

/// Bounds on what we're willing to import, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    /// Largest archive (in bytes) we'll look at
    pub max_archive_size: usize,

    /// Longer descriptions (in characters) are truncated
    pub max_description_length: usize,

    /// Largest `SKILL.md` (in bytes) we'll parse
    pub max_manifest_size: usize,

    /// Paths that may not appear in a bundle. See [`policy`].
    ///
    /// [`policy`]: ../policy/index.html
    pub forbidden_patterns: Vec<String>,
}

const DEFAULT_MAX_ARCHIVE_SIZE: usize = 10 * 1024 * 1024;

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
            max_description_length: 1024,
            max_manifest_size: 1024 * 1024,
            forbidden_patterns: DEFAULT_FORBIDDEN_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Compression can make an archive's contents much bigger than the archive,
/// but not unboundedly so.
const INFLATE_HEADROOM: usize = 4;

impl BundleConfig {
    /// The most we'll inflate any one file to.
    pub fn inflate_limit(&self) -> usize {
        self.max_archive_size.saturating_mul(INFLATE_HEADROOM)
    }
}

/// A validated bundle, ready to be stored by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedBundle {
    /// From the manifest's frontmatter, or the caller's name if it had none
    pub name: String,

    /// From the manifest's frontmatter (possibly empty)
    pub description: String,

    /// A directory name safe to install the bundle under
    pub suggested_directory_name: String,

    /// The (normalized) archive, with `SKILL.md` at its root
    pub archive_bytes: Vec<u8>,

    /// What's in the archive, sorted by path
    pub entries: Vec<ArchiveEntry>,

    /// The inflate limit the bundle was imported with,
    /// so the helpers below can read whatever the import accepted.
    inflate_limit: usize,
}

impl ImportedBundle {
    /// The raw text of the bundle's `SKILL.md`
    pub fn manifest(&self) -> BundleResult<String> {
        let bytes = read::extract_manifest(&self.archive_bytes, self.inflate_limit)?;
        String::from_utf8(bytes).map_err(|_| BundleError::FrontmatterParseError)
    }

    /// Reads a single file out of the bundle,
    /// or `None` if it isn't there or can't be read.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        extract_one(&self.archive_bytes, path, self.inflate_limit)
    }

    /// Reads every file out of the bundle, keyed by path.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        extract_all(&self.archive_bytes, self.inflate_limit)
    }
}

/// Validates and describes an archive.
///
/// `suggested_name` is whatever the caller knows the bundle as
/// (a file name, say) and is used when the manifest doesn't name itself.
pub fn import_archive(
    archive: &[u8],
    suggested_name: &str,
    config: &BundleConfig,
) -> BundleResult<ImportedBundle> {
    if archive.len() > config.max_archive_size {
        return Err(BundleError::TooLarge(archive.len() as u64));
    }

    let mut entries = read::list_files(archive)?;
    if !entries.iter().any(|e| is_manifest_path(&e.path)) {
        return Err(BundleError::MissingManifest);
    }

    let archive_bytes = match detect_common_root(&entries) {
        Some(root) => {
            info!("Stripping common root folder {}", root);
            let stripped = strip_root(archive, &root, config.inflate_limit())?;
            entries = read::list_files(&stripped)?;
            stripped
        }
        None => archive.to_vec(),
    };

    if let Some(bad) = entries
        .iter()
        .find(|e| is_unsafe(&e.path) || is_forbidden(&e.path, &config.forbidden_patterns))
    {
        return Err(BundleError::ForbiddenFile(bad.path.clone()));
    }

    let manifest = read::extract_manifest(&archive_bytes, config.inflate_limit())?;
    if manifest.len() > config.max_manifest_size {
        return Err(BundleError::TooLarge(manifest.len() as u64));
    }
    let manifest = String::from_utf8(manifest).map_err(|_| BundleError::FrontmatterParseError)?;
    let frontmatter = parse_frontmatter(&manifest, config.max_description_length);
    debug!("{:?}", frontmatter);

    let name = if frontmatter.name.is_empty() {
        suggested_name.to_owned()
    } else {
        frontmatter.name
    };
    let suggested_directory_name = [suggested_name, name.as_str()]
        .iter()
        .map(|n| suggested_directory_name(n))
        .find(|n| is_valid_directory_name(n))
        .unwrap_or_else(|| "skill".to_owned());

    info!(
        "Imported {} ({} entries) as {}/",
        name,
        entries.len(),
        suggested_directory_name
    );
    Ok(ImportedBundle {
        name,
        description: frontmatter.description,
        suggested_directory_name,
        archive_bytes,
        entries,
        inflate_limit: config.inflate_limit(),
    })
}

/// Packs a folder and imports the result.
///
/// Forbidden paths are left out while packing rather than rejected,
/// so a folder with, say, a `.git/` directory in it still imports.
pub fn import_folder<P: AsRef<Utf8Path>>(
    folder: P,
    suggested_name: &str,
    config: &BundleConfig,
) -> BundleResult<ImportedBundle> {
    let archive = write_folder(folder, &config.forbidden_patterns)?;
    import_archive(&archive, suggested_name, config)
}

/// Returns the bundle's archive, untouched.
pub fn export(bundle: &ImportedBundle) -> Vec<u8> {
    bundle.archive_bytes.clone()
}

const MAX_DIRECTORY_NAME_LENGTH: usize = 64;

/// Turns a display name into something shaped like a directory name:
/// lowercase ASCII letters, digits, and single hyphens.
///
/// The result might still be too short to be valid;
/// check it with [`is_valid_directory_name()`].
///
/// [`is_valid_directory_name()`]: fn.is_valid_directory_name.html
pub fn suggested_directory_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().trim_end_matches(".zip").chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(MAX_DIRECTORY_NAME_LENGTH);
    slug.trim_end_matches('-').to_owned()
}

/// Checks for `[a-z0-9][a-z0-9-]*[a-z0-9]`, 2 to 64 characters long.
pub fn is_valid_directory_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    (2..=MAX_DIRECTORY_NAME_LENGTH).contains(&bytes.len())
        && bytes.first().is_some_and(edge)
        && bytes.last().is_some_and(edge)
        && bytes.iter().all(|b| edge(b) || *b == b'-')
}
