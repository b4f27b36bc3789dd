//! Tools for reading a skill archive.
//!
//! There are two independent ways into the same bytes:
//!
//! - [`list_files()`] reads the central directory at the back of the archive
//!   to say *what* is in it, without touching any file contents.
//!
//! - [`extract_one()`], [`extract_all()`], and [`extract_manifest()`]
//!   walk the local file headers from the front of the archive,
//!   which is how the data is actually laid out.
//!   They do not consult the central directory first.
//!   Bundles are small and the manifest is almost always written first,
//!   so a front-to-back walk finds it sooner than a directory lookup would.
//!
//! [`list_files()`]: fn.list_files.html
//! [`extract_one()`]: fn.extract_one.html
//! [`extract_all()`]: fn.extract_all.html
//! [`extract_manifest()`]: fn.extract_manifest.html

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use log::*;

use crate::crc::crc32;
use crate::inflate::inflate;
use crate::result::*;
use crate::spec::{self, CentralDirectoryEntry, LocalFileHeader};

/// Every bundle is anchored by this file.
pub const MANIFEST_NAME: &str = "SKILL.md";

/// Returns true if `path` names a manifest, at the root or in some folder.
pub fn is_manifest_path(path: &str) -> bool {
    path == MANIFEST_NAME
        || path
            .strip_suffix(MANIFEST_NAME)
            .is_some_and(|parent| parent.ends_with('/'))
}

/// A file or directory in the archive, as listed by its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The path of the entry, with `/` separators.
    /// Directories end with a `/`.
    pub path: String,

    /// True if the path ends with `/`
    pub is_directory: bool,

    /// Uncompressed size of the file in bytes
    pub uncompressed_size: u64,

    /// When the entry was last modified, if the archive recorded a valid date
    pub last_modified: Option<NaiveDateTime>,
}

impl ArchiveEntry {
    fn from_cde(cde: &CentralDirectoryEntry) -> Self {
        let path = spec::decode_path(cde.path, cde.flags).into_owned();
        Self {
            is_directory: path.ends_with('/'),
            path,
            uncompressed_size: cde.uncompressed_size as u64,
            last_modified: spec::parse_msdos(cde.last_modified_time, cde.last_modified_date),
        }
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }
}

/// Iterates over the central directory's entries.
///
/// Stops early (without complaint) if an entry is mangled or truncated;
/// whatever came before it is still usable.
struct CentralDirectory<'a> {
    remaining: &'a [u8],
    index: u16,
    count: u16,
}

fn central_directory(mapping: &[u8]) -> BundleResult<CentralDirectory<'_>> {
    let eocdr_posit = spec::find_eocdr(mapping).ok_or(BundleError::InvalidFormat(
        "Couldn't find End Of Central Directory Record",
    ))?;
    let eocdr = spec::EndOfCentralDirectory::parse(&mapping[eocdr_posit..]).ok_or(
        BundleError::InvalidFormat("Truncated End Of Central Directory Record"),
    )?;
    trace!("{:?}", eocdr);

    let remaining = mapping
        .get(eocdr.central_directory_offset as usize..)
        .unwrap_or(&[]);
    Ok(CentralDirectory {
        remaining,
        index: 0,
        count: eocdr.entries,
    })
}

impl<'a> Iterator for CentralDirectory<'a> {
    type Item = CentralDirectoryEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index == self.count {
            return None;
        }
        match CentralDirectoryEntry::parse_and_consume(&mut self.remaining) {
            Some(cde) => {
                trace!("{:?}", cde);
                self.index += 1;
                Some(cde)
            }
            None => {
                warn!(
                    "Central directory ends after {} of {} entries",
                    self.index, self.count
                );
                self.index = self.count;
                None
            }
        }
    }
}

/// Lists the files and directories in the archive, sorted by path.
///
/// Only the central directory is read; no file contents are decompressed.
pub fn list_files(mapping: &[u8]) -> BundleResult<Vec<ArchiveEntry>> {
    let mut entries: Vec<ArchiveEntry> = central_directory(mapping)?
        .map(|cde| ArchiveEntry::from_cde(&cde))
        .inspect(|entry| debug!("{:?}", entry))
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// A file found by walking local headers, still compressed
#[derive(Debug)]
struct LocalFile<'a> {
    path: Cow<'a, str>,
    compression_method: u16,
    crc32: u32,
    uncompressed_size: usize,
    data: &'a [u8],
}

impl LocalFile<'_> {
    fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Decompresses the file's contents,
    /// or returns `None` if they can't be read.
    fn decode(&self, limit: usize) -> Option<Vec<u8>> {
        let contents = match self.compression_method {
            spec::METHOD_STORED => self.data.to_vec(),
            spec::METHOD_DEFLATE => match inflate(self.data, self.uncompressed_size, limit) {
                Some(c) => c,
                None => {
                    warn!("Couldn't inflate {}", self.path);
                    return None;
                }
            },
            unsupported => {
                warn!(
                    "{} uses unsupported compression method {}",
                    self.path, unsupported
                );
                return None;
            }
        };
        if cfg!(feature = "verify-crc") && crc32(&contents) != self.crc32 {
            warn!("Invalid checksum for {}", self.path);
            return None;
        }
        Some(contents)
    }
}

/// Walks local file headers from the start of the archive.
///
/// Stops when the next four bytes aren't a local file header
/// (we've hit the central directory) or a record would run off the end.
struct LocalFiles<'a> {
    mapping: &'a [u8],
    offset: usize,
    /// Sizes for entries with trailing data descriptors,
    /// keyed by header offset and only read if we run into one.
    descriptor_sizes: Option<HashMap<usize, (u32, u32, u32)>>,
}

fn local_files(mapping: &[u8]) -> LocalFiles<'_> {
    LocalFiles {
        mapping,
        offset: 0,
        descriptor_sizes: None,
    }
}

impl<'a> LocalFiles<'a> {
    fn stop(&mut self) -> Option<LocalFile<'a>> {
        self.offset = self.mapping.len();
        None
    }

    /// Entries with a data descriptor zero out their local sizes,
    /// so there's no way to find the next header without asking
    /// the central directory where this one ends.
    fn sizes_from_central_directory(&mut self, header_offset: usize) -> Option<(u32, u32, u32)> {
        let mapping = self.mapping;
        let sizes = self.descriptor_sizes.get_or_insert_with(|| {
            central_directory(mapping)
                .map(|cd| {
                    cd.map(|cde| {
                        (
                            cde.header_offset as usize,
                            (cde.crc32, cde.compressed_size, cde.uncompressed_size),
                        )
                    })
                    .collect()
                })
                .unwrap_or_default()
        });
        sizes.get(&header_offset).copied()
    }
}

impl<'a> Iterator for LocalFiles<'a> {
    type Item = LocalFile<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_offset = self.offset;
        let mut cursor = self.mapping.get(header_offset..)?;
        if !cursor.starts_with(&spec::LOCAL_FILE_HEADER_MAGIC) {
            return None;
        }
        let header = match LocalFileHeader::parse_and_consume(&mut cursor) {
            Some(h) => h,
            None => {
                warn!("Truncated local file header at offset {}", header_offset);
                return self.stop();
            }
        };
        trace!("{:?}", header);

        let has_descriptor = header.flags & spec::DATA_DESCRIPTOR_FLAG != 0;
        let (crc32, compressed_size, uncompressed_size) = if has_descriptor {
            match self.sizes_from_central_directory(header_offset) {
                Some(sizes) => sizes,
                None => {
                    warn!(
                        "No central directory entry for streamed file at offset {}",
                        header_offset
                    );
                    return self.stop();
                }
            }
        } else {
            (
                header.crc32,
                header.compressed_size,
                header.uncompressed_size,
            )
        };

        let path = spec::decode_path(header.path, header.flags);
        let data = match cursor.get(..compressed_size as usize) {
            Some(d) => d,
            None => {
                warn!("{} runs past the end of the archive", path);
                return self.stop();
            }
        };
        let mut rest = &cursor[data.len()..];
        if has_descriptor {
            rest = spec::skip_data_descriptor(rest);
        }
        self.offset = self.mapping.len() - rest.len();

        Some(LocalFile {
            path,
            compression_method: header.compression_method,
            crc32,
            uncompressed_size: uncompressed_size as usize,
            data,
        })
    }
}

/// Reads the file at `path` out of the archive.
///
/// Returns `None` if there's no such file or its contents can't be decoded.
/// Inflated contents are capped at `limit` bytes.
pub fn extract_one(mapping: &[u8], path: &str, limit: usize) -> Option<Vec<u8>> {
    local_files(mapping)
        .find(|file| file.path == path)?
        .decode(limit)
}

/// Reads every file (but not directory) out of the archive,
/// keyed by path.
///
/// A file that can't be decoded is logged and left out;
/// the rest are still returned.
/// If a path appears twice, the first copy wins.
pub fn extract_all(mapping: &[u8], limit: usize) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for file in local_files(mapping) {
        if file.is_dir() {
            continue;
        }
        if files.contains_key(file.path.as_ref()) {
            warn!("Duplicate entry for {}", file.path);
            continue;
        }
        if let Some(contents) = file.decode(limit) {
            files.insert(file.path.into_owned(), contents);
        }
    }
    files
}

/// Reads the first manifest (`SKILL.md` or `<folder>/SKILL.md`)
/// found while walking the archive.
///
/// Unlike other files, failing to read it is an error:
/// a manifest that isn't there is an [`ExtractionFailed`],
/// and one that's there but can't be decoded is a [`FrontmatterParseError`].
///
/// [`ExtractionFailed`]: ../result/enum.BundleError.html#variant.ExtractionFailed
/// [`FrontmatterParseError`]: ../result/enum.BundleError.html#variant.FrontmatterParseError
pub fn extract_manifest(mapping: &[u8], limit: usize) -> BundleResult<Vec<u8>> {
    let manifest = local_files(mapping)
        .find(|file| is_manifest_path(&file.path))
        .ok_or_else(|| {
            BundleError::ExtractionFailed(format!("No local file header for {MANIFEST_NAME}"))
        })?;
    debug!("Reading manifest {}", manifest.path);
    manifest
        .decode(limit)
        .ok_or(BundleError::FrontmatterParseError)
}
