//! Tools for writing a skill archive.
//!
//! Everything is written uncompressed ("stored"):
//! bundles are small, and it keeps us from needing a DEFLATE encoder.
//! Each call builds a brand new buffer.

use std::convert::TryFrom;
use std::fs;
use std::io;

use camino::Utf8Path;
use log::*;

use crate::crc::crc32;
use crate::policy::is_forbidden;
use crate::read::{is_manifest_path, MANIFEST_NAME};
use crate::result::*;
use crate::spec::{self, CentralDirectoryEntry, EndOfCentralDirectory, LocalFileHeader};

/// Accumulates entries, then glues the central directory on the end.
struct ArchiveWriter {
    buffer: Vec<u8>,
    central_directory: Vec<u8>,
    entries: u16,
}

/// Checked cast into one of the format's fixed-width fields.
fn field<T: TryFrom<usize>>(n: usize) -> BundleResult<T> {
    T::try_from(n).map_err(|_| BundleError::TooLarge(n as u64))
}

impl ArchiveWriter {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            central_directory: Vec::new(),
            entries: 0,
        }
    }

    fn add_file(&mut self, path: &str, contents: &[u8]) -> BundleResult<()> {
        self.add_entry(path, contents, 0)
    }

    fn add_directory(&mut self, path: &str) -> BundleResult<()> {
        self.add_entry(path, &[], spec::DOS_DIRECTORY_ATTRIBUTE)
    }

    fn add_entry(
        &mut self,
        path: &str,
        contents: &[u8],
        external_file_attributes: u32,
    ) -> BundleResult<()> {
        let _: u16 = field(path.len())?;
        let size: u32 = field(contents.len())?;
        let header_offset: u32 = field(self.buffer.len())?;
        self.entries = self
            .entries
            .checked_add(1)
            .ok_or(BundleError::TooLarge(u16::MAX as u64 + 1))?;

        let crc32 = crc32(contents);
        trace!("Writing {} ({} bytes, CRC {:08x})", path, size, crc32);

        self.buffer
            .reserve(spec::LOCAL_FILE_HEADER_SIZE + path.len() + contents.len());
        LocalFileHeader {
            flags: spec::UTF8_FLAG,
            compression_method: spec::METHOD_STORED,
            last_modified_time: spec::DOS_EPOCH_TIME,
            last_modified_date: spec::DOS_EPOCH_DATE,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            path: path.as_bytes(),
        }
        .write_to(&mut self.buffer);
        self.buffer.extend_from_slice(contents);

        self.central_directory
            .reserve(spec::CENTRAL_DIRECTORY_ENTRY_SIZE + path.len());
        CentralDirectoryEntry {
            flags: spec::UTF8_FLAG,
            compression_method: spec::METHOD_STORED,
            last_modified_time: spec::DOS_EPOCH_TIME,
            last_modified_date: spec::DOS_EPOCH_DATE,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            external_file_attributes,
            header_offset,
            path: path.as_bytes(),
        }
        .write_to(&mut self.central_directory);
        Ok(())
    }

    fn finish(mut self) -> BundleResult<Vec<u8>> {
        let eocdr = EndOfCentralDirectory {
            entries: self.entries,
            central_directory_size: field(self.central_directory.len())?,
            central_directory_offset: field(self.buffer.len())?,
        };
        trace!("{:?}", eocdr);
        self.buffer.extend_from_slice(&self.central_directory);
        eocdr.write_to(&mut self.buffer);
        Ok(self.buffer)
    }
}

/// Writes the given files into a new archive.
///
/// Contents can be anything byte-like (`&str`, `String`, `Vec<u8>`, ...).
/// Paths ending in `/` become (empty) directory entries.
/// The manifest is written first so it's quick to find;
/// everything else follows in path order.
/// If a path is given more than once, the first one wins.
pub fn write<I, P, C>(files: I) -> BundleResult<Vec<u8>>
where
    I: IntoIterator<Item = (P, C)>,
    P: AsRef<str>,
    C: AsRef<[u8]>,
{
    let mut files: Vec<(P, C)> = files.into_iter().collect();
    files.sort_by(|(a, _), (b, _)| {
        let (a, b) = (a.as_ref(), b.as_ref());
        (!is_manifest_path(a), a).cmp(&(!is_manifest_path(b), b))
    });
    files.dedup_by(|(later, _), (earlier, _)| later.as_ref() == earlier.as_ref());

    let mut writer = ArchiveWriter::new();
    for (path, contents) in &files {
        let path = path.as_ref();
        if path.ends_with('/') {
            if !contents.as_ref().is_empty() {
                warn!("Dropping contents given for directory {}", path);
            }
            writer.add_directory(path)?;
        } else {
            writer.add_file(path, contents.as_ref())?;
        }
    }
    writer.finish()
}

/// Writes an archive containing nothing but the given manifest.
pub fn write_manifest_only(manifest: &str) -> BundleResult<Vec<u8>> {
    write([(MANIFEST_NAME, manifest)])
}

/// Packs a folder (recursively) into a new archive.
///
/// Like most zip tools, the folder's own name becomes the top-level
/// directory of the archive: packing `my-skill/` gives `my-skill/SKILL.md`, etc.
/// Paths matching `forbidden_patterns` are left out;
/// a forbidden directory is skipped along with everything in it.
/// Symbolic links are skipped.
pub fn write_folder<P, S>(folder: P, forbidden_patterns: &[S]) -> BundleResult<Vec<u8>>
where
    P: AsRef<Utf8Path>,
    S: AsRef<str>,
{
    let folder = folder.as_ref().canonicalize_utf8()?;
    let root = folder.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{folder} has no folder name"),
        )
    })?;
    info!("Packing {}", folder);

    let root = format!("{root}/");
    let mut files = vec![(root.clone(), Vec::new())];
    collect_folder(&folder, &root, forbidden_patterns, &mut files)?;
    write(files)
}

fn collect_folder<S: AsRef<str>>(
    dir: &Utf8Path,
    prefix: &str,
    forbidden_patterns: &[S],
    files: &mut Vec<(String, Vec<u8>)>,
) -> BundleResult<()> {
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            warn!("Skipping symbolic link {}", entry.path());
            continue;
        }

        let is_dir = file_type.is_dir();
        let path = if is_dir {
            format!("{prefix}{}/", entry.file_name())
        } else {
            format!("{prefix}{}", entry.file_name())
        };
        if is_forbidden(&path, forbidden_patterns) {
            debug!("Skipping forbidden {}", path);
            continue;
        }

        if is_dir {
            files.push((path.clone(), Vec::new()));
            collect_folder(entry.path(), &path, forbidden_patterns, files)?;
        } else {
            let contents = fs::read(entry.path())?;
            files.push((path, contents));
        }
    }
    Ok(())
}
