//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//! Only the subset of the format skill bundles need lives here:
//! no Zip64, no multi-disk archives, no encryption.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;
use std::convert::TryInto;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use memchr::memmem;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Optional signature in front of a data descriptor
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// Fixed size of the End of central directory record (sans comment)
pub const EOCDR_SIZE: usize = 22;
/// The comment length is a u16, so the EOCDR can't be further back than this.
pub const MAX_COMMENT_SIZE: usize = u16::MAX as usize;
/// Fixed size of a central directory entry (sans path, extra field, comment)
pub const CENTRAL_DIRECTORY_ENTRY_SIZE: usize = 46;
/// Fixed size of a local file header (sans path and extra field)
pub const LOCAL_FILE_HEADER_SIZE: usize = 30;

/// 2.0: the first version with folders and DEFLATE.
pub const VERSION_NEEDED: u16 = 20;

/// MS-DOS directory bit in the external file attributes.
pub const DOS_DIRECTORY_ATTRIBUTE: u32 = 0x10;

/// We don't track timestamps, so everything we write is from 1980-01-01 00:00:00,
/// the earliest date MS-DOS can represent.
pub const DOS_EPOCH_TIME: u16 = 0;
pub const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

/// Compression methods as stored in the headers.
pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// Bit 11: Language encoding flag (EFS).  If this bit is set,
///         the filename and comment fields for this file
///         MUST be encoded using UTF-8. (see APPENDIX D)
pub const UTF8_FLAG: u16 = 1 << 11;

/// Bit 3: If this bit is set, the fields crc-32, compressed
///        size and uncompressed size are set to zero in the
///        local header.  The correct values are put in the
///        data descriptor immediately following the compressed
///        data.
pub const DATA_DESCRIPTOR_FLAG: u16 = 1 << 3;

// Like the Rust docs' examples, but bounds-checked
// since archives come from who-knows-where.

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> Option<u32> {
    let int_bytes = take(input, std::mem::size_of::<u32>())?;
    Some(u32::from_le_bytes(int_bytes.try_into().ok()?))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> Option<u16> {
    let int_bytes = take(input, std::mem::size_of::<u16>())?;
    Some(u16::from_le_bytes(int_bytes.try_into().ok()?))
}

/// Splits `len` bytes off the front of `input`, shrinking it.
fn take<'a>(input: &mut &'a [u8], len: usize) -> Option<&'a [u8]> {
    if input.len() < len {
        return None;
    }
    let (taken, rest) = input.split_at(len);
    *input = rest;
    Some(taken)
}

/// Checks for (and consumes) the given magic number.
fn expect_magic(input: &mut &[u8], magic: &[u8; 4]) -> Option<()> {
    let found = take(input, 4)?;
    (found == magic).then_some(())
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory.
/// The multi-disk fields are read past; we only ever deal with one "disk".
#[derive(Debug, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    // 4.3.16  End of central directory record:
    //
    // end of central dir signature    4 bytes  (0x06054b50)
    // number of this disk             2 bytes
    // number of the disk with the
    // start of the central directory  2 bytes
    // total number of entries in
    // the central dir on this disk    2 bytes
    // total number of entries in
    // the central dir                 2 bytes
    // size of the central directory   4 bytes
    // offset of start of central
    // directory with respect to
    // the starting disk number        4 bytes
    // zipfile comment length          2 bytes

    pub fn parse(mut eocdr: &[u8]) -> Option<Self> {
        expect_magic(&mut eocdr, &EOCDR_MAGIC)?;
        let _disk_number = read_u16(&mut eocdr)?;
        let _disk_with_central_directory = read_u16(&mut eocdr)?;
        let _entries_on_this_disk = read_u16(&mut eocdr)?;
        let entries = read_u16(&mut eocdr)?;
        let central_directory_size = read_u32(&mut eocdr)?;
        let central_directory_offset = read_u32(&mut eocdr)?;
        // The comment (if any) is none of our business.
        Some(Self {
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCDR_MAGIC);
        write_u16(out, 0);
        write_u16(out, 0);
        write_u16(out, self.entries);
        write_u16(out, self.entries);
        write_u32(out, self.central_directory_size);
        write_u32(out, self.central_directory_offset);
        write_u16(out, 0);
    }
}

/// Searches backward through `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but a trailing comment means we can't jump to a known offset.
/// The record starts no later than `len - 22` and,
/// since comments top out at 64K, no earlier than `len - 22 - 65535`.
pub fn find_eocdr(mapping: &[u8]) -> Option<usize> {
    if mapping.len() < EOCDR_SIZE {
        return None;
    }
    let last_start = mapping.len() - EOCDR_SIZE;
    let first_start = mapping.len().saturating_sub(EOCDR_SIZE + MAX_COMMENT_SIZE);
    let window = &mapping[first_start..last_start + EOCDR_MAGIC.len()];
    memmem::rfind(window, &EOCDR_MAGIC).map(|found| first_start + found)
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    // 4.3.12  Central directory structure:
    //
    //   central file header signature   4 bytes  (0x02014b50)
    //   version made by                 2 bytes
    //   version needed to extract       2 bytes
    //   general purpose bit flag        2 bytes
    //   compression method              2 bytes
    //   last mod file time              2 bytes
    //   last mod file date              2 bytes
    //   crc-32                          4 bytes
    //   compressed size                 4 bytes
    //   uncompressed size               4 bytes
    //   file name length                2 bytes
    //   extra field length              2 bytes
    //   file comment length             2 bytes
    //   disk number start               2 bytes
    //   internal file attributes        2 bytes
    //   external file attributes        4 bytes
    //   relative offset of local header 4 bytes
    //
    //   file name (variable size)
    //   extra field (variable size)
    //   file comment (variable size)

    /// Parses an entry from the front of `entry`, moving it past the entry.
    ///
    /// Returns `None` if the magic is wrong or the entry runs off the end.
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> Option<Self> {
        let mut cursor = *entry;
        expect_magic(&mut cursor, &CENTRAL_DIRECTORY_MAGIC)?;
        let _source_version = read_u16(&mut cursor)?;
        let _minimum_extract_version = read_u16(&mut cursor)?;
        let flags = read_u16(&mut cursor)?;
        let compression_method = read_u16(&mut cursor)?;
        let last_modified_time = read_u16(&mut cursor)?;
        let last_modified_date = read_u16(&mut cursor)?;
        let crc32 = read_u32(&mut cursor)?;
        let compressed_size = read_u32(&mut cursor)?;
        let uncompressed_size = read_u32(&mut cursor)?;
        let path_length = read_u16(&mut cursor)? as usize;
        let extra_field_length = read_u16(&mut cursor)? as usize;
        let file_comment_length = read_u16(&mut cursor)? as usize;
        let _disk_number = read_u16(&mut cursor)?;
        let _internal_file_attributes = read_u16(&mut cursor)?;
        let external_file_attributes = read_u32(&mut cursor)?;
        let header_offset = read_u32(&mut cursor)?;
        let path = take(&mut cursor, path_length)?;
        take(&mut cursor, extra_field_length)?;
        take(&mut cursor, file_comment_length)?;
        *entry = cursor;

        Some(Self {
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            external_file_attributes,
            header_offset,
            path,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        write_u16(out, VERSION_NEEDED); // made by MS-DOS, version 2.0
        write_u16(out, VERSION_NEEDED);
        write_u16(out, self.flags);
        write_u16(out, self.compression_method);
        write_u16(out, self.last_modified_time);
        write_u16(out, self.last_modified_date);
        write_u32(out, self.crc32);
        write_u32(out, self.compressed_size);
        write_u32(out, self.uncompressed_size);
        write_u16(out, self.path.len() as u16);
        write_u16(out, 0); // extra field
        write_u16(out, 0); // comment
        write_u16(out, 0); // disk number
        write_u16(out, 0); // internal attributes
        write_u32(out, self.external_file_attributes);
        write_u32(out, self.header_offset);
        out.extend_from_slice(self.path);
    }
}

/// Data from a local file header
///
/// Each files' actual contents is preceded by this header.
/// These headers allow for "streaming" decompression without
/// the use of the central directory, which is how we find the manifest.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub path: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    // 4.3.7  Local file header:
    //
    // local file header signature     4 bytes  (0x04034b50)
    // version needed to extract       2 bytes
    // general purpose bit flag        2 bytes
    // compression method              2 bytes
    // last mod file time              2 bytes
    // last mod file date              2 bytes
    // crc-32                          4 bytes
    // compressed size                 4 bytes
    // uncompressed size               4 bytes
    // file name length                2 bytes
    // extra field length              2 bytes
    //
    // file name (variable size)
    // extra field (variable size)

    /// Parses a header from the front of `header`,
    /// leaving it pointed at the file's data.
    ///
    /// Returns `None` if the magic is wrong or the header runs off the end.
    pub fn parse_and_consume(header: &mut &'a [u8]) -> Option<Self> {
        let mut cursor = *header;
        expect_magic(&mut cursor, &LOCAL_FILE_HEADER_MAGIC)?;
        let _minimum_extract_version = read_u16(&mut cursor)?;
        let flags = read_u16(&mut cursor)?;
        let compression_method = read_u16(&mut cursor)?;
        let last_modified_time = read_u16(&mut cursor)?;
        let last_modified_date = read_u16(&mut cursor)?;
        let crc32 = read_u32(&mut cursor)?;
        let compressed_size = read_u32(&mut cursor)?;
        let uncompressed_size = read_u32(&mut cursor)?;
        let path_length = read_u16(&mut cursor)? as usize;
        let extra_field_length = read_u16(&mut cursor)? as usize;
        let path = take(&mut cursor, path_length)?;
        take(&mut cursor, extra_field_length)?;
        *header = cursor;

        Some(Self {
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            path,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        write_u16(out, VERSION_NEEDED);
        write_u16(out, self.flags);
        write_u16(out, self.compression_method);
        write_u16(out, self.last_modified_time);
        write_u16(out, self.last_modified_date);
        write_u32(out, self.crc32);
        write_u32(out, self.compressed_size);
        write_u32(out, self.uncompressed_size);
        write_u16(out, self.path.len() as u16);
        write_u16(out, 0); // extra field
        out.extend_from_slice(self.path);
    }
}

/// Skips a data descriptor at the front of `data`, if there is one.
///
/// 4.3.9.3 Although not originally assigned a signature, the value
/// 0x08074b50 has commonly been adopted as a signature value
/// for the data descriptor record.
pub fn skip_data_descriptor(data: &[u8]) -> &[u8] {
    // crc-32, compressed size, uncompressed size: 4 bytes each
    const DESCRIPTOR_SIZE: usize = 12;
    let skip = if data.starts_with(&DATA_DESCRIPTOR_MAGIC) {
        DATA_DESCRIPTOR_MAGIC.len() + DESCRIPTOR_SIZE
    } else {
        DESCRIPTOR_SIZE
    };
    data.get(skip..).unwrap_or(&[])
}

/// Decodes a path from the archive.
///
/// Paths flagged UTF-8 are UTF-8. Plenty of tools write UTF-8 without
/// setting the flag, so anything that happens to be valid UTF-8 is taken
/// as such. Everything else is assumed to be CP437.
pub fn decode_path(raw: &[u8], flags: u16) -> Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(utf8) => Cow::Borrowed(utf8),
        Err(_) if flags & UTF8_FLAG != 0 => String::from_utf8_lossy(raw),
        Err(_) => Cow::borrow_from_cp437(raw, &CP437_CONTROL),
    }
}

/// Turns an MS-DOS time and date into a timestamp,
/// or `None` if the fields don't describe a real moment (zeroed dates, for one).
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}
