//! Stripping the redundant top-level folder that many packagers add.
//!
//! Zipping `my-skill/` usually gives `my-skill/SKILL.md`,
//! `my-skill/scripts/run.sh`, ... when we want `SKILL.md` at the root.

use log::*;

use crate::read::{extract_all, is_manifest_path, list_files, ArchiveEntry};
use crate::result::*;
use crate::write::write;

/// Finds the leading folder (including its trailing `/`) shared by every file,
/// if there is one. Directory entries don't count.
pub fn detect_common_root(entries: &[ArchiveEntry]) -> Option<String> {
    let mut files = entries.iter().filter(|e| e.is_file());
    let first = files.next()?;
    let slash = first.path.find('/')?;
    let root = &first.path[..=slash];
    if files.all(|e| e.path.starts_with(root)) {
        Some(root.to_owned())
    } else {
        None
    }
}

/// Rebuilds the archive with `prefix` removed from the front of every path.
///
/// This returns a new (stored) archive rather than patching the old one.
/// Directory entries don't survive, nor does anything that becomes empty
/// once the prefix is gone.
/// Inflated files are capped at `limit` bytes.
///
/// Unreadable files are dropped, except for the manifest:
/// if the archive lists one that can't be decoded, that's a
/// [`FrontmatterParseError`] rather than a rebuilt archive without it.
///
/// [`FrontmatterParseError`]: ../result/enum.BundleError.html#variant.FrontmatterParseError
pub fn strip_root(mapping: &[u8], prefix: &str, limit: usize) -> BundleResult<Vec<u8>> {
    debug!("Stripping {} from every path", prefix);
    let files = extract_all(mapping, limit);
    if !files.keys().any(|p| is_manifest_path(p))
        && list_files(mapping)?.iter().any(|e| is_manifest_path(&e.path))
    {
        warn!("Manifest under {} couldn't be decoded", prefix);
        return Err(BundleError::FrontmatterParseError);
    }
    if files.is_empty() {
        return Err(BundleError::ExtractionFailed(format!(
            "No readable files under {prefix}"
        )));
    }

    let stripped = files.into_iter().filter_map(|(path, contents)| {
        let path = match path.strip_prefix(prefix) {
            Some(rest) => rest.to_owned(),
            None => path,
        };
        if path.is_empty() {
            None
        } else {
            Some((path, contents))
        }
    });
    write(stripped)
}

#[cfg(test)]
mod test {
    use super::*;

    const LIMIT: usize = 1 << 20;

    fn entry(path: &str) -> ArchiveEntry {
        ArchiveEntry {
            path: path.to_owned(),
            is_directory: path.ends_with('/'),
            uncompressed_size: 0,
            last_modified: None,
        }
    }

    #[test]
    fn detection() {
        let wrapped = [
            entry("my-skill/"),
            entry("my-skill/SKILL.md"),
            entry("my-skill/scripts/run.sh"),
        ];
        assert_eq!(detect_common_root(&wrapped).as_deref(), Some("my-skill/"));

        let flat = [entry("SKILL.md"), entry("scripts/run.sh")];
        assert_eq!(detect_common_root(&flat), None);

        let split = [entry("a/SKILL.md"), entry("b/run.sh")];
        assert_eq!(detect_common_root(&split), None);

        // Shared text isn't a shared folder.
        let lookalike = [entry("my/SKILL.md"), entry("my-skill/run.sh")];
        assert_eq!(detect_common_root(&lookalike), None);

        assert_eq!(detect_common_root(&[entry("only-dirs/")]), None);
        assert_eq!(detect_common_root(&[]), None);
    }

    #[test]
    fn stripping() {
        let original = write([
            ("my-skill/", ""),
            ("my-skill/SKILL.md", "---\nname: X\n---\n"),
            ("my-skill/scripts/", ""),
            ("my-skill/scripts/run.sh", "echo hi"),
        ])
        .unwrap();
        let before = original.clone();

        let stripped = strip_root(&original, "my-skill/", LIMIT).unwrap();
        assert_eq!(original, before);

        let entries = list_files(&stripped).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["SKILL.md", "scripts/run.sh"]);

        // Nothing left to strip the second time around.
        assert_eq!(detect_common_root(&entries), None);
    }

    #[test]
    fn unreadable_manifest_is_not_dropped() {
        let mut archive = write([
            ("my-skill/SKILL.md", "---\nname: X\n---\n"),
            ("my-skill/run.sh", "echo hi"),
        ])
        .unwrap();
        // The manifest is written first; claim it uses LZMA.
        archive[8] = 14;
        assert!(matches!(
            strip_root(&archive, "my-skill/", LIMIT),
            Err(BundleError::FrontmatterParseError)
        ));
    }

    #[test]
    fn nothing_to_strip() {
        let dirs_only = write([("my-skill/", "")]).unwrap();
        assert!(matches!(
            strip_root(&dirs_only, "my-skill/", LIMIT),
            Err(BundleError::ExtractionFailed(_))
        ));
    }
}
