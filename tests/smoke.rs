use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::Utf8Path;
use flate2::{write::DeflateEncoder, Compression};
use log::*;

use rayon::prelude::*;

use skillbundle::write::write_folder;
use skillbundle::*;

#[test]
fn smoke() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let tempdir = tempfile::tempdir()?;
    let temp_path =
        Utf8Path::from_path(tempdir.path()).context("Temporary directory isn't UTF-8")?;
    let skill = temp_path.join("my-skill");
    fs::create_dir_all(skill.join("scripts"))?;
    fs::create_dir_all(skill.join(".git"))?;
    fs::write(
        skill.join("SKILL.md"),
        "---\nname: X\ndescription: Does X things\n---\nRun scripts/run.sh\n",
    )?;
    fs::write(skill.join("scripts/run.sh"), "#!/bin/sh\necho hi\n")?;
    fs::write(skill.join(".git/HEAD"), "ref: refs/heads/main\n")?;

    let config = BundleConfig::default();

    info!("Importing {} as a folder", skill);
    let from_folder =
        import_folder(&skill, "my-skill", &config).context("Couldn't import folder")?;
    check_imported(&from_folder)?;

    info!("Importing {} as an archive", skill);
    let archive = write_folder(&skill, &config.forbidden_patterns)?;
    let archive_path = temp_path.join("my-skill.zip");
    fs::write(&archive_path, &archive)?;
    let from_archive = import_archive(&fs::read(&archive_path)?, "my-skill", &config)
        .context("Couldn't import archive")?;
    check_imported(&from_archive)?;

    // Both paths normalize to the same thing.
    assert_eq!(from_folder, from_archive);

    // Exporting and importing again changes nothing.
    let exported = export(&from_archive);
    let reimported = import_archive(&exported, "my-skill", &config)?;
    assert_eq!(reimported.archive_bytes, exported);
    assert_eq!(reimported.entries, from_archive.entries);

    tempdir.close()?;
    Ok(())
}

fn check_imported(bundle: &ImportedBundle) -> Result<()> {
    let paths: Vec<&str> = bundle.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["SKILL.md", "scripts/run.sh"]);
    assert_eq!(bundle.name, "X");
    assert_eq!(bundle.description, "Does X things");
    assert_eq!(bundle.suggested_directory_name, "my-skill");
    assert_eq!(
        bundle.read_file("scripts/run.sh").context("No run.sh")?,
        b"#!/bin/sh\necho hi\n"
    );
    Ok(())
}

/// Builds an archive the way other tools would:
/// everything deflated, with a top-level folder.
fn deflated_archive(files: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut central_directory = Vec::new();

    for (path, contents) in files {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(contents)?;
        let compressed = encoder.finish()?;
        let crc = crc32fast::hash(contents);
        let offset = out.len() as u32;

        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&8u16.to_le_bytes()); // deflate
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&0x21u16.to_le_bytes()); // date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        out.extend_from_slice(&(path.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra field
        out.extend_from_slice(path.as_bytes());
        out.extend_from_slice(&compressed);

        central_directory.extend_from_slice(b"PK\x01\x02");
        central_directory.extend_from_slice(&20u16.to_le_bytes()); // made by
        central_directory.extend_from_slice(&20u16.to_le_bytes()); // needed
        central_directory.extend_from_slice(&0u16.to_le_bytes());
        central_directory.extend_from_slice(&8u16.to_le_bytes());
        central_directory.extend_from_slice(&0u16.to_le_bytes());
        central_directory.extend_from_slice(&0x21u16.to_le_bytes());
        central_directory.extend_from_slice(&crc.to_le_bytes());
        central_directory.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        central_directory.extend_from_slice(&(contents.len() as u32).to_le_bytes());
        central_directory.extend_from_slice(&(path.len() as u16).to_le_bytes());
        central_directory.extend_from_slice(&[0; 8]); // extra, comment, disk, internal attrs
        central_directory.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central_directory.extend_from_slice(&offset.to_le_bytes());
        central_directory.extend_from_slice(path.as_bytes());
    }

    let central_directory_offset = out.len() as u32;
    out.extend_from_slice(&central_directory);
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0; 4]); // disk numbers
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central_directory.len() as u32).to_le_bytes());
    out.extend_from_slice(&central_directory_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment
    Ok(out)
}

#[test]
fn deflated() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let notes = "lorem ipsum dolor sit amet ".repeat(200);
    let archive = deflated_archive(&[
        (
            "pdf-tools/SKILL.md",
            b"---\nname: 'PDF Tools'\n---\n".as_slice(),
        ),
        ("pdf-tools/notes.txt", notes.as_bytes()),
    ])?;

    let bundle = import_archive(&archive, "pdf-tools.zip", &BundleConfig::default())?;
    assert_eq!(bundle.name, "PDF Tools");
    assert_eq!(bundle.suggested_directory_name, "pdf-tools");
    let paths: Vec<&str> = bundle.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["SKILL.md", "notes.txt"]);
    assert_eq!(bundle.entries[1].uncompressed_size, notes.len() as u64);
    assert_eq!(bundle.read_file("notes.txt").context("No notes")?, notes.as_bytes());
    assert_eq!(bundle.manifest()?, "---\nname: 'PDF Tools'\n---\n");
    Ok(())
}

#[test]
fn concurrent_imports() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let archives: Vec<(String, Vec<u8>)> = (0..32)
        .map(|i| -> Result<(String, Vec<u8>)> {
            let name = format!("skill-{i}");
            let manifest = format!("---\nname: Skill {i}\n---\n");
            let archive = skillbundle::write::write([
                (format!("{name}/SKILL.md"), manifest.into_bytes()),
                (format!("{name}/data.bin"), vec![i as u8; 1000 + i]),
            ])?;
            Ok((name, archive))
        })
        .collect::<Result<_>>()?;

    archives
        .par_iter()
        .try_for_each::<_, Result<()>>(|(name, archive)| {
            let bundle = import_archive(archive, name, &BundleConfig::default())?;
            assert_eq!(&bundle.suggested_directory_name, name);
            assert_eq!(bundle.entries.len(), 2);
            assert_eq!(bundle.files().len(), 2);
            Ok(())
        })?;
    Ok(())
}

#[test]
fn rejections() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = BundleConfig {
        max_archive_size: 1024,
        ..Default::default()
    };
    match import_archive(&[0u8; 2048], "big", &config) {
        Err(BundleError::TooLarge(2048)) => { /* Cool. */ }
        other => panic!("Expected TooLarge, got {:?}", other),
    }

    let hidden = skillbundle::write::write([
        ("SKILL.md", b"---\nname: Leaky\n---\n".as_slice()),
        ("config/.env", b"TOKEN=hunter2".as_slice()),
    ])
    .unwrap();
    match import_archive(&hidden, "leaky", &config) {
        Err(BundleError::ForbiddenFile(p)) => assert_eq!(p, "config/.env"),
        other => panic!("Expected ForbiddenFile, got {:?}", other),
    }
}
