use std::fs::{self, File};

use anyhow::*;
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use memmap2::Mmap;
use structopt::*;

use skillbundle::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bundle_probe",
    about = "Imports a skill bundle (archive or folder) and reports what's in it"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Largest archive to accept, in bytes
    #[structopt(long)]
    max_size: Option<usize>,

    /// List every entry in the bundle
    #[structopt(short, long)]
    list: bool,

    /// The name to import the bundle under (defaults to the file name)
    #[structopt(short, long)]
    name: Option<String>,

    /// Write the exported archive here
    #[structopt(short, long, parse(from_str))]
    output: Option<Utf8PathBuf>,

    #[structopt(name("archive or folder"), parse(from_str))]
    path: Utf8PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut config = BundleConfig::default();
    if let Some(max) = args.max_size {
        config.max_archive_size = max;
    }

    let name = match &args.name {
        Some(n) => n.clone(),
        None => args.path.file_name().unwrap_or("skill").to_owned(),
    };

    let bundle = if args.path.is_dir() {
        import_folder(&args.path, &name, &config)
            .with_context(|| format!("Couldn't import folder {}", args.path))?
    } else {
        import_mapped(&args.path, &name, &config)?
    };

    println!("{}", bundle.name);
    if !bundle.description.is_empty() {
        println!("  {}", bundle.description);
    }
    println!("  install as {}/", bundle.suggested_directory_name);
    println!("  {} entries", bundle.entries.len());
    if args.list {
        for entry in &bundle.entries {
            let kind = if entry.is_directory { "dir " } else { "file" };
            println!("    {} {:>10} {}", kind, entry.uncompressed_size, entry.path);
        }
    }

    if let Some(output) = &args.output {
        info!("Writing {}", output);
        fs::write(output, export(&bundle))
            .with_context(|| format!("Couldn't write {}", output))?;
    }
    Ok(())
}

fn import_mapped(path: &Utf8Path, name: &str, config: &BundleConfig) -> Result<ImportedBundle> {
    info!("Memory mapping {}", path);
    let file = File::open(path).context("Couldn't open archive")?;
    let mapping = unsafe { Mmap::map(&file).context("Couldn't mmap archive")? };
    let bundle = import_archive(&mapping, name, config).context("Couldn't import archive")?;
    Ok(bundle)
}
