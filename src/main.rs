//! RPF CLI - Command-line tool for packed resource archives.
//!
//! This is the main entry point for the `rpf` command-line application.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::{MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use rpf::keys::map_executable;
use rpf::prelude::*;

/// RPF - packed resource archive tool
#[derive(Parser)]
#[command(name = "rpf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the archive header
    Header {
        /// Path to the archive
        #[arg(short, long, env = "RPF_ARCHIVE")]
        archive: PathBuf,
    },

    /// List contents of an archive
    List {
        /// Path to the archive
        #[arg(short, long, env = "RPF_ARCHIVE")]
        archive: PathBuf,

        /// Directory holding the key cache
        #[arg(short, long, env = "RPF_KEYS_DIR")]
        keys_dir: Option<PathBuf>,

        /// Filter pattern (glob-style, case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Extract files from an archive
    Extract {
        /// Path to the archive
        #[arg(short, long, env = "RPF_ARCHIVE")]
        archive: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Directory holding the key cache
        #[arg(short, long, env = "RPF_KEYS_DIR")]
        keys_dir: Option<PathBuf>,

        /// Filter pattern (glob-style, case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Modify an archive and write it back
    Rewrite {
        /// Path to the archive
        #[arg(short, long, env = "RPF_ARCHIVE")]
        archive: PathBuf,

        /// Write to this file instead of rewriting in place
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory holding the key cache
        #[arg(short, long, env = "RPF_KEYS_DIR")]
        keys_dir: Option<PathBuf>,

        /// Add a file, as ARCHIVE_PATH=LOCAL_FILE
        #[arg(short, long)]
        insert: Vec<String>,

        /// Remove a file or directory
        #[arg(short, long)]
        remove: Vec<String>,

        /// Deflate inserted files
        #[arg(long)]
        compress: bool,

        /// Encrypt inserted files
        #[arg(long)]
        encrypt: bool,

        /// Change the archive's encryption
        #[arg(long, value_enum)]
        encryption: Option<EncryptionArg>,
    },

    /// Derive key material from the game executable into the key cache
    DeriveKeys {
        /// Path to the game executable
        #[arg(short, long)]
        executable: PathBuf,

        /// Key signature document (JSON)
        #[arg(short, long)]
        signatures: PathBuf,

        /// Directory holding the key cache
        #[arg(short, long, env = "RPF_KEYS_DIR")]
        keys_dir: PathBuf,

        /// Discard an existing cache first
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EncryptionArg {
    None,
    Open,
    Aes,
}

impl From<EncryptionArg> for EncryptionMode {
    fn from(arg: EncryptionArg) -> Self {
        match arg {
            EncryptionArg::None => EncryptionMode::None,
            EncryptionArg::Open => EncryptionMode::OpenPublic,
            EncryptionArg::Aes => EncryptionMode::Aes,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Header { archive } => {
            cmd_header(&archive)?;
        }
        Commands::List {
            archive,
            keys_dir,
            filter,
            detailed,
        } => {
            cmd_list(&archive, keys_dir.as_deref(), filter.as_deref(), detailed)?;
        }
        Commands::Extract {
            archive,
            output,
            keys_dir,
            filter,
        } => {
            cmd_extract(&archive, &output, keys_dir.as_deref(), filter.as_deref())?;
        }
        Commands::Rewrite {
            archive,
            output,
            keys_dir,
            insert,
            remove,
            compress,
            encrypt,
            encryption,
        } => {
            let options = InsertOptions { compress, encrypt };
            cmd_rewrite(
                &archive,
                output.as_deref(),
                keys_dir.as_deref(),
                &insert,
                &remove,
                options,
                encryption.map(EncryptionMode::from),
            )?;
        }
        Commands::DeriveKeys {
            executable,
            signatures,
            keys_dir,
            force,
        } => {
            cmd_derive_keys(&executable, &signatures, &keys_dir, force)?;
        }
    }

    Ok(())
}

fn progress_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"))
}

/// Open an archive and attach cached key material when there is any.
fn open_archive(path: &Path, keys_dir: Option<&Path>, writable: bool) -> Result<RpfArchive> {
    let mut archive = if writable {
        RpfArchive::open_rw(path)
    } else {
        RpfArchive::open(path)
    }
    .with_context(|| format!("Failed to open archive {}", path.display()))?;

    if let Some(dir) = keys_dir {
        match KeyCache::in_dir(dir).load() {
            Ok(Some(keys)) => archive.set_keys(keys),
            Ok(None) => warn!("No key cache in {}", dir.display()),
            Err(e) => warn!("Ignoring key cache in {}: {}", dir.display(), e),
        }
    }

    Ok(archive)
}

fn file_filter(pattern: Option<&str>) -> Result<Option<Pattern>> {
    pattern
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid filter pattern {p:?}")))
        .transpose()
}

fn filter_matches(filter: Option<&Pattern>, path: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    filter.map_or(true, |p| p.matches_with(path, options))
}

fn cmd_header(path: &Path) -> Result<()> {
    let archive = open_archive(path, None, false)?;
    let header = archive.header();
    let magic = header.magic().to_le_bytes();

    println!("Archive:     {}", archive.name());
    println!(
        "Magic:       {:#010x} ({})",
        header.magic(),
        String::from_utf8_lossy(&magic)
    );
    println!("Version:     {:?}", header.version());
    println!("Header size: {} bytes", header.encoded_len());
    println!("TOC size:    {} bytes", header.toc_size());
    println!("Entries:     {}", header.entry_count());
    if header.version().has_reserved() {
        println!("Reserved:    {:#010x}", header.reserved());
    }
    println!("Encryption:  {:?}", header.encryption());

    Ok(())
}

fn cmd_list(
    path: &Path,
    keys_dir: Option<&Path>,
    filter: Option<&str>,
    detailed: bool,
) -> Result<()> {
    let mut archive = open_archive(path, keys_dir, false)?;
    let filter = file_filter(filter)?;

    let files = archive.files().context("Failed to read table of contents")?;

    let mut count = 0;
    for (path, entry) in &files {
        if !filter_matches(filter.as_ref(), path) {
            continue;
        }

        if detailed {
            println!(
                "{:>10} {:>10} {:>10} {}{} {}",
                entry.offset,
                entry.stored_size(),
                entry.uncompressed_size,
                if entry.is_compressed() { "C" } else { " " },
                if entry.encrypted { "E" } else { " " },
                path
            );
        } else {
            println!("{}", path);
        }
        count += 1;
    }

    println!("\nTotal: {} files", count);

    Ok(())
}

/// Destination for an archive path, refusing anything that would leave `root`.
fn destination(root: &Path, archive_path: &str) -> Option<PathBuf> {
    let relative = Path::new(archive_path);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(root.join(relative))
    } else {
        None
    }
}

fn cmd_extract(
    path: &Path,
    output: &Path,
    keys_dir: Option<&Path>,
    filter: Option<&str>,
) -> Result<()> {
    println!("Opening archive: {}", path.display());

    let start = Instant::now();
    let mut archive = open_archive(path, keys_dir, false)?;
    let filter = file_filter(filter)?;

    let paths: Vec<String> = archive
        .files()
        .context("Failed to read table of contents")?
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| filter_matches(filter.as_ref(), path))
        .collect();

    println!("Loaded table of contents in {:?}", start.elapsed());
    println!("Extracting {} files...", paths.len());

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(progress_style()?);

    fs::create_dir_all(output)?;

    let start = Instant::now();
    let mut errors = 0;
    for entry_path in &paths {
        let Some(output_path) = destination(output, entry_path) else {
            warn!("Skipping unsafe path {}", entry_path);
            errors += 1;
            pb.inc(1);
            continue;
        };

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match archive.read(entry_path) {
            Ok(data) => fs::write(&output_path, data)
                .with_context(|| format!("Failed to write {}", output_path.display()))?,
            Err(e) => {
                pb.suspend(|| eprintln!("Error extracting {}: {}", entry_path, e));
                errors += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!(
        "Extraction completed in {:?} ({} errors)",
        start.elapsed(),
        errors
    );

    Ok(())
}

fn cmd_rewrite(
    path: &Path,
    output: Option<&Path>,
    keys_dir: Option<&Path>,
    insert: &[String],
    remove: &[String],
    options: InsertOptions,
    encryption: Option<EncryptionMode>,
) -> Result<()> {
    let mut archive = open_archive(path, keys_dir, output.is_none())?;

    for entry_path in remove {
        archive
            .remove(entry_path)
            .with_context(|| format!("Failed to remove {}", entry_path))?;
    }

    for arg in insert {
        let Some((entry_path, local)) = arg.split_once('=') else {
            bail!("Expected ARCHIVE_PATH=LOCAL_FILE, got {:?}", arg);
        };
        let data = fs::read(local).with_context(|| format!("Failed to read {}", local))?;
        archive
            .insert_file(entry_path, &data, options)
            .with_context(|| format!("Failed to insert {}", entry_path))?;
    }

    if let Some(mode) = encryption {
        archive.set_encryption(mode);
    }

    let start = Instant::now();
    let (_, len) = archive.write(output).context("Failed to write archive")?;
    let target = output.unwrap_or(path);
    println!(
        "Wrote {} ({} bytes) in {:?}",
        target.display(),
        len,
        start.elapsed()
    );

    archive.close()?;

    Ok(())
}

fn cmd_derive_keys(
    executable: &Path,
    signatures: &Path,
    keys_dir: &Path,
    force: bool,
) -> Result<()> {
    let signatures = KeySignatures::from_json_file(signatures)
        .with_context(|| format!("Failed to load signatures {}", signatures.display()))?;

    let cache = KeyCache::in_dir(keys_dir);
    if force && cache.invalidate()? {
        println!("Discarded {}", cache.path().display());
    }

    let pb = ProgressBar::new_spinner();
    let start = Instant::now();
    let keys = cache
        .load_or_derive(
            || map_executable(executable),
            &signatures,
            |status| pb.set_message(status.to_string()),
        )
        .with_context(|| format!("Failed to derive keys from {}", executable.display()));
    pb.finish_and_clear();
    let keys = keys?;

    println!("Key material ready in {:?}", start.elapsed());
    println!("  AES key:   {} bytes", keys.aes_key.len());
    println!("  NG keys:   {}", keys.ng_keys.len());
    println!("  NG rounds: {}", keys.ng_tables.len());
    println!("  LUT:       {} bytes", keys.lut.len());
    println!("Cache: {}", cache.path().display());

    Ok(())
}
