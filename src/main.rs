//! Command line wrapper around the artifact extractor.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use artifact_collector::catalog::ArtifactCatalog;
use artifact_collector::collector::ArtifactExtractor;
use artifact_collector::keys::read_key_list;
use artifact_collector::registry::DisabledHiveParser;
use artifact_collector::store::{JsonlStore, OutputStore};
use artifact_collector::vfs::LocalVfs;

/// Process forensic evidence and extract artifacts
#[derive(Parser)]
#[command(
    name = "artifact-collector",
    version,
    about = "Process forensic evidence and extract artifacts"
)]
struct Cli {
    /// Path where to search for artifact definitions
    #[arg(short = 'a', long = "artifacts-path", default_value = "artifacts")]
    artifacts_path: PathBuf,

    /// Keyfile for decryption
    #[arg(short = 'k', long = "keys")]
    keyfile: Option<PathBuf>,

    /// Output location (will be created)
    #[arg(short = 'o', long = "output-dir", required = true)]
    output_dir: PathBuf,

    /// Which artifacts to extract
    #[arg(short = 'e', long = "extract", required = true, num_args = 1..)]
    artifact_names: Vec<String>,

    /// Input file(s) or folders to process
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    input_evidence: Vec<PathBuf>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if !cli.artifacts_path.is_dir() {
        eprintln!("Not a directory: {}", cli.artifacts_path.display());
        exit(1);
    }
    for input in &cli.input_evidence {
        if !input.exists() {
            eprintln!("Input does not exist: {}", input.display());
            exit(1);
        }
    }

    let mut catalog = ArtifactCatalog::new();
    match catalog.read_folder(&cli.artifacts_path) {
        Ok(count) => info!(count, "Loaded artifact definitions"),
        Err(err) => {
            eprintln!(
                "Could not read artifact definitions from {}: {}",
                cli.artifacts_path.display(),
                err
            );
            exit(1);
        }
    }
    if catalog.is_empty() {
        warn!(
            path = %cli.artifacts_path.display(),
            "Could not read any artifact definition"
        );
    }

    if let Some(path) = &cli.keyfile {
        let keys = match File::open(path) {
            Ok(file) => read_key_list(BufReader::new(file)),
            Err(err) => {
                eprintln!("Could not read keys file {}: {}", path.display(), err);
                exit(1);
            }
        };
        // The mounted-directory backend reads evidence as-is; decryption
        // needs an image-backed VFS implementing EncryptionHandler.
        warn!(
            count = keys.len(),
            "Decryption keys loaded, but this backend does not decrypt volumes; ignoring them"
        );
    }

    if let Err(err) = fs::create_dir_all(&cli.output_dir) {
        eprintln!(
            "Could not create output directory {}: {}",
            cli.output_dir.display(),
            err
        );
        exit(1);
    }
    let mut store = match JsonlStore::create(&cli.output_dir) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Could not open output store: {}", err);
            exit(1);
        }
    };

    for input in &cli.input_evidence {
        let vfs = match LocalVfs::new(input) {
            Ok(vfs) => Arc::new(vfs),
            Err(err) => {
                eprintln!("Cannot open evidence {}: {}", input.display(), err);
                exit(1);
            }
        };
        let extractor = ArtifactExtractor::new(vfs, Arc::new(DisabledHiveParser));
        for artifact in &cli.artifact_names {
            println!("Extract {}", artifact);
            extractor.extract_artifact(&catalog, artifact, &mut store);
        }
    }

    if let Err(err) = store.close() {
        warn!(%err, "Could not finalise output store");
    }
}
