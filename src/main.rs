//! decl-synth CLI
//!
//! Usage:
//!   decl-synth [OPTIONS] --catalog <FILE> <TEMPLATE>
//!
//! Options:
//!   -k, --catalog <FILE>  Type table describing the object library (JSON)
//!   -c, --config <FILE>   Compiler configuration (TOML format)
//!   -v, --verbose         Log compilation phases to stderr
//!   -h, --help            Print help

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use decl_synth::{compile_with_config, CompilerConfig, MemoryRuntime, TypeRegistry};

#[derive(Parser)]
#[command(name = "decl-synth")]
#[command(about = "Compile declarative templates into a synthesized object graph")]
struct Cli {
    /// Template file, JSON or YAML
    template: PathBuf,

    /// Type table describing the object library (JSON)
    #[arg(short = 'k', long)]
    catalog: PathBuf,

    /// Compiler configuration (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log compilation phases to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => match CompilerConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => CompilerConfig::default(),
    };

    let catalog = match TypeRegistry::from_file(&cli.catalog) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error loading type table '{}': {}", cli.catalog.display(), e);
            std::process::exit(1);
        }
    };

    let source = match fs::read_to_string(&cli.template) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", cli.template.display(), e);
            std::process::exit(1);
        }
    };

    let document = match parse_document(&source, &cli.template) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut runtime = MemoryRuntime::from_config(&config);
    let scope = runtime.scope();
    if let Err(e) = compile_with_config(&document, &catalog, &mut runtime, scope, &config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&runtime.render()) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// YAML for `.yaml`/`.yml` files, JSON otherwise
fn parse_document(source: &str, path: &Path) -> decl_synth::Result<serde_json::Value> {
    let is_yaml = path
        .extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false);
    let result = if is_yaml {
        serde_yaml::from_str(source).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(source).map_err(|e| e.to_string())
    };
    result.map_err(|e| {
        decl_synth::CompileError::shape(format!("Invalid template document: {}", e))
    })
}
