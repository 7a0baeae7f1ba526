//! Command-line interface for the depot store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use depot_core::config::DepotConfig;
use depot_core::hash::{Hash, HashAlgorithm, hash_file, hash_path};
use depot_core::nar;
use depot_core::store_path::{StoreDir, StorePath};
use depot_signer::{PublicKeys, SecretKey, check_signatures, read_secret_key, sign_path_info};
use depot_store::{
    LocalStore, Store, StoreRegistry, copy_store_path, make_validity_registration,
    register_validity, serve_daemon,
};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::collections::BTreeSet;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Inspect and manage a depot store")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Store URI (default: $NIX_REMOTE, else auto-detect)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata of valid store paths
    PathInfo {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
        /// Append signatures to each line
        #[arg(long)]
        sigs: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Compute store paths without touching the store
    MakePath {
        #[command(subcommand)]
        command: MakePathCommands,
    },
    /// Hash a file or directory tree
    HashPath {
        path: PathBuf,
        #[arg(long, default_value = "sha256")]
        algo: String,
        /// Hash the file contents instead of its NAR serialisation
        #[arg(long)]
        flat: bool,
        #[arg(long, value_enum, default_value_t = HashFormat::Nix32)]
        format: HashFormat,
    },
    /// Write a validity registration for store paths to stdout
    DumpDb {
        /// Paths to dump (default: every valid path)
        paths: Vec<String>,
        /// Omit NAR hashes and sizes
        #[arg(long)]
        no_hash: bool,
    },
    /// Register the paths of a validity registration read from stdin
    LoadDb {
        /// Records carry NAR hashes and sizes
        #[arg(long)]
        hash_given: bool,
    },
    /// Copy store paths between stores
    Copy {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        repair: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Check NAR contents and signatures of store paths
    Verify {
        /// Paths to verify (default: every valid path)
        paths: Vec<String>,
        /// Minimum number of trusted signatures per path
        #[arg(long, default_value_t = 0)]
        sigs_needed: usize,
        /// Skip re-hashing NAR contents
        #[arg(long)]
        no_contents: bool,
    },
    /// Sign store paths with a secret key
    Sign {
        /// Secret key file (default: signing.secret_key_file from config)
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Key management commands
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// List the configured substituters
    Substituters,
    /// Serve the local store on a Unix socket
    Daemon {
        /// Socket path (default: store.daemon_socket from config)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MakePathCommands {
    /// Path of a text file with references
    Text {
        name: String,
        /// File holding the text
        #[arg(long)]
        file: PathBuf,
        /// Referenced store path
        #[arg(long = "ref")]
        references: Vec<String>,
    },
    /// Path of fixed-output content
    Fixed {
        name: String,
        /// Content hash, e.g. sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s
        #[arg(long)]
        hash: String,
        /// The hash covers the NAR serialisation rather than flat file contents
        #[arg(long)]
        recursive: bool,
    },
    /// Path of a derivation output
    Output {
        name: String,
        /// Derivation hash (sha256)
        #[arg(long)]
        hash: String,
        #[arg(long, default_value = "out")]
        id: String,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new signing key pair
    Generate {
        /// Key name, e.g. cache.example.org-1
        name: String,
        /// Write the secret key to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the public key of a secret key file
    Public { file: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HashFormat {
    Base16,
    Nix32,
    Base64,
    Sri,
}

fn format_hash(hash: &Hash, format: HashFormat) -> String {
    match format {
        HashFormat::Base16 => hash.to_base16(),
        HashFormat::Nix32 => hash.to_nix32(),
        HashFormat::Base64 => hash.to_base64(),
        HashFormat::Sri => hash.to_sri(),
    }
}

/// Load configuration from an optional TOML file and `DEPOT_` environment
/// variables, then validate it.
fn load_config(path: Option<&Path>) -> Result<DepotConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("configuration file {} does not exist", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("DEPOT_").split("__"));

    let config: DepotConfig = figment
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

struct App {
    config: DepotConfig,
    registry: StoreRegistry,
    store_uri: Option<String>,
}

impl App {
    fn new(config: DepotConfig, store_uri: Option<String>) -> Result<Self> {
        let registry = StoreRegistry::with_defaults(config.clone())
            .context("failed to initialise store registry")?;
        Ok(Self {
            config,
            registry,
            store_uri,
        })
    }

    fn open_store(&self) -> Result<Arc<Store>> {
        let store = match &self.store_uri {
            Some(uri) => self.registry.open_store_at(uri),
            None => self.registry.open_store(),
        };
        store.context("failed to open store")
    }

    fn open_store_at(&self, uri: &str) -> Result<Arc<Store>> {
        self.registry
            .open_store_at(uri)
            .with_context(|| format!("failed to open store '{uri}'"))
    }

    fn store_dir(&self) -> Result<StoreDir> {
        Ok(self.config.store.store_dir()?)
    }
}

/// Resolve command-line arguments to store paths, following symlinks such
/// as `./result` into the store.
fn parse_paths(store_dir: &StoreDir, args: &[String]) -> Result<Vec<StorePath>> {
    args.iter()
        .map(|arg| {
            store_dir
                .follow_links_to_store_path(Path::new(arg))
                .with_context(|| format!("'{arg}' is not a store path"))
        })
        .collect()
}

fn paths_or_all(store: &Store, args: &[String]) -> Result<Vec<StorePath>> {
    if args.is_empty() {
        Ok(store.query_all_valid_paths()?)
    } else {
        parse_paths(store.store_dir(), args)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref())?;
    let ctx = App::new(config, cli.store)?;
    run(&ctx, cli.command)
}

fn run(ctx: &App, command: Commands) -> Result<()> {
    match command {
        Commands::PathInfo { json, sigs, paths } => handle_path_info(ctx, &paths, json, sigs),
        Commands::MakePath { command } => {
            println!("{}", handle_make_path(&ctx.store_dir()?, command)?);
            Ok(())
        }
        Commands::HashPath {
            path,
            algo,
            flat,
            format,
        } => {
            let algorithm: HashAlgorithm = algo.parse()?;
            let hash = if flat {
                hash_file(algorithm, &path)
            } else {
                hash_path(algorithm, &path, &nar::accept_all).map(|(hash, _)| hash)
            }
            .with_context(|| format!("failed to hash {}", path.display()))?;
            println!("{}", format_hash(&hash, format));
            Ok(())
        }
        Commands::DumpDb { paths, no_hash } => {
            let store = ctx.open_store()?;
            let paths: BTreeSet<_> = paths_or_all(&store, &paths)?.into_iter().collect();
            let text = make_validity_registration(&store, &paths, true, !no_hash)?;
            std::io::stdout().lock().write_all(text.as_bytes())?;
            Ok(())
        }
        Commands::LoadDb { hash_given } => {
            let local = LocalStore::open(ctx.store_dir()?, &ctx.config.store.state_dir)
                .context("failed to open local store")?;
            let count = register_validity(&local, &mut std::io::stdin().lock(), hash_given)
                .context("failed to register paths")?;
            eprintln!("registered {count} paths");
            Ok(())
        }
        Commands::Copy {
            from,
            to,
            repair,
            paths,
        } => {
            let src = ctx.open_store_at(&from)?;
            let dst = ctx.open_store_at(&to)?;
            for path in parse_paths(src.store_dir(), &paths)? {
                copy_store_path(&src, &dst, &path, repair)
                    .with_context(|| format!("failed to copy '{path}' to '{to}'"))?;
            }
            Ok(())
        }
        Commands::Verify {
            paths,
            sigs_needed,
            no_contents,
        } => handle_verify(ctx, &paths, sigs_needed, !no_contents),
        Commands::Sign { key_file, paths } => {
            let key_file = key_file
                .or_else(|| ctx.config.signing.as_ref().map(|s| s.secret_key_file.clone()))
                .context("no secret key: pass --key-file or set signing.secret_key_file")?;
            let key = read_secret_key(&key_file)
                .with_context(|| format!("failed to read key file {}", key_file.display()))?;
            handle_sign(ctx, &key, &paths)
        }
        Commands::Key { command } => handle_key_command(command),
        Commands::Substituters => {
            for store in ctx.registry.substituters()? {
                println!("{}", store.uri());
            }
            Ok(())
        }
        Commands::Daemon { socket } => {
            let socket = socket.unwrap_or_else(|| ctx.config.store.daemon_socket_path());
            let store = ctx.open_store_at("local")?;
            let listener = bind_socket(&socket)?;
            tracing::info!(socket = %socket.display(), "daemon listening");
            serve_daemon(listener, store)?;
            Ok(())
        }
    }
}

fn handle_path_info(ctx: &App, args: &[String], json: bool, show_sigs: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let mut infos = Vec::new();
    for path in parse_paths(store.store_dir(), args)? {
        infos.push(store.query_path_info(&path)?);
    }

    if json {
        let records: Vec<_> = infos.iter().map(|info| info.to_record()).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for info in &infos {
            let hash = info
                .nar_hash
                .as_ref()
                .map(Hash::to_typed_nix32)
                .unwrap_or_default();
            let mut line = format!("{}\t{hash}\t{}", info.path, info.nar_size);
            if show_sigs {
                line.push('\t');
                line.push_str(&info.sigs.iter().cloned().collect::<Vec<_>>().join(" "));
            }
            println!("{line}");
        }
    }
    tracing::debug!(stats = ?store.stats(), "path info done");
    Ok(())
}

fn handle_make_path(store_dir: &StoreDir, command: MakePathCommands) -> Result<StorePath> {
    let path = match command {
        MakePathCommands::Text {
            name,
            file,
            references,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let references: BTreeSet<_> = references
                .iter()
                .map(|r| store_dir.parse_path(r))
                .collect::<depot_core::Result<_>>()?;
            store_dir.compute_store_path_for_text(&name, &content, &references)?
        }
        MakePathCommands::Fixed {
            name,
            hash,
            recursive,
        } => store_dir.make_fixed_output_path(recursive, &Hash::parse_typed(&hash)?, &name)?,
        MakePathCommands::Output { name, hash, id } => {
            store_dir.make_output_path(&id, &Hash::parse_typed(&hash)?, &name)?
        }
    };
    Ok(path)
}

fn handle_verify(ctx: &App, args: &[String], sigs_needed: usize, check_contents: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let keys = PublicKeys::parse(ctx.config.trusted_public_keys.iter().map(String::as_str))
        .context("invalid trusted public key")?;
    let mut failed = 0usize;

    for path in paths_or_all(&store, args)? {
        let info = store.query_path_info(&path)?;

        if check_contents {
            let nar = store.nar_from_path(&path)?;
            let expected = info.nar_hash.as_ref();
            let actual = expected.map(|h| depot_core::hash::hash_string(h.algorithm(), &nar));
            if expected.is_none() || actual.as_ref() != expected {
                eprintln!("path '{path}' was modified! expected hash {expected:?}, got {actual:?}");
                failed += 1;
                continue;
            }
        }

        let good = check_signatures(&info, &keys)?;
        if good < sigs_needed {
            eprintln!("path '{path}' has {good} trusted signatures, {sigs_needed} needed");
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} paths failed verification");
    }
    Ok(())
}

fn handle_sign(ctx: &App, key: &SecretKey, args: &[String]) -> Result<()> {
    let store = ctx.open_store()?;
    let mut added = 0usize;
    for path in parse_paths(store.store_dir(), args)? {
        let info = store.query_path_info(&path)?;
        let mut signed = (*info).clone();
        sign_path_info(&mut signed, key)?;

        let new_sigs: BTreeSet<_> = signed.sigs.difference(&info.sigs).cloned().collect();
        if !new_sigs.is_empty() {
            store
                .add_signatures(&path, &new_sigs)
                .with_context(|| format!("failed to add signature to '{path}'"))?;
            added += new_sigs.len();
        }
    }
    eprintln!("added {added} signatures");
    Ok(())
}

fn handle_key_command(command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::Generate { name, output } => {
            let key = SecretKey::generate(name);
            let secret_key = key.to_nix_format();
            let public_key = key.to_public_key().to_nix_format();

            if let Some(path) = output {
                std::fs::write(&path, format!("{secret_key}\n"))
                    .with_context(|| format!("failed to write key to {}", path.display()))?;
                eprintln!("Secret key written to: {}", path.display());
            } else {
                println!("{secret_key}");
            }
            println!("{public_key}");
        }
        KeyCommands::Public { file } => {
            let key = read_secret_key(&file)
                .with_context(|| format!("failed to read key file {}", file.display()))?;
            println!("{}", key.to_public_key().to_nix_format());
        }
    }
    Ok(())
}

/// Bind `socket`, replacing a stale socket file left by an earlier daemon.
fn bind_socket(socket: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if socket.exists() {
        std::fs::remove_file(socket)
            .with_context(|| format!("failed to remove stale socket {}", socket.display()))?;
    }
    UnixListener::bind(socket).with_context(|| format!("failed to bind {}", socket.display()))
}
