//! `krogon` CLI: a thin front-end over the library. Not part of the
//! core — it exists to wire a `V1Registry`/`TarCodec` pair and print
//! one terse progress line per layer.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use krogon::config::{ClientConfig, ClientInfo, RegistrySession};
use krogon::pull::PullPipeline;
use krogon::push::PushPipeline;
use krogon::reference::{parse_credentials, ImageReference};
use krogon::store::LayerStore;

mod demo;

#[derive(Parser, Debug)]
#[command(name = "krogon", version, about = "Pull, commit, and push container image layers without a runtime daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull an image's layers into a rootfs directory.
    Pull {
        reference: String,
        #[arg(short = 'r', long, default_value = "./rootfs")]
        rootfs: PathBuf,
        #[arg(short = 'u', long, default_value = "")]
        credentials: String,
        /// Layer the rootfs into a revision-controlled store.
        #[arg(short = 'g', long)]
        git_layering: bool,
        /// Use the V2 registry schema instead of V1.
        #[arg(long = "v2")]
        use_v2: bool,
        /// Exercise the pipeline against an in-memory demo registry
        /// instead of a real one.
        #[arg(long)]
        dry_run: bool,
    },
    /// Push a layered rootfs store to a registry.
    Push {
        reference: String,
        #[arg(short = 'r', long, default_value = "./rootfs")]
        rootfs: PathBuf,
        #[arg(short = 'u', long)]
        credentials: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Commit uncommitted rootfs changes as a new top layer.
    Commit {
        #[arg(short = 'r', long, default_value = "./rootfs")]
        rootfs: PathBuf,
        #[arg(short = 'm', long)]
        message: String,
    },
    /// Print client name, version, and supported registry schemas.
    Version,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Pull {
            reference,
            rootfs,
            credentials,
            git_layering,
            use_v2,
            dry_run,
        } => run_pull(&reference, &rootfs, &credentials, git_layering, use_v2, dry_run),
        Commands::Push {
            reference,
            rootfs,
            credentials,
            dry_run,
        } => run_push(&reference, &rootfs, &credentials, dry_run),
        Commands::Commit { rootfs, message } => run_commit(&rootfs, &message),
        Commands::Version => {
            println!("{}", ClientInfo::CURRENT);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run_pull(
    reference: &str,
    rootfs: &PathBuf,
    credentials: &str,
    git_layering: bool,
    use_v2: bool,
    dry_run: bool,
) -> Result<(), krogon::ClientError> {
    let reference = ImageReference::parse(reference);
    let (user, pass) = parse_credentials(credentials);
    let session = RegistrySession::from_credentials(user, pass);
    let config = ClientConfig::default();
    let codec = demo::DemoTarCodec;

    if !dry_run {
        eprintln!(
            "{}",
            "no registry implementation wired; pass --dry-run to exercise the demo path".yellow()
        );
        return Ok(());
    }

    let pipeline = PullPipeline::new(&config, &codec);
    if use_v2 {
        let registry: Arc<dyn krogon::registry::V2Registry> =
            Arc::new(demo::DemoV2Registry::new(session));
        pipeline.pull_v2(registry, &reference, rootfs, git_layering)?;
    } else {
        let registry: Arc<dyn krogon::registry::V1Registry> =
            Arc::new(demo::DemoV1Registry::new(session));
        pipeline.pull_v1(registry, &reference, rootfs, git_layering)?;
    }

    println!("{} {reference}", "pulled".green().bold());
    Ok(())
}

fn run_push(
    reference: &str,
    rootfs: &PathBuf,
    credentials: &str,
    dry_run: bool,
) -> Result<(), krogon::ClientError> {
    let reference = ImageReference::parse(reference);
    let (user, pass) = parse_credentials(credentials);
    let session = RegistrySession::from_credentials(user, pass);
    let codec = demo::DemoTarCodec;

    if !dry_run {
        eprintln!(
            "{}",
            "no registry implementation wired; pass --dry-run to exercise the demo path".yellow()
        );
        return Ok(());
    }

    let store = LayerStore::open_or_init(rootfs)?;
    let registry = demo::DemoV1Registry::new(session);
    let pipeline = PushPipeline::new(&codec);
    let outcomes = pipeline.push_v1(&registry, &store, &reference)?;

    for outcome in &outcomes {
        match outcome {
            krogon::push::LayerPushOutcome::AlreadyPresent => {
                println!("{}", "already pushed".dimmed());
            }
            krogon::push::LayerPushOutcome::Uploaded { bytes } => {
                println!("{} ({bytes} bytes)", "done".green());
            }
        }
    }
    Ok(())
}

fn run_commit(rootfs: &PathBuf, message: &str) -> Result<(), krogon::ClientError> {
    let store = LayerStore::open_or_init(rootfs)?;
    let codec = demo::DemoTarCodec;
    let pipeline = PushPipeline::new(&codec);
    let branch = pipeline.commit(&store, rootfs, message)?;
    println!("{} {branch}", "committed".green().bold());
    Ok(())
}
