//! facetag - Recurring-person tagging for diary photos.

mod config;
mod server;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mindlog_personid::{Config as TaggerConfig, JsonFileBackend, Linkage, StoreBackend, Tagger};
use tracing_subscriber::EnvFilter;

use config::{load_config, FileConfig};
use server::{TagRequest, TagResponse};

/// facetag - Tag diary photos with stable person ids.
///
/// Face embeddings are clustered per batch and matched against a
/// persistent identity store (default ~/.mindlog/facetag/data/face_database.json).
#[derive(Parser, Debug)]
#[command(name = "facetag")]
#[command(about = "Tag diary photos with stable person ids")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.mindlog/facetag/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity store path (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag one batch read from a JSON or YAML request file
    Tag(TagArgs),
    /// Serve the tagging API over HTTP
    Serve {
        /// Listen address (e.g. :8080, 127.0.0.1:9000)
        #[arg(short, long)]
        listen: Option<String>,

        #[command(flatten)]
        tagger: TaggerArgs,
    },
    /// List the identities in the store
    Identities {
        /// Only identities seen in this image
        #[arg(long)]
        image: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct TagArgs {
    /// Request file ({"images": [{"image": ..., "faces": [[...]]}]}), "-" for stdin
    #[arg(short = 'f', long = "file", default_value = "-")]
    input: String,

    #[command(flatten)]
    tagger: TaggerArgs,
}

/// Overrides for the `tagger` section of the config file.
#[derive(Args, Debug)]
struct TaggerArgs {
    /// Embedding dimension
    #[arg(long)]
    dim: Option<usize>,

    /// Minimum cosine similarity to reuse an identity
    #[arg(long)]
    match_threshold: Option<f32>,

    /// Maximum cosine distance to merge clusters
    #[arg(long)]
    cluster_threshold: Option<f32>,

    /// Cluster linkage (single, complete, average, ward)
    #[arg(long)]
    linkage: Option<Linkage>,

    /// Let unmatched faces reuse the id of their cluster (true/false)
    #[arg(long)]
    cluster_hint: Option<bool>,
}

impl TaggerArgs {
    fn apply(&self, cfg: &mut TaggerConfig) {
        if let Some(dim) = self.dim {
            cfg.dim = dim;
        }
        if let Some(t) = self.match_threshold {
            cfg.match_threshold = t;
        }
        if let Some(t) = self.cluster_threshold {
            cfg.cluster_threshold = t;
        }
        if let Some(linkage) = self.linkage {
            cfg.linkage = linkage;
        }
        if let Some(hint) = self.cluster_hint {
            cfg.cluster_hint = hint;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut file_cfg = load_config(cli.config.as_deref())?;
    if let Some(store) = &cli.store {
        file_cfg.store = Some(store.clone());
    }

    match &cli.command {
        Commands::Tag(args) => run_tag(file_cfg, args),
        Commands::Serve { listen, tagger } => {
            tagger.apply(&mut file_cfg.tagger);
            let addr = listen.clone().unwrap_or_else(|| file_cfg.listen().to_string());
            let tagger = build_tagger(&file_cfg)?;
            server::start_server(&addr, Arc::new(tagger)).await
        }
        Commands::Identities { image, json } => list_identities(&file_cfg, image.as_deref(), *json),
    }
}

fn build_tagger(file_cfg: &FileConfig) -> Result<Tagger> {
    let path = file_cfg.store_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create store directory {}", dir.display()))?;
    }
    let backend = JsonFileBackend::new(&path).with_dim(file_cfg.tagger.dim);
    Tagger::new(file_cfg.tagger.clone(), Box::new(backend)).context("invalid tagger config")
}

fn run_tag(mut file_cfg: FileConfig, args: &TagArgs) -> Result<()> {
    args.tagger.apply(&mut file_cfg.tagger);
    let request = read_request(&args.input)?;
    let tagger = build_tagger(&file_cfg)?;
    let result = tagger.tag(request.images)?;
    println!("{}", serde_json::to_string_pretty(&TagResponse::from(result))?);
    Ok(())
}

fn read_request(input: &str) -> Result<TagRequest> {
    let (data, is_json) = if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("read stdin")?;
        (buf, false)
    } else {
        let data = std::fs::read(input).with_context(|| format!("read {input}"))?;
        (data, input.ends_with(".json"))
    };
    let req = if is_json {
        serde_json::from_slice(&data)?
    } else {
        // YAML is a superset of JSON, so stdin accepts either.
        serde_yaml::from_slice(&data)?
    };
    Ok(req)
}

fn list_identities(file_cfg: &FileConfig, image: Option<&str>, json: bool) -> Result<()> {
    let path = file_cfg.store_path()?;
    let store = JsonFileBackend::new(&path).with_dim(file_cfg.tagger.dim).load();
    let list = server::summaries(&store, image);

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!("{} ({} identities, next id {})", path.display(), store.len(), store.next_id());
    for s in &list {
        println!("{:<12} {:>4} embeddings  {}", s.id, s.embeddings, s.images.join(", "));
    }
    Ok(())
}
