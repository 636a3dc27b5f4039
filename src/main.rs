//! CLI for building, querying and inspecting index images

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ann_adapter::persistence::{self, IndexManifest};
use ann_adapter::{AdapterConfig, Vector, VectorIndexHandle};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ann-adapter")]
#[command(about = "Build and query approximate nearest neighbor index images", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON adapter configuration (build threshold, threads, search tuning)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy)]
enum IndexKind {
    Hnsw,
    Flat,
}

impl IndexKind {
    fn raw(self) -> i32 {
        match self {
            IndexKind::Hnsw => 0,
            IndexKind::Flat => 1,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index image from a CSV file of `id,v1,...,vn` rows
    Build {
        /// Input CSV file
        input: PathBuf,
        /// Output directory for the image and its manifest
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value = "hnsw")]
        index: IndexKind,
        /// Distance metric: "l2" or "ip"
        #[arg(long, default_value = "l2")]
        metric: String,
        /// Maximum graph degree (0 picks the engine default)
        #[arg(long, default_value = "16")]
        max_degree: usize,
        #[arg(long, default_value = "200")]
        ef_construction: usize,
        #[arg(long, default_value = "50")]
        ef_search: usize,
        /// Rows handed to the index per add call
        #[arg(long, default_value = "10000")]
        batch_size: usize,
    },
    /// Search an index image
    Search {
        /// Directory written by `build`
        dir: PathBuf,
        /// Query vector as comma-separated values (e.g., "1.0,2.0,3.0")
        query: String,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// Run the query this many times and report latency
        #[arg(long, default_value = "1")]
        repeat: usize,
    },
    /// Print the manifest and live counts of an index image
    Info {
        /// Directory written by `build`
        dir: PathBuf,
    },
}

/// Parse `id,v1,...,vn` rows. Blank lines and `#` comments are skipped.
fn read_rows(path: &Path) -> Result<(Vec<i64>, Vec<Vector>)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut ids = Vec::new();
    let mut vectors = Vec::new();

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, values) = line
            .split_once(',')
            .with_context(|| format!("line {}: expected `id,v1,...,vn`", lineno + 1))?;
        let id: i64 = id
            .trim()
            .parse()
            .with_context(|| format!("line {}: bad id {:?}", lineno + 1, id))?;
        let vector =
            Vector::from_str(values).with_context(|| format!("line {}: bad vector", lineno + 1))?;
        if let Some(first) = vectors.first().map(Vector::dimension) {
            if vector.dimension() != first {
                bail!(
                    "line {}: dimension {} differs from first row ({})",
                    lineno + 1,
                    vector.dimension(),
                    first
                );
            }
        }
        ids.push(id);
        vectors.push(vector);
    }
    Ok((ids, vectors))
}

fn load(dir: &Path, config: AdapterConfig) -> Result<(IndexManifest, VectorIndexHandle)> {
    let manifest = IndexManifest::load(dir)
        .with_context(|| format!("reading manifest in {}", dir.display()))?;
    let mut handle = manifest.new_handle(config)?;
    persistence::deserialize_from_dir(&mut handle, dir)
        .with_context(|| format!("loading image from {}", dir.display()))?;
    Ok((manifest, handle))
}

#[allow(clippy::too_many_arguments)]
fn build(
    config: AdapterConfig,
    input: &Path,
    out: &Path,
    index: IndexKind,
    metric: &str,
    max_degree: usize,
    ef_construction: usize,
    ef_search: usize,
    batch_size: usize,
) -> Result<()> {
    let (ids, vectors) = read_rows(input)?;
    let Some(dimension) = vectors.first().map(Vector::dimension) else {
        bail!("{} contains no rows", input.display());
    };

    let mut handle = VectorIndexHandle::create_with_config(
        index.raw(),
        "float32",
        metric,
        dimension,
        max_degree,
        ef_construction,
        ef_search,
        config,
    )?;

    let started = Instant::now();
    let batch_size = batch_size.max(1);
    for (id_chunk, vec_chunk) in ids.chunks(batch_size).zip(vectors.chunks(batch_size)) {
        let flat: Vec<f32> = vec_chunk
            .iter()
            .flat_map(|v| v.as_slice().iter().copied())
            .collect();
        handle.add(&flat, id_chunk)?;
    }
    // Inputs smaller than the build threshold are still written as a built image.
    handle.build(&[], &[])?;

    let path = persistence::serialize_to_dir(&mut handle, out)?;
    let manifest = IndexManifest::from_handle(&handle)?;
    manifest.save(out)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "build finished");

    println!(
        "Indexed {} vectors (dim {}, {:?}) into {}",
        manifest.vector_count,
        dimension,
        handle.state(),
        path.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ann_adapter=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AdapterConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AdapterConfig::default(),
    };

    match cli.command {
        Commands::Build {
            input,
            out,
            index,
            metric,
            max_degree,
            ef_construction,
            ef_search,
            batch_size,
        } => build(
            config,
            &input,
            &out,
            index,
            &metric,
            max_degree,
            ef_construction,
            ef_search,
            batch_size,
        )?,
        Commands::Search {
            dir,
            query,
            k,
            repeat,
        } => {
            let (_, mut handle) = load(&dir, config)?;
            let q = Vector::from_str(&query)?;
            let mut result = handle.search(q.as_slice(), k)?;
            for _ in 1..repeat {
                result = handle.search(q.as_slice(), k)?;
            }

            if result.is_empty() {
                println!("No results found (index is empty)");
            } else {
                println!("Top {} results:", result.len());
                for (i, (id, distance)) in result.ids.iter().zip(&result.distances).enumerate() {
                    println!("{}. {} (distance: {:.4})", i + 1, id, distance);
                }
            }

            let stats = handle.stats();
            println!(
                "\nLatency over {} searches: avg {:.1}us, p50 {:.1}us, p99 {:.1}us",
                stats.searches(),
                stats.avg_search_latency_us(),
                stats.percentile_search_latency_us(50.0),
                stats.percentile_search_latency_us(99.0)
            );
        }
        Commands::Info { dir } => {
            let (manifest, handle) = load(&dir, config)?;
            println!("Index:        {}", dir.display());
            println!("Type:         {}", manifest.index_type);
            println!("Metric:       {}", manifest.metric);
            println!("Dimension:    {}", manifest.dimension);
            println!("Vectors:      {}", handle.get_index_number()?);
            println!("State:        {:?}", handle.state());
            println!("Written by:   {}", manifest.version);
        }
    }
    Ok(())
}
