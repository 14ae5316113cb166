use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use notso_core::persist::{load_index, save_index, section_sizes};
use notso_core::{build_index, search, Document, SearchConfig, SearchOutcome};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    text: String,
}

#[derive(Parser)]
#[command(name = "notso-indexer")]
#[command(about = "Build, query and inspect a resource-governed TF-IDF index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index file
        #[arg(long)]
        output: String,
    },
    /// Run a query against an index file
    Search {
        /// Query text
        query: String,
        /// Index file
        #[arg(long, default_value = "./index.nsix")]
        index: String,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Print version and section sizes of an index file
    Inspect {
        #[arg(long, default_value = "./index.nsix")]
        index: String,
    },
}

/// Flags layered over an optional JSON config file.
#[derive(Args, Debug, Default)]
struct LimitArgs {
    /// JSON file with search options (flags below override it)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    max_seconds: Option<f64>,
    #[arg(long)]
    max_memory_bytes: Option<u64>,
    #[arg(long)]
    max_query_terms: Option<usize>,
    #[arg(long)]
    max_docs: Option<usize>,
    #[arg(long)]
    term_block_size: Option<usize>,
}

impl LimitArgs {
    fn resolve(&self) -> Result<SearchConfig> {
        let mut cfg = match &self.config {
            Some(path) => SearchConfig::from_json_file(path)
                .with_context(|| format!("reading search config {}", path.display()))?,
            None => SearchConfig::default(),
        };
        if let Some(k) = self.top_k {
            cfg.top_k = k;
        }
        if let Some(v) = self.max_seconds {
            cfg.limits.max_seconds = Some(v);
        }
        if let Some(v) = self.max_memory_bytes {
            cfg.limits.max_memory_bytes = Some(v);
        }
        if let Some(v) = self.max_query_terms {
            cfg.limits.max_query_terms = Some(v);
        }
        if let Some(v) = self.max_docs {
            cfg.limits.max_docs = Some(v);
        }
        if let Some(v) = self.term_block_size {
            cfg.limits = cfg.limits.with_term_block_size(v);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output } => build(&input, &output),
        Commands::Search { query, index, limits } => run_search(&query, &index, &limits),
        Commands::Inspect { index } => inspect(&index),
    }
}

fn build(input: &str, output: &str) -> Result<()> {
    let corpus = load_corpus(Path::new(input))?;
    tracing::info!(num_docs = corpus.len(), input, "ingested documents");
    let index = build_index(corpus)?;
    save_index(Path::new(output), &index)?;
    println!("Indexed {} documents ({} terms) into {}", index.num_docs(), index.num_terms(), output);
    Ok(())
}

fn run_search(query: &str, index_path: &str, args: &LimitArgs) -> Result<()> {
    let cfg = args.resolve()?;
    let index = load_index(Path::new(index_path)).with_context(|| format!("loading index {index_path}"))?;
    let outcome = search(&index, query, cfg.top_k, &cfg.limits);
    print!("{}", render_outcome(&index, &outcome));
    Ok(())
}

fn inspect(index_path: &str) -> Result<()> {
    let bytes = fs::read(index_path).with_context(|| format!("reading {index_path}"))?;
    let (version, sizes) = section_sizes(&bytes)?;
    println!("version: {version}");
    for (section, len) in sizes {
        println!("{section}: {len} bytes");
    }
    let index = notso_core::persist::decode(&bytes)?;
    println!("documents: {}", index.num_docs());
    println!("terms: {}", index.num_terms());
    Ok(())
}

fn render_outcome(index: &notso_core::Index, outcome: &SearchOutcome) -> String {
    let mut out = String::new();
    if outcome.results.is_empty() {
        out.push_str("No results found.\n");
    }
    for (rank, hit) in outcome.results.iter().enumerate() {
        let text = index.document(&hit.doc_id).map(|d| d.text.as_str()).unwrap_or("");
        out.push_str(&format!("{}. {} [{:.4}] {}\n", rank + 1, hit.doc_id, hit.score, text));
    }
    if outcome.is_degraded() {
        out.push_str(&format!(
            "stopped early: {} ({}/{} term blocks scored)\n",
            outcome.stop_reason, outcome.blocks_scored, outcome.blocks_planned
        ));
    }
    out
}

/// Collect documents from a file or a directory of `.json`/`.jsonl` files, in path order.
fn load_corpus(input_path: &Path) -> Result<Vec<Document>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        anyhow::bail!("input path {} does not exist", input_path.display());
    }

    let mut corpus = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut corpus)?;
        } else {
            read_json(&file, &mut corpus)?;
        }
    }
    Ok(corpus)
}

fn read_jsonl(file: &Path, corpus: &mut Vec<Document>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDoc = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        corpus.push(Document::new(doc.id, doc.text));
    }
    Ok(())
}

fn read_json(file: &Path, corpus: &mut Vec<Document>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                let doc: InputDoc = serde_json::from_value(v)?;
                corpus.push(Document::new(doc.id, doc.text));
            }
        }
        serde_json::Value::Object(_) => {
            let doc: InputDoc = serde_json::from_value(json)?;
            corpus.push(Document::new(doc.id, doc.text));
        }
        other => tracing::warn!(file = %file.display(), kind = ?other, "skipping non-document JSON"),
    }
    Ok(())
}
