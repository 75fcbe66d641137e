//! rag-eval CLI - load an embedding model and run it on the command line.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use rag_eval_core::{
    corpus_texts, EvalConfig, HubType, LoadRequest, Options, PoolingMode, ScoringInput, TextUnit,
};
use rag_eval_embed::{load_model, LoadedModel};

/// rag-eval - Embedding and re-ranking models for RAG evaluation
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/rag-eval/config.toml, then ./rag-eval.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the `[embedding]` config section.
#[derive(clap::Args, Default)]
struct ModelArgs {
    /// Local model directory or hub model id
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Remote embedding model name (selects the API adapter)
    #[arg(long, global = true)]
    model_name: Option<String>,

    /// Load the model as a cross-encoder
    #[arg(long, global = true)]
    cross_encoder: bool,

    /// Model hub for missing local models (modelscope, huggingface)
    #[arg(long, global = true)]
    hub: Option<HubType>,

    /// Model revision
    #[arg(long, global = true)]
    revision: Option<String>,

    /// API base URL for remote models
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Output dimensionality for remote models
    #[arg(long, global = true)]
    dimensions: Option<usize>,

    /// Maximum tokens per input
    #[arg(long, global = true)]
    max_seq_length: Option<usize>,

    /// Prompt prepended to queries
    #[arg(long, global = true)]
    prompt: Option<String>,

    /// Pooling mode override for bi-encoders
    #[arg(long, global = true)]
    pooling: Option<PoolingMode>,

    /// Encode batch size
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed texts and print the vectors as JSON
    Embed {
        /// Texts to embed
        texts: Vec<String>,

        /// Read texts from a JSONL file (strings or {"title", "text"} records)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Encode as queries (applies the prompt)
        #[arg(short, long)]
        query: bool,
    },

    /// Score documents against a query with a cross-encoder
    Score {
        /// Query text
        query: String,

        /// Documents to score
        documents: Vec<String>,

        /// Read documents from a JSONL file (strings or {"title", "text"} records)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show which adapter the configuration selects
    Info,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(path: Option<&Path>) -> rag_eval_core::Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path),
        None => EvalConfig::load_default(),
    }
}

/// Apply command-line overrides to the configured request.
fn build_request(mut request: LoadRequest, args: ModelArgs) -> LoadRequest {
    if let Some(model) = args.model {
        request.model_name_or_path = model;
    }
    if args.model_name.is_some() {
        request.options.model_name = args.model_name;
    }
    if args.cross_encoder {
        request.is_cross_encoder = true;
    }
    if let Some(hub) = args.hub {
        request.hub = hub;
    }
    if args.revision.is_some() {
        request.revision = args.revision;
    }
    if args.api_base.is_some() {
        request.options.api_base = args.api_base;
    }
    if args.dimensions.is_some() {
        request.options.dimensions = args.dimensions;
    }
    if let Some(max_seq_length) = args.max_seq_length {
        request.options.max_seq_length = max_seq_length;
    }
    if let Some(prompt) = args.prompt {
        request.options.prompt = prompt;
    }
    if args.pooling.is_some() {
        request.options.pooling_mode = args.pooling;
    }
    if let Some(batch_size) = args.batch_size {
        request
            .options
            .encode_kwargs
            .insert(rag_eval_core::options::BATCH_SIZE, batch_size as u64);
    }
    request
}

/// Positional texts followed by the records in `input`.
///
/// Each non-empty line of `input` is a JSON record (`"text"` or
/// `{"title": ..., "text": ...}`); lines that are not JSON are taken verbatim.
fn collect_units(texts: Vec<String>, input: Option<&Path>) -> Result<Vec<TextUnit>, std::io::Error> {
    let mut units: Vec<TextUnit> = texts.into_iter().map(TextUnit::PlainText).collect();
    if let Some(path) = input {
        let content = fs::read_to_string(path)?;
        units.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str::<TextUnit>(line)
                        .unwrap_or_else(|_| TextUnit::PlainText(line.to_string()))
                }),
        );
    }
    Ok(units)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let request = build_request(config.embedding, cli.model);

    match cli.command {
        Commands::Embed {
            texts,
            input,
            query,
        } => {
            let units = collect_units(texts, input.as_deref())?;
            if units.is_empty() {
                eprintln!("Error: no texts to embed");
                std::process::exit(1);
            }
            let model = load_model(&request)?;
            embed(&model, &units, query)?;
        }
        Commands::Score {
            query,
            documents,
            input,
        } => {
            let documents = collect_units(documents, input.as_deref())?;
            let model = load_model(&request)?;
            score(&model, &query, documents)?;
        }
        Commands::Info => {
            let model = load_model(&request)?;
            info(&model)?;
        }
    }

    Ok(())
}

fn embed(model: &LoadedModel, units: &[TextUnit], query: bool) -> Result<(), Box<dyn std::error::Error>> {
    let model = model.as_embedding_model();
    let embeddings = if query {
        model.encode_queries(&corpus_texts(units), &Options::new())?
    } else {
        model.encode_corpus(units, &Options::new())?
    };

    let vectors = rag_eval_core::tensor::rows_to_vecs(&embeddings);
    println!("{}", serde_json::to_string(&vectors)?);
    Ok(())
}

fn score(
    model: &LoadedModel,
    query: &str,
    documents: Vec<TextUnit>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(cross_encoder) = model.as_cross_encoder() else {
        eprintln!(
            "Error: scoring needs a cross-encoder, but the configuration selects {}. Pass --cross-encoder.",
            model.kind()
        );
        std::process::exit(1);
    };

    let inputs: Vec<ScoringInput> = documents
        .into_iter()
        .map(|doc| ScoringInput::Retrieval(query.to_string(), doc, String::new()))
        .collect();

    let scores = cross_encoder.predict(&inputs, &Options::new())?;
    println!("{}", serde_json::to_string(&scores.to_vec())?);
    Ok(())
}

fn info(model: &LoadedModel) -> Result<(), Box<dyn std::error::Error>> {
    let contract = model.as_embedding_model();
    let settings = contract.settings();
    let report = serde_json::json!({
        "adapter": model.kind(),
        "meta": contract.meta(),
        "identifier": settings.identifier,
        "max_seq_length": settings.max_seq_length,
        "prompt": settings.prompt,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
