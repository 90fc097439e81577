use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m3twitter::config::Config;
use m3twitter::id_index::IdNameIndex;
use m3twitter::images::HttpImageFetcher;
use m3twitter::inference::HttpInferenceEngine;
use m3twitter::lang::WhatlangDetector;
use m3twitter::models::InferenceOutput;
use m3twitter::normalizer::NormalizeOptions;
use m3twitter::pipeline::{load_raw_records, M3Twitter};

#[derive(Parser, Debug)]
#[command(name = "m3twitter", about = "Infer age, gender and organization status of Twitter users")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Infer attributes for a screen name
    ScreenName {
        /// Screen name, with or without the leading @
        screen_name: String,
        /// Ignore cached results and query Twitter again
        #[arg(long)]
        skip_cache: bool,
        /// key = value file with api_key, api_secret, access_token, access_secret
        #[arg(long, env = "TWITTER_AUTH_FILE")]
        auth_file: Option<PathBuf>,
    },
    /// Infer attributes for a numeric user id
    Id {
        id: String,
        #[arg(long)]
        skip_cache: bool,
        #[arg(long, env = "TWITTER_AUTH_FILE")]
        auth_file: Option<PathBuf>,
    },
    /// Infer attributes for stored user objects and write one file per user
    Batch {
        /// Directory of user object JSON files
        #[arg(long)]
        input_dir: PathBuf,
        /// Stop after this many users
        #[arg(long)]
        limit: Option<usize>,
        /// JSON mapping of name to user id (overrides M3_ID2NAME_PATH)
        #[arg(long)]
        id2name: Option<PathBuf>,
    },
    /// Convert a JSONL file of tweets or users into canonical records
    Transform {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        img_path_key: Option<String>,
        #[arg(long)]
        lang_key: Option<String>,
        /// Use images under --img-path-key as they are
        #[arg(long)]
        no_resize: bool,
        #[arg(long)]
        keep_full_size: bool,
    },
}

fn build_pipeline(config: Config) -> anyhow::Result<M3Twitter> {
    // Transform never reaches the engine, so a placeholder URL is enough there
    let inference_url = config
        .inference_url
        .clone()
        .unwrap_or_else(|| "http://127.0.0.1:8000".to_string());
    let engine = HttpInferenceEngine::new(inference_url)?;
    let fetcher = HttpImageFetcher::new()?;

    let mut pipeline = M3Twitter::new(
        config.clone(),
        Arc::new(engine),
        Arc::new(fetcher),
        Arc::new(WhatlangDetector),
    )?;
    if let Some(credentials) = config.credentials {
        pipeline.twitter_init(credentials)?;
    }
    Ok(pipeline)
}

fn print_output(output: Option<InferenceOutput>) -> anyhow::Result<()> {
    match output {
        Some(output) => {
            tracing::info!("{}: {}", output.input.screen_name, output.output.summary());
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        None => {
            tracing::warn!("No result; see log above");
            println!("null");
        }
    }
    Ok(())
}

fn require_inference(config: &Config) -> anyhow::Result<()> {
    if config.inference_url.is_none() {
        anyhow::bail!("M3_INFERENCE_URL environment variable required");
    }
    Ok(())
}

/// Main entry point: initializes tracing and configuration, builds the
/// pipeline context and runs the requested command.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "m3twitter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Command::ScreenName {
            screen_name,
            skip_cache,
            auth_file,
        } => {
            require_inference(&config)?;
            let mut pipeline = build_pipeline(config)?;
            if let Some(path) = auth_file {
                pipeline.twitter_init_from_file(&path)?;
            }
            print_output(pipeline.infer_screen_name(&screen_name, skip_cache).await?)?;
        }
        Command::Id {
            id,
            skip_cache,
            auth_file,
        } => {
            require_inference(&config)?;
            let mut pipeline = build_pipeline(config)?;
            if let Some(path) = auth_file {
                pipeline.twitter_init_from_file(&path)?;
            }
            print_output(pipeline.infer_id(&id, skip_cache).await?)?;
        }
        Command::Batch {
            input_dir,
            limit,
            id2name,
        } => {
            require_inference(&config)?;
            let index_path = id2name
                .or_else(|| config.id2name_path.clone())
                .context("An id-to-name index is required: pass --id2name or set M3_ID2NAME_PATH")?;
            let id_index = IdNameIndex::load(&index_path)?;
            let pipeline = build_pipeline(config)?.with_id_index(id_index);

            let raw_records = load_raw_records(&input_dir, limit)?;
            let report = pipeline.process_batch(&raw_records).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Transform {
            input,
            output,
            img_path_key,
            lang_key,
            no_resize,
            keep_full_size,
        } => {
            let pipeline = build_pipeline(config)?;
            let opts = NormalizeOptions {
                img_path_key,
                lang_key,
                resize_img: !no_resize,
                keep_full_size_img: keep_full_size,
            };
            let written = pipeline.transform_jsonl(&input, &output, &opts).await?;
            println!("{} records written to {}", written, output.display());
        }
    }

    Ok(())
}
