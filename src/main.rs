//! Main module for the ragpipe CLI.
//!
//! Parses the command line, loads the configuration, and runs the requested command.
//!
//! # Examples
//!
//! ```sh
//! ragpipe init
//! ragpipe ingest ./notes
//! ragpipe ask "What does the borrow checker do?"
//! ragpipe ask --documents -k 3 "borrow checker"
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use ragpipe::{
    commands::{Cli, Commands},
    config::{self, EmbeddingConfig, RagPipelineConfig, ResponseMode},
    config_dir, embedding, ingest,
    responder::RetrievalAugmentedResponder,
    vector_store::{Collection, PersistentClient},
};
use std::{error::Error, fs};
use tracing::{debug, info};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Loads configuration and executes the parsed command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        return init();
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };
    debug!("Loading config from: {}", config_path.display());
    let mut rag_config = config::load_config(&config_path.to_string_lossy())?;

    match cli.command {
        Commands::Ask {
            question,
            top_k,
            documents,
        } => {
            if let Some(top_k) = top_k {
                rag_config.top_k = top_k;
            }
            if documents {
                rag_config.response_mode = ResponseMode::Documents;
            }
            let question = question.unwrap_or_else(|| "What is the meaning of life?".to_string());

            let mut responder = RetrievalAugmentedResponder::new(rag_config);
            responder.initialize().await?;
            let answer = responder.respond(&question).await?;
            termimad::print_text(&answer);
            responder.shutdown().await?;
        }
        Commands::Ingest { paths, batch_size } => {
            let embedding_function = embedding::from_config(&rag_config).await?;
            let client = PersistentClient::open(&rag_config.storage_path)?;
            let collection =
                client.get_or_create_collection(&rag_config.collection_name, embedding_function)?;
            let documents = ingest::load_documents(&paths)?;
            ingest::ingest(&collection, documents, batch_size).await?;
            println!("{} documents in `{}`", collection.count().await?, collection.name());
        }
        Commands::Count => {
            let mut responder = RetrievalAugmentedResponder::new(RagPipelineConfig {
                response_mode: ResponseMode::Documents,
                ..rag_config
            });
            responder.initialize().await?;
            println!("{}", responder.document_count().await?);
        }
        Commands::Collections => {
            let client = PersistentClient::open(&rag_config.storage_path)?;
            for name in client.list_collections()? {
                println!("{name}");
            }
        }
        Commands::Init => unreachable!("handled before loading config"),
    }

    Ok(())
}

/// Writes a default `config.yaml` into the config directory, with collections
/// stored under `<config_dir>/chroma_db` and local embeddings.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    info!("Creating config directory: {}", config_dir.display());
    fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.yaml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let config = RagPipelineConfig {
        storage_path: config_dir.join("chroma_db"),
        embedding: EmbeddingConfig::Local {
            model_id: config::DEFAULT_LOCAL_EMBEDDING_MODEL.to_string(),
            revision: "main".to_string(),
        },
        ..RagPipelineConfig::default()
    };
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

