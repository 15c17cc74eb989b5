use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bytebpe::BpeTokenizer;

/// Byte-level BPE tokenizer: train models, encode text, decode IDs.
#[derive(Parser)]
#[command(name = "bytebpe", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a tokenizer on a corpus file and save the model.
    Train {
        /// Corpus to learn from.
        corpus_path: PathBuf,
        /// Where to write the trained model.
        model_path: PathBuf,
        /// Target vocabulary size (at least 256).
        vocab_size: u32,
        /// Minimum pair frequency for a merge.
        #[arg(default_value_t = 2)]
        min_freq: u32,
    },
    /// Encode text into space-separated token IDs.
    Encode {
        /// Trained model to use.
        model_path: PathBuf,
        /// Text to encode.
        text: String,
    },
    /// Decode token IDs back into bytes on stdout.
    Decode {
        /// Trained model to use.
        model_path: PathBuf,
        /// Token IDs to decode.
        ids: Vec<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            corpus_path,
            model_path,
            vocab_size,
            min_freq,
        } => {
            let corpus = std::fs::read(&corpus_path)
                .with_context(|| format!("failed to read corpus {}", corpus_path.display()))?;
            let mut tokenizer = BpeTokenizer::new();
            tokenizer.train(&corpus, vocab_size, min_freq)?;
            tokenizer
                .save(&model_path)
                .with_context(|| format!("failed to write model {}", model_path.display()))?;
            println!("Done.");
        }

        Command::Encode { model_path, text } => {
            let tokenizer = load_model(&model_path)?;
            let ids = tokenizer.encode(&text);
            println!(
                "{}",
                ids.iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
        }

        Command::Decode { model_path, ids } => {
            let tokenizer = load_model(&model_path)?;
            let bytes = tokenizer.decode(&ids)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.write_all(b"\n")?;
        }
    }

    Ok(())
}

fn load_model(path: &Path) -> Result<BpeTokenizer> {
    BpeTokenizer::load(path).with_context(|| format!("failed to load model {}", path.display()))
}
