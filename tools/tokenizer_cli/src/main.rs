use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokenizer::{resolve_pad_token, FixedLengthEncoder, SpecialTokens, BPE};

#[derive(Parser)]
#[command(author, version, about = "Inspect GPT-2 BPE encodings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TokenizerFiles {
    /// Path to vocab.json
    #[arg(long)]
    vocab: PathBuf,

    /// Path to merges.txt
    #[arg(long)]
    merges: PathBuf,
}

impl TokenizerFiles {
    fn load(&self) -> Result<BPE> {
        BPE::from_files(&self.vocab, &self.merges).context("Failed to load tokenizer")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode text, optionally to a fixed length with padding and attention mask
    Encode {
        #[command(flatten)]
        files: TokenizerFiles,

        /// Text to encode
        #[arg(short, long)]
        text: String,

        /// Truncate and right-pad to this many tokens
        #[arg(short, long)]
        max_length: Option<usize>,

        /// Dedicated pad token; the eos token is used when absent
        #[arg(long)]
        pad_token: Option<String>,
    },
    /// Decode IDs back to text
    Decode {
        #[command(flatten)]
        files: TokenizerFiles,

        /// IDs to decode (comma separated)
        #[arg(short, long)]
        ids: String,
    },
}

fn parse_ids(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("Invalid ID {s:?}")))
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            files,
            text,
            max_length,
            pad_token,
        } => {
            let bpe = files.load()?;
            match max_length {
                None => println!("{}", serde_json::json!({ "input_ids": bpe.encode(&text) })),
                Some(max_length) => {
                    let special = SpecialTokens {
                        pad_token,
                        ..SpecialTokens::default()
                    };
                    let pad = resolve_pad_token(&bpe, &special)?;
                    let encoder = FixedLengthEncoder::new(&bpe, max_length, pad)?;
                    let enc = encoder.encode(&text);
                    log::info!("{} of {} positions are real tokens", enc.real_length(), max_length);
                    println!(
                        "{}",
                        serde_json::json!({
                            "input_ids": enc.input_ids,
                            "attention_mask": enc.attention_mask,
                        })
                    );
                }
            }
        }
        Commands::Decode { files, ids } => {
            let bpe = files.load()?;
            let ids = parse_ids(&ids)?;
            println!("{}", bpe.decode(&ids));
        }
    }

    Ok(())
}
