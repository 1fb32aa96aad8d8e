use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use datasets::{CorpusSchema, CorpusSource, DatasetProvider, DatasetSplit, HubCorpus, LocalCorpus};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about = "Prepare local sentiment corpora", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SplitArgs {
    /// Corpus root holding `<corpus>/<task>/<split>.{jsonl,tsv,parquet}`
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Read the split from the Hugging Face Hub dataset repo `<corpus>` instead
    #[arg(long)]
    hub: bool,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long, default_value = "main")]
    revision: String,

    #[arg(long, default_value = "glue")]
    corpus: String,

    #[arg(long, default_value = "sst2")]
    task: String,

    #[arg(short, long, default_value = "train")]
    split: String,
}

impl SplitArgs {
    fn provider(&self) -> DatasetProvider<Box<dyn CorpusSource>> {
        let source: Box<dyn CorpusSource> = if self.hub {
            Box::new(HubCorpus::new(self.cache_dir.clone(), self.revision.clone(), CorpusSchema::default()))
        } else {
            Box::new(LocalCorpus::new(&self.data_dir, CorpusSchema::default()))
        };
        DatasetProvider::new(source, &self.corpus, &self.task)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a seeded subset of a split as JSONL
    Sample {
        #[command(flatten)]
        split: SplitArgs,

        #[arg(short = 'n', long)]
        size: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output file, e.g. data/glue/sst2-small/train.jsonl
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print example count and label distribution of a split
    Stats {
        #[command(flatten)]
        split: SplitArgs,
    },
}

/// Writes `split` with the default column names so [`LocalCorpus`] reads it back.
fn write_jsonl(split: &DatasetSplit, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let schema = CorpusSchema::default();
    let mut writer = BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?);
    for (idx, ex) in split.examples().iter().enumerate() {
        let mut record = serde_json::Map::new();
        record.insert(schema.text_field.clone(), ex.text.clone().into());
        record.insert(schema.label_field.clone(), ex.label.index().into());
        record.insert("idx".to_string(), idx.into());
        writeln!(writer, "{}", serde_json::Value::Object(record))?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sample {
            split,
            size,
            seed,
            output,
        } => {
            let subset = split.provider().subset(&split.split, seed, size)?;
            write_jsonl(&subset, &output)?;
            println!("Wrote {} examples to {}", subset.len(), output.display());
        }
        Commands::Stats { split } => {
            let full = split.provider().split(&split.split)?;
            let [negative, positive] = full.label_distribution();
            println!(
                "{}/{} {}: {} examples ({} negative, {} positive)",
                split.corpus,
                split.task,
                split.split,
                full.len(),
                negative,
                positive
            );
        }
    }

    Ok(())
}
