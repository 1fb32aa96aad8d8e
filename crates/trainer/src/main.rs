use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use trainer::pipeline::{self, DeviceChoice, PipelineConfig};

/// Compare GPT-2 sentiment accuracy before and after LoRA fine-tuning.
#[derive(Parser)]
#[command(name = "lora-finetune", version)]
struct Args {
    /// Pipeline configuration (YAML)
    #[arg(short, long, default_value = "configs/pipeline.yaml")]
    config: PathBuf,

    /// Overrides the device from the configuration
    #[arg(short, long, value_enum)]
    device: Option<DeviceChoice>,

    /// Evaluate the trained model before saving and check the reloaded adapter against it
    #[arg(long)]
    verify_reload: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_file(&args.config)?;
    if let Some(device) = args.device {
        config.device = device;
    }
    config.verify_reload |= args.verify_reload;

    let report = pipeline::run(&config)?;
    println!("{report}");
    Ok(())
}
