use std::{
    ffi::CString,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use tch::{Device, Kind, Tensor};
use tracing::{info, warn};

use tinygpt::{
    Config, constants,
    dataset::{self, DataSet, Split},
    generate,
    tokenizer::Vocabulary,
    train::Trainer,
};

/// Trains a character-level GPT on a text corpus, then samples from it.
#[derive(Parser, Debug)]
#[command(name = "tinygpt", version)]
struct Cli {
    /// Corpus to train on: a text file, or a directory of text files
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Save the generated text here
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Number of characters to generate after training
    #[arg(long, default_value_t = constants::GENERATED_TOKENS)]
    tokens: usize,
    #[arg(long, default_value_t = constants::BATCH_SIZE)]
    batch_size: usize,
    #[arg(long, default_value_t = constants::BLOCK_SIZE)]
    block_size: usize,
    #[arg(long, default_value_t = constants::EMBEDDING_DIM)]
    embedding_dim: usize,
    #[arg(long, default_value_t = constants::HEADS)]
    heads: usize,
    #[arg(long, default_value_t = constants::LAYERS)]
    layers: usize,
    #[arg(long, default_value_t = constants::DROPOUT)]
    dropout: f64,
    #[arg(long, default_value_t = constants::LEARNING_RATE)]
    learning_rate: f64,
    #[arg(long, default_value_t = constants::MAX_ITERS)]
    max_iters: usize,
    #[arg(long, default_value_t = constants::EVAL_INTERVAL)]
    eval_interval: usize,
    #[arg(long, default_value_t = constants::EVAL_ITERS)]
    eval_iters: usize,
    #[arg(long, default_value_t = constants::SEED)]
    seed: u64,
    /// Shared library to load before probing for CUDA, e.g. libtorch_cuda.so
    #[arg(long, value_name = "PATH")]
    cuda_lib: Option<PathBuf>,
    /// Train on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            batch_size: self.batch_size,
            block_size: self.block_size,
            embedding_dim: self.embedding_dim,
            head_count: self.heads,
            layer_count: self.layers,
            dropout: self.dropout,
            learning_rate: self.learning_rate,
            max_iters: self.max_iters,
            eval_interval: self.eval_interval,
            eval_iters: self.eval_iters,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// libtorch loads its CUDA backend lazily, so `Cuda::is_available` reports
/// false until the library has been opened by hand.
fn preload_cuda(lib: &Path) -> Result<()> {
    let path = CString::new(lib.as_os_str().as_encoded_bytes())
        .context("CUDA library path contains a NUL byte")?;
    let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_LAZY) };
    if handle.is_null() {
        warn!(lib = %lib.display(), "could not dlopen CUDA library");
    }
    Ok(())
}

fn select_device(cli: &Cli) -> Result<Device> {
    if cli.cpu {
        return Ok(Device::Cpu);
    }
    if let Some(lib) = &cli.cuda_lib {
        preload_cuda(lib)?;
    }
    Ok(Device::cuda_if_available())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate()?;
    let device = select_device(&cli)?;
    info!(?device, "selected device");

    let text = dataset::read_corpus(&cli.input)
        .with_context(|| format!("reading corpus from {}", cli.input.display()))?;
    info!("read corpus from {}", cli.input.display());
    let vocab = Vocabulary::from_text(&text);
    info!(
        chars = text.chars().count(),
        vocab_size = vocab.vocab_size(),
        "built vocabulary"
    );
    let data = DataSet::new(&text, &vocab, &config, device)?;
    info!(
        train = data.len(Split::Train),
        validation = data.len(Split::Validation),
        "split corpus"
    );

    let mut trainer = Trainer::new(device, &config, vocab.vocab_size(), data)?;
    info!("imbuing...");
    trainer.train(|report| {
        info!(
            "step {}: train loss {:.4}, val loss {:.4}",
            report.iter, report.train_loss, report.val_loss
        );
    })?;

    println!("-- hark! --");
    let seed = Tensor::zeros([1, 1], (Kind::Int64, device));
    let mut stdout = std::io::stdout();
    let out = generate::generate_text(
        trainer.model(),
        &vocab,
        &seed,
        cli.tokens,
        config.seed,
        |c| {
            // print and flush for a running stream of tokens
            print!("{c}");
            let _ = stdout.flush();
        },
    )?;
    println!("\n-- exeunt. --");

    if let Some(output) = &cli.output {
        std::fs::write(output, format!("{out}\n"))
            .with_context(|| format!("saving output to {}", output.display()))?;
        info!("output saved to {}", output.display());
    }
    Ok(())
}
