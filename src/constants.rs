/// How many independent sequences are processed in parallel.
pub const BATCH_SIZE: usize = 64;
/// The maximum context length for predictions.
pub const BLOCK_SIZE: usize = 128;
/// The number of dimensions in the embedding space.
pub const EMBEDDING_DIM: usize = 192;
/// The number of "heads" (attention passes) per block.
pub const HEADS: usize = 4;
/// Number of transformer blocks.
pub const LAYERS: usize = 4;
/// Dropout probability, applied only while training.
pub const DROPOUT: f64 = 0.2;
/// Fixed AdamW learning rate.
pub const LEARNING_RATE: f64 = 3e-4;
/// Total number of optimizer steps.
pub const MAX_ITERS: usize = 5000;
/// Evaluate both splits every this many steps.
pub const EVAL_INTERVAL: usize = 500;
/// Batches averaged per split at each evaluation.
pub const EVAL_ITERS: usize = 200;

/// The fraction of the corpus used for training; the rest is used for validation.
pub const TRAIN_VALIDATION_SPLIT: f64 = 0.9;

/// Seed for parameter initialisation, batch sampling and generation.
pub const SEED: u64 = 31337;
/// Number of characters generated after training.
pub const GENERATED_TOKENS: usize = 1000;
