//! A small decoder-only, character-level transformer language model on top
//! of libtorch: vocabulary, batch sampling, the attention/block stack, the
//! training loop and an autoregressive sampler.

pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod generate;
pub mod loss;
pub mod model;
pub mod tokenizer;
pub mod train;

pub use config::{Config, Mode};
pub use error::{GptError, Result};
pub use model::LanguageModel;
pub use tokenizer::Vocabulary;
