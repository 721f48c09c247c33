use crate::constants;
use crate::error::{GptError, Result};

/// Hyperparameters for one training and generation run.
///
/// Built once at startup and passed by reference into the dataset, the
/// model and the trainer. Nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub batch_size: usize,
    pub block_size: usize,
    pub embedding_dim: usize,
    pub head_count: usize,
    pub layer_count: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub max_iters: usize,
    pub eval_interval: usize,
    pub eval_iters: usize,
    pub train_split: f64,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: constants::BATCH_SIZE,
            block_size: constants::BLOCK_SIZE,
            embedding_dim: constants::EMBEDDING_DIM,
            head_count: constants::HEADS,
            layer_count: constants::LAYERS,
            dropout: constants::DROPOUT,
            learning_rate: constants::LEARNING_RATE,
            max_iters: constants::MAX_ITERS,
            eval_interval: constants::EVAL_INTERVAL,
            eval_iters: constants::EVAL_ITERS,
            train_split: constants::TRAIN_VALIDATION_SPLIT,
            seed: constants::SEED,
        }
    }
}

impl Config {
    /// Dimension of a single attention head.
    pub fn head_size(&self) -> usize {
        self.embedding_dim / self.head_count
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("batch_size", self.batch_size),
            ("block_size", self.block_size),
            ("embedding_dim", self.embedding_dim),
            ("head_count", self.head_count),
            ("layer_count", self.layer_count),
            ("max_iters", self.max_iters),
            ("eval_interval", self.eval_interval),
            ("eval_iters", self.eval_iters),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(GptError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.embedding_dim % self.head_count != 0 {
            return Err(GptError::InvalidConfig(format!(
                "embedding_dim {} is not divisible by head_count {}",
                self.embedding_dim, self.head_count
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GptError::InvalidConfig(format!(
                "dropout {} must be in [0, 1)",
                self.dropout
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(GptError::InvalidConfig(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }
        if !(self.train_split > 0.0 && self.train_split < 1.0) {
            return Err(GptError::InvalidConfig(format!(
                "train_split {} must be in (0, 1)",
                self.train_split
            )));
        }
        Ok(())
    }
}

/// Whether a forward pass is part of training (dropout active) or evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.head_size(), 48);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let config = Config {
            embedding_dim: 10,
            head_count: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GptError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_sizes_and_bad_dropout() {
        let zero_block = Config {
            block_size: 0,
            ..Default::default()
        };
        assert!(zero_block.validate().is_err());

        let full_dropout = Config {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(full_dropout.validate().is_err());

        let bad_lr = Config {
            learning_rate: f64::NAN,
            ..Default::default()
        };
        assert!(bad_lr.validate().is_err());
    }

    #[test]
    fn test_mode_flag() {
        assert!(Mode::Train.is_train());
        assert!(!Mode::Eval.is_train());
    }
}
