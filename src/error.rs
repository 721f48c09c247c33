use thiserror::Error;

#[derive(Error, Debug)]
pub enum GptError {
    #[error("character {0:?} is not in the vocabulary")]
    UnknownCharacter(char),

    #[error("token {0} is outside the vocabulary")]
    UnknownToken(i64),

    #[error("context of {len} tokens exceeds block size {block_size}")]
    ContextTooLong { len: i64, block_size: usize },

    #[error("targets {targets:?} do not match inputs {inputs:?}")]
    TargetShape { inputs: Vec<i64>, targets: Vec<i64> },

    #[error("corpus split of {len} tokens is too short for block size {block_size}")]
    CorpusTooShort { len: usize, block_size: usize },

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sampling failed: {0}")]
    Sampling(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, GptError>;
