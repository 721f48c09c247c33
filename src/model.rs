use tch::{
    Device,
    Kind::{Bool, Float, Int64},
    Tensor,
    nn::{self, Embedding, LayerNorm, Linear, ModuleT, Path, embedding, layer_norm, linear},
};

use crate::{
    config::{Config, Mode},
    error::{GptError, Result},
    loss,
};

/// Additive causal mask of shape `[t, t]`: zero on and below the diagonal,
/// negative infinity wherever the key position is after the query position.
pub fn causal_mask(t: i64, device: Device) -> Tensor {
    let future = Tensor::ones([t, t], (Bool, device)).triu(1);
    Tensor::zeros([t, t], (Float, device)).masked_fill(&future, f64::NEG_INFINITY)
}

#[derive(Debug)]
struct Embeddings {
    token: Embedding,
    position: Embedding,
}

impl Embeddings {
    fn new(vs: &Path, vocab_size: i64, config: &Config) -> Self {
        let dim = config.embedding_dim as i64;
        let token = embedding(vs / "token", vocab_size, dim, Default::default());
        let position = embedding(
            vs / "position",
            config.block_size as i64,
            dim,
            Default::default(),
        );
        Embeddings { token, position }
    }

    /// Takes token ids `[batch, seq_len]` and returns `[batch, seq_len, embedding_dim]`,
    /// the sum of each token's embedding and the embedding of its position.
    fn forward(&self, input: &Tensor) -> Tensor {
        let token_embeds = input.apply(&self.token);
        let seq_length = input.size()[1];
        // [seq_len, embedding_dim], broadcast over the batch.
        let position_embeds =
            Tensor::arange(seq_length, (Int64, input.device())).apply(&self.position);
        token_embeds + position_embeds
    }
}

/// One head of causal self-attention.
///
/// Maps `[batch, seq_len, embedding_dim]` to `[batch, seq_len, head_size]`.
#[derive(Debug)]
pub struct AttentionHead {
    to_kqv: Linear,
    scale: f64,
    dropout: f64,
}

impl AttentionHead {
    pub fn new(vs: &Path, config: &Config) -> Self {
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };
        let to_kqv = linear(
            vs / "kqv",
            config.embedding_dim as i64,
            3 * config.head_size() as i64,
            no_bias,
        );
        AttentionHead {
            to_kqv,
            scale: (config.embedding_dim as f64).powf(-0.5),
            dropout: config.dropout,
        }
    }

    /// Returns the attention weights `[batch, seq_len, seq_len]` and the
    /// weighted values `[batch, seq_len, head_size]`.
    fn attend(&self, xs: &Tensor, train: bool) -> (Tensor, Tensor) {
        let dims = xs.size();
        let (b, t) = (dims[0], dims[1]);
        // [B, T, 3 * head_size] -> [B, T, 3, head_size]
        let kqv = xs.apply(&self.to_kqv).view([b, t, 3, -1]);
        let k = kqv.select(2, 0);
        let q = kqv.select(2, 1);
        let v = kqv.select(2, 2);

        let scores = q.matmul(&k.transpose(-2, -1)) * self.scale;
        let scores = scores + causal_mask(t, xs.device());
        let weights = scores.softmax(-1, Float).dropout(self.dropout, train);
        let out = weights.matmul(&v);
        (weights, out)
    }

    pub fn attention_weights(&self, xs: &Tensor) -> Tensor {
        self.attend(xs, false).0
    }
}

impl ModuleT for AttentionHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.attend(xs, train).1
    }
}

/// Several attention heads over the same input, concatenated and projected
/// back to `embedding_dim`.
#[derive(Debug)]
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    projection: Linear,
    dropout: f64,
}

impl MultiHeadAttention {
    pub fn new(vs: &Path, config: &Config) -> Self {
        let heads_vs = vs / "heads";
        let heads = (0..config.head_count)
            .map(|i| AttentionHead::new(&(&heads_vs / i), config))
            .collect();
        let dim = config.embedding_dim as i64;
        let projection = linear(vs / "projection", dim, dim, Default::default());
        MultiHeadAttention {
            heads,
            projection,
            dropout: config.dropout,
        }
    }

    pub fn attention_weights(&self, xs: &Tensor) -> Vec<Tensor> {
        self.heads
            .iter()
            .map(|head| head.attention_weights(xs))
            .collect()
    }
}

impl ModuleT for MultiHeadAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let outputs: Vec<Tensor> = self
            .heads
            .iter()
            .map(|head| head.forward_t(xs, train))
            .collect();
        // [batch, seq_len, head_size * head_count] == [batch, seq_len, embedding_dim]
        Tensor::cat(&outputs, -1)
            .apply(&self.projection)
            .dropout(self.dropout, train)
    }
}

/// Position-wise two-layer MLP with a 4x hidden expansion.
#[derive(Debug)]
pub struct FeedForward {
    expand: Linear,
    contract: Linear,
    dropout: f64,
}

impl FeedForward {
    pub fn new(vs: &Path, config: &Config) -> Self {
        let dim = config.embedding_dim as i64;
        FeedForward {
            expand: linear(vs / "expand", dim, 4 * dim, Default::default()),
            contract: linear(vs / "contract", 4 * dim, dim, Default::default()),
            dropout: config.dropout,
        }
    }
}

impl ModuleT for FeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.expand)
            .relu()
            .apply(&self.contract)
            .dropout(self.dropout, train)
    }
}

/// Pre-norm residual block: attention, then feed-forward.
#[derive(Debug)]
pub struct Block {
    ln1: LayerNorm,
    attention: MultiHeadAttention,
    ln2: LayerNorm,
    feed_forward: FeedForward,
}

impl Block {
    pub fn new(vs: &Path, config: &Config) -> Self {
        let dim = config.embedding_dim as i64;
        Block {
            ln1: layer_norm(vs / "ln1", vec![dim], Default::default()),
            attention: MultiHeadAttention::new(&(vs / "attention"), config),
            ln2: layer_norm(vs / "ln2", vec![dim], Default::default()),
            feed_forward: FeedForward::new(&(vs / "feed_forward"), config),
        }
    }

    pub fn attention_weights(&self, xs: &Tensor) -> Vec<Tensor> {
        self.attention.attention_weights(&xs.apply(&self.ln1))
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs + self.attention.forward_t(&xs.apply(&self.ln1), train);
        &xs + self.feed_forward.forward_t(&xs.apply(&self.ln2), train)
    }
}

/// Decoder-only character language model.
#[derive(Debug)]
pub struct LanguageModel {
    embeddings: Embeddings,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    block_size: usize,
    vocab_size: i64,
}

impl LanguageModel {
    pub fn new(vs: &Path, vocab_size: usize, config: &Config) -> Self {
        let vocab_size = vocab_size as i64;
        let dim = config.embedding_dim as i64;
        let blocks_vs = vs / "blocks";
        let blocks = (0..config.layer_count)
            .map(|i| Block::new(&(&blocks_vs / i), config))
            .collect();
        LanguageModel {
            embeddings: Embeddings::new(&(vs / "embeddings"), vocab_size, config),
            blocks,
            ln_f: layer_norm(vs / "ln_f", vec![dim], Default::default()),
            lm_head: linear(vs / "lm_head", dim, vocab_size, Default::default()),
            block_size: config.block_size,
            vocab_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab_size(&self) -> i64 {
        self.vocab_size
    }

    fn check_context(&self, idx: &Tensor) -> Result<i64> {
        let (_, t) = idx.size2()?;
        if t > self.block_size as i64 {
            return Err(GptError::ContextTooLong {
                len: t,
                block_size: self.block_size,
            });
        }
        Ok(t)
    }

    /// Logits `[batch, seq_len, vocab_size]` for token ids `[batch, seq_len]`.
    pub fn logits(&self, idx: &Tensor, mode: Mode) -> Result<Tensor> {
        self.check_context(idx)?;
        let train = mode.is_train();
        let xs = self
            .blocks
            .iter()
            .fold(self.embeddings.forward(idx), |xs, block| {
                block.forward_t(&xs, train)
            });
        Ok(xs.apply(&self.ln_f).apply(&self.lm_head))
    }

    fn loss_for(&self, logits: &Tensor, idx: &Tensor, targets: &Tensor) -> Result<Tensor> {
        if targets.size() != idx.size() {
            return Err(GptError::TargetShape {
                inputs: idx.size(),
                targets: targets.size(),
            });
        }
        let predictions = logits.log_softmax(-1, Float);
        Ok(loss::cross_entropy(&predictions, targets))
    }

    /// Runs the model, and if `targets` are given also returns the scalar loss.
    pub fn forward(
        &self,
        idx: &Tensor,
        targets: Option<&Tensor>,
        mode: Mode,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let logits = self.logits(idx, mode)?;
        let loss = targets
            .map(|targets| self.loss_for(&logits, idx, targets))
            .transpose()?;
        Ok((logits, loss))
    }

    pub fn loss(&self, idx: &Tensor, targets: &Tensor, mode: Mode) -> Result<Tensor> {
        let logits = self.logits(idx, mode)?;
        self.loss_for(&logits, idx, targets)
    }

    /// Attention weights of every head in every block, in evaluation mode.
    /// Outer index is the block, inner index the head.
    pub fn attention_weights(&self, idx: &Tensor) -> Result<Vec<Vec<Tensor>>> {
        self.check_context(idx)?;
        let mut xs = self.embeddings.forward(idx);
        let mut maps = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            maps.push(block.attention_weights(&xs));
            xs = block.forward_t(&xs, false);
        }
        Ok(maps)
    }
}
