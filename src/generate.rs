use rand::{
    SeedableRng,
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
};
use tch::{Device, Kind::Float, Tensor};

use crate::{
    config::Mode,
    error::{GptError, Result},
    model::LanguageModel,
    tokenizer::Vocabulary,
};

/// Keeps only the last `block_size` positions of a `[batch, len]` context.
pub fn trim_context(context: &Tensor, block_size: usize) -> Tensor {
    let len = context.size()[1];
    let block = block_size as i64;
    if len > block {
        context.narrow(1, len - block, block)
    } else {
        context.shallow_clone()
    }
}

/// Draws one token per row of a `[batch, vocab_size]` probability tensor.
fn sample(probs: &Tensor, rng: &mut StdRng) -> Result<Vec<i64>> {
    let probs = probs.to_device(Device::Cpu);
    let rows = probs.size()[0];
    let mut tokens = Vec::with_capacity(rows as usize);
    for row in 0..rows {
        let weights = Vec::<f32>::try_from(&probs.get(row))?;
        let distribution =
            WeightedIndex::new(&weights).map_err(|e| GptError::Sampling(e.to_string()))?;
        tokens.push(distribution.sample(rng) as i64);
    }
    Ok(tokens)
}

impl LanguageModel {
    /// Autoregressively samples `n_tokens` new tokens after `seed` (`[batch, len]`).
    ///
    /// The returned iterator yields one token per batch row at each step and
    /// stops after exactly `n_tokens` steps. Gradient tracking is disabled for
    /// as long as it is alive.
    pub fn generate(&self, seed: &Tensor, n_tokens: usize, rng_seed: u64) -> Generation<'_> {
        Generation {
            _no_grad_guard: tch::no_grad_guard(),
            model: self,
            context: trim_context(seed, self.block_size()),
            remaining: n_tokens,
            rng: StdRng::seed_from_u64(rng_seed),
        }
    }
}

pub struct Generation<'a> {
    _no_grad_guard: tch::NoGradGuard,
    model: &'a LanguageModel,
    context: Tensor,
    remaining: usize,
    rng: StdRng,
}

impl Generation<'_> {
    /// The current context window, at most `block_size` tokens long.
    pub fn context(&self) -> &Tensor {
        &self.context
    }

    fn step(&mut self) -> Result<Vec<i64>> {
        let block_size = self.model.block_size();
        let window = trim_context(&self.context, block_size);
        let logits = self.model.logits(&window, Mode::Eval)?;
        // Only the final position predicts the next token: [batch, vocab_size]
        let probs = logits.select(1, -1).softmax(-1, Float);
        let next = sample(&probs, &mut self.rng)?;
        let next_tensor = Tensor::from_slice(&next)
            .view([-1, 1])
            .to_device(self.context.device());
        self.context = trim_context(&Tensor::cat(&[&self.context, &next_tensor], 1), block_size);
        Ok(next)
    }
}

impl Iterator for Generation<'_> {
    type Item = Result<Vec<i64>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let step = self.step();
        if step.is_err() {
            self.remaining = 0;
        }
        Some(step)
    }
}

/// Generates `n_tokens` characters, handing each one of the first batch row to
/// `on_char` as soon as it is sampled, and returns the whole text.
pub fn generate_text<F: FnMut(char)>(
    model: &LanguageModel,
    vocab: &Vocabulary,
    seed: &Tensor,
    n_tokens: usize,
    rng_seed: u64,
    mut on_char: F,
) -> Result<String> {
    let mut out = String::with_capacity(n_tokens);
    for tokens in model.generate(seed, n_tokens, rng_seed) {
        let c = vocab.decode_token(tokens?[0])?;
        on_char(c);
        out.push(c);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tch::{Kind::Int64, nn::VarStore};

    fn test_model(vs: &VarStore, vocab_size: usize) -> LanguageModel {
        let config = Config {
            block_size: 8,
            embedding_dim: 16,
            head_count: 2,
            layer_count: 2,
            ..Default::default()
        };
        LanguageModel::new(&vs.root(), vocab_size, &config)
    }

    #[test]
    fn test_trim_context() {
        let context = Tensor::arange(10, (Int64, Device::Cpu)).view([1, 10]);
        let trimmed = trim_context(&context, 4);
        assert_eq!(Vec::<i64>::try_from(&trimmed.view([-1])).unwrap(), vec![6, 7, 8, 9]);
        let short = trim_context(&context.narrow(1, 0, 3), 4);
        assert_eq!(short.size(), &[1, 3]);
    }

    #[test]
    fn test_untrained_model_generates_exact_count() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let model = test_model(&vs, 5);
        let seed = Tensor::zeros([1, 1], (Int64, Device::Cpu));
        let tokens: Vec<Vec<i64>> = model.generate(&seed, 10, 0).collect::<Result<_>>()?;
        assert_eq!(tokens.len(), 10);
        for step in &tokens {
            assert_eq!(step.len(), 1);
            assert!((0..5).contains(&step[0]));
        }
        Ok(())
    }

    #[test]
    fn test_rows_sampled_independently_and_context_bounded() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let model = test_model(&vs, 5);
        let seed = Tensor::zeros([3, 2], (Int64, Device::Cpu));
        let mut generation = model.generate(&seed, 20, 1);
        let mut steps = 0;
        while let Some(tokens) = generation.next() {
            assert_eq!(tokens?.len(), 3);
            assert!(generation.context().size()[1] <= 8);
            steps += 1;
        }
        assert_eq!(steps, 20);
        assert_eq!(generation.context().size(), &[3, 8]);
        Ok(())
    }

    #[test]
    fn test_long_seed_is_trimmed() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let model = test_model(&vs, 5);
        let seed = Tensor::zeros([1, 30], (Int64, Device::Cpu));
        let tokens: Vec<Vec<i64>> = model.generate(&seed, 3, 0).collect::<Result<_>>()?;
        assert_eq!(tokens.len(), 3);
        Ok(())
    }

    #[test]
    fn test_generation_reproducible_with_seed() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let vocab = Vocabulary::from_text("abcde");
        let model = test_model(&vs, vocab.vocab_size());
        let seed = Tensor::zeros([1, 1], (Int64, Device::Cpu));
        let a = generate_text(&model, &vocab, &seed, 40, 7, |_| {})?;
        let b = generate_text(&model, &vocab, &seed, 40, 7, |_| {})?;
        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 40);
        Ok(())
    }

    #[test]
    fn test_generate_text_streams_every_character() -> Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let vocab = Vocabulary::from_text("xyz");
        let model = test_model(&vs, vocab.vocab_size());
        let seed = Tensor::zeros([1, 1], (Int64, Device::Cpu));
        let mut streamed = String::new();
        let out = generate_text(&model, &vocab, &seed, 12, 3, |c| streamed.push(c))?;
        assert_eq!(out, streamed);
        Ok(())
    }

    #[test]
    fn test_degenerate_distribution_is_an_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let probs = Tensor::from_slice(&[f32::NAN, 0.5, 0.5]).view([1, 3]);
        assert!(matches!(sample(&probs, &mut rng), Err(GptError::Sampling(_))));
        let zeros = Tensor::zeros([1, 3], (Float, Device::Cpu));
        assert!(matches!(sample(&zeros, &mut rng), Err(GptError::Sampling(_))));
    }

    #[test]
    fn test_sample_follows_one_hot_distribution() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let probs = Tensor::from_slice(&[0.0f32, 0.0, 1.0, 1.0, 0.0, 0.0]).view([2, 3]);
        assert_eq!(sample(&probs, &mut rng)?, vec![2, 0]);
        Ok(())
    }
}
