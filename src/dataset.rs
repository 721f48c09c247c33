use std::path::Path;

use rand::Rng;
use tch::{Device, Kind, Tensor};
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    config::Config,
    error::{GptError, Result},
    tokenizer::Vocabulary,
};

/// Reads the training corpus from a single file, or from every file under a
/// directory (recursively, in sorted path order) concatenated together.
pub fn read_corpus(path: &Path) -> Result<String> {
    let text = if path.is_dir() {
        let mut text = String::new();
        let entries = WalkDir::new(path).sort_by_file_name();
        for entry in entries {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                text.push_str(&std::fs::read_to_string(entry.path())?);
            }
        }
        text
    } else {
        std::fs::read_to_string(path)?
    };
    if text.is_empty() {
        return Err(GptError::EmptyCorpus);
    }
    Ok(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
}

/// The encoded corpus, split once into a training prefix and a validation suffix.
#[derive(Debug)]
pub struct DataSet {
    training: Tensor,
    validation: Tensor,
    batch_size: usize,
    block_size: usize,
}

impl DataSet {
    pub fn new(text: &str, vocab: &Vocabulary, config: &Config, device: Device) -> Result<Self> {
        let tokens = vocab.encode(text)?;
        if tokens.is_empty() {
            return Err(GptError::EmptyCorpus);
        }
        let n = (config.train_split * tokens.len() as f64) as usize;
        let (training, validation) = tokens.split_at(n);
        for split in [training, validation] {
            if split.len() <= config.block_size {
                return Err(GptError::CorpusTooShort {
                    len: split.len(),
                    block_size: config.block_size,
                });
            }
        }
        debug!(
            tokens = tokens.len(),
            training = training.len(),
            validation = validation.len(),
            "encoded corpus"
        );
        Ok(DataSet {
            training: Tensor::from_slice(training).to_device(device),
            validation: Tensor::from_slice(validation).to_device(device),
            batch_size: config.batch_size,
            block_size: config.block_size,
        })
    }

    pub fn len(&self, split: Split) -> usize {
        self.data(split).size()[0] as usize
    }

    fn data(&self, split: Split) -> &Tensor {
        match split {
            Split::Train => &self.training,
            Split::Validation => &self.validation,
        }
    }

    /// Draws one `(inputs, targets)` batch from the given split.
    pub fn get_batch<R: Rng>(&self, split: Split, rng: &mut R) -> (Tensor, Tensor) {
        sample_batch(self.data(split), self.batch_size, self.block_size, rng)
    }
}

/// Samples `batch_size` windows of `block_size` tokens starting at uniform
/// offsets in `[0, len - block_size)`. Targets are the same windows shifted
/// one token to the right. Both tensors are `[batch_size, block_size]`.
pub fn sample_batch<R: Rng>(
    data: &Tensor,
    batch_size: usize,
    block_size: usize,
    rng: &mut R,
) -> (Tensor, Tensor) {
    let len = data.size()[0];
    let block = block_size as i64;
    let offsets: Vec<i64> = (0..batch_size).map(|_| rng.gen_range(0..len - block)).collect();
    let inputs: Vec<Tensor> = offsets.iter().map(|&i| data.narrow(0, i, block)).collect();
    let targets: Vec<Tensor> = offsets
        .iter()
        .map(|&i| data.narrow(0, i + 1, block))
        .collect();
    (
        Tensor::stack(&inputs, 0).to_kind(Kind::Int64),
        Tensor::stack(&targets, 0).to_kind(Kind::Int64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::io::Write;

    fn small_config() -> Config {
        Config {
            batch_size: 4,
            block_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_batch_shape_and_shift() {
        // Token values equal their positions, so windows can be checked directly.
        let data = Tensor::arange(1000, (Kind::Int64, Device::Cpu));
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let (x, y) = sample_batch(&data, 8, 16, &mut rng);
            assert_eq!(x.size(), &[8, 16]);
            assert_eq!(y.size(), &[8, 16]);
            let shifted = &x + 1;
            assert!(y.equal(&shifted), "targets must be inputs shifted by one");
            let min = i64::try_from(&x.min()).unwrap();
            let max = i64::try_from(&y.max()).unwrap();
            assert!(min >= 0);
            assert!(max <= 999);
            for row in 0..8 {
                let window = Vec::<i64>::try_from(&x.get(row)).unwrap();
                assert!(window.windows(2).all(|w| w[1] == w[0] + 1));
            }
        }
    }

    #[test]
    fn test_batches_reproducible_with_seed() {
        let data = Tensor::arange(500, (Kind::Int64, Device::Cpu));
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        for _ in 0..5 {
            let (xa, ya) = sample_batch(&data, 8, 16, &mut rng_a);
            let (xb, yb) = sample_batch(&data, 8, 16, &mut rng_b);
            assert!(xa.equal(&xb));
            assert!(ya.equal(&yb));
        }
    }

    #[test]
    fn test_train_val_split() -> Result<()> {
        let text = "abcdefghij".repeat(20);
        let vocab = Vocabulary::from_text(&text);
        let ds = DataSet::new(&text, &vocab, &small_config(), Device::Cpu)?;
        assert_eq!(ds.len(Split::Train), 180);
        assert_eq!(ds.len(Split::Validation), 20);
        let mut rng = StdRng::seed_from_u64(1);
        let (x, y) = ds.get_batch(Split::Validation, &mut rng);
        assert_eq!(x.size(), &[4, 8]);
        assert_eq!(y.size(), &[4, 8]);
        Ok(())
    }

    #[test]
    fn test_corpus_too_short() {
        let text = "abcdefghij".repeat(5);
        let vocab = Vocabulary::from_text(&text);
        let result = DataSet::new(&text, &vocab, &small_config(), Device::Cpu);
        assert!(matches!(result, Err(GptError::CorpusTooShort { len: 5, .. })));
    }

    #[test]
    fn test_read_corpus_file_and_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested)?;
        let mut a = std::fs::File::create(dir.path().join("a.txt"))?;
        write!(a, "to be ")?;
        let mut b = std::fs::File::create(nested.join("b.txt"))?;
        write!(b, "or not")?;

        assert_eq!(read_corpus(&dir.path().join("a.txt"))?, "to be ");
        assert_eq!(read_corpus(dir.path())?, "to be or not");
        Ok(())
    }

    #[test]
    fn test_read_corpus_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(read_corpus(dir.path()), Err(GptError::EmptyCorpus)));
        Ok(())
    }
}
