use rand::{SeedableRng, rngs::StdRng};
use tch::{
    Device,
    nn::{AdamW, Optimizer, OptimizerConfig, VarStore},
};
use tracing::{debug, info};

use crate::{
    config::{Config, Mode},
    dataset::{DataSet, Split},
    error::Result,
    model::LanguageModel,
};

/// Losses on both splits at one evaluation checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub iter: usize,
    pub train_loss: f64,
    pub val_loss: f64,
}

pub struct Trainer {
    // Owns every parameter of `model`.
    var_store: VarStore,
    model: LanguageModel,
    optimizer: Optimizer,
    dataset: DataSet,
    config: Config,
    rng: StdRng,
}

impl Trainer {
    pub fn new(
        device: Device,
        config: &Config,
        vocab_size: usize,
        dataset: DataSet,
    ) -> Result<Trainer> {
        config.validate()?;
        tch::manual_seed(config.seed as i64);
        let var_store = VarStore::new(device);
        let model = LanguageModel::new(&var_store.root(), vocab_size, config);
        let optimizer = AdamW::default().build(&var_store, config.learning_rate)?;
        let trainer = Trainer {
            var_store,
            model,
            optimizer,
            dataset,
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.seed),
        };
        info!(
            "{:.6} M parameters",
            trainer.parameter_count() as f64 / 1e6
        );
        Ok(trainer)
    }

    pub fn parameter_count(&self) -> usize {
        self.var_store
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    /// Runs exactly `max_iters` optimizer steps. Every `eval_interval` steps,
    /// and on the last one, both splits are evaluated and `on_eval` is called
    /// with the result. Returns every report in order.
    pub fn train<F: FnMut(&EvalReport)>(&mut self, mut on_eval: F) -> Result<Vec<EvalReport>> {
        let max_iters = self.config.max_iters;
        let mut reports = Vec::new();
        info!(max_iters, "training");
        for iter in 0..max_iters {
            if iter % self.config.eval_interval == 0 || iter == max_iters - 1 {
                let (train_loss, val_loss) = self.estimate_loss()?;
                let report = EvalReport {
                    iter,
                    train_loss,
                    val_loss,
                };
                debug!(?report, "evaluated");
                on_eval(&report);
                reports.push(report);
            }
            let loss = self.train_step()?;
            debug!(iter, loss, "step");
        }
        info!("training finished");
        Ok(reports)
    }

    /// Mean loss over `eval_iters` batches of each split, without dropout or gradients.
    pub fn estimate_loss(&mut self) -> Result<(f64, f64)> {
        let train = self.split_loss(Split::Train)?;
        let validation = self.split_loss(Split::Validation)?;
        Ok((train, validation))
    }

    fn split_loss(&mut self, split: Split) -> Result<f64> {
        let eval_iters = self.config.eval_iters;
        tch::no_grad(|| -> Result<f64> {
            let mut total = 0.0;
            for _ in 0..eval_iters {
                let (input, target) = self.dataset.get_batch(split, &mut self.rng);
                let loss = self.model.loss(&input, &target, Mode::Eval)?;
                total += f64::try_from(&loss)?;
            }
            Ok(total / eval_iters as f64)
        })
    }

    // Perform one training step.
    fn train_step(&mut self) -> Result<f64> {
        let (input, target) = self.dataset.get_batch(Split::Train, &mut self.rng);
        let loss = self.model.loss(&input, &target, Mode::Train)?;
        // zero grads, backprop, apply the AdamW update
        self.optimizer.backward_step(&loss);
        Ok(f64::try_from(&loss)?)
    }
}
