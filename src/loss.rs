use tch::{Kind, Tensor};

/// Negative log-likelihood over one-hot targets.
///
/// `log_probs` has shape `[..., C]` and is already log-softmaxed; `targets`
/// holds class ids with the same leading shape. The target tensor carries
/// `-C` at the true class and `0` elsewhere, and the loss is the mean of
/// `log_probs * targets` over all elements. The `-C` cancels the division by
/// `C` in the mean, so the value equals the usual mean cross-entropy.
pub fn cross_entropy(log_probs: &Tensor, targets: &Tensor) -> Tensor {
    let num_classes = *log_probs.size().last().unwrap_or(&1);
    let scaled_one_hot =
        targets.one_hot(num_classes).to_kind(Kind::Float) * (-(num_classes as f64));
    (log_probs * scaled_one_hot).mean(Kind::Float)
}
