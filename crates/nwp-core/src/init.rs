use tch::{nn, Tensor};

/// Fan-in and fan-out of a weight tensor, counting the receptive field for
/// tensors with more than two dimensions.
fn fans(size: &[i64]) -> (f64, f64) {
    let receptive: i64 = size[2..].iter().product();
    let fan_in = size[1] * receptive;
    let fan_out = size[0] * receptive;
    (fan_in as f64, fan_out as f64)
}

fn xavier_uniform_(var: &mut Tensor) {
    let (fan_in, fan_out) = fans(&var.size());
    let bound = (6.0 / (fan_in + fan_out)).sqrt();
    let _ = var.uniform_(-bound, bound);
}

/// Re-draws every variable: xavier-uniform for matrices and higher, standard
/// normal for biases and other vectors.
pub fn reset_parameters(vs: &nn::VarStore) {
    tch::no_grad(|| {
        for (_, mut var) in vs.variables() {
            if var.dim() > 1 {
                xavier_uniform_(&mut var);
            } else {
                let _ = var.normal_(0.0, 1.0);
            }
        }
    });
}

/// Number of trainable scalars.
pub fn parameter_count(vs: &nn::VarStore) -> i64 {
    vs.trainable_variables().iter().map(|t| t.numel() as i64).sum()
}
