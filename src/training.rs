use anyhow::Result;
use candle_core::Tensor;
use candle_nn::loss;
use indicatif::{ProgressBar, ProgressStyle};

use crate::datasets::GraphBatch;
use crate::models::RnnEncoder;

pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f64,
    pub validation_period: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 1e-2,
            validation_period: 5,
        }
    }
}

/// Drives SGD over an [`RnnEncoder`]: forward, mean-squared-error loss,
/// hand-written backward, parameter step.
pub struct Trainer {
    model: RnnEncoder,
    params: TrainingParams,
}

// dL/d predictions for mean-squared-error over all elements
fn mse_grad(predictions: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let count = predictions.elem_count() as f64;
    (predictions - targets)? * (2.0 / count)
}

impl Trainer {
    pub fn new(model: RnnEncoder, params: TrainingParams) -> Self {
        Self { model, params }
    }

    pub fn model(&self) -> &RnnEncoder {
        &self.model
    }

    fn train_batch(&self, batch: &GraphBatch) -> Result<f32> {
        let trace = self.model.forward(&batch.node_features, &batch.adjacency)?;
        let loss = loss::mse(&trace.outputs, &batch.targets)?.to_scalar::<f32>()?;
        let grad_output = mse_grad(&trace.outputs, &batch.targets)?;
        let gradients =
            self.model
                .backward(&grad_output, &trace, &batch.node_features, &batch.adjacency)?;
        self.model.step(&gradients, self.params.learning_rate)?;
        Ok(loss)
    }

    /// Trains for the configured number of epochs and returns the mean
    /// training loss per epoch. Validation loss is reported on the progress
    /// bar every `validation_period` epochs.
    pub fn fit(&self, training: &[GraphBatch], validation: &[GraphBatch]) -> Result<Vec<f32>> {
        let pbar = ProgressBar::new(self.params.epochs as u64);
        pbar.set_style(ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"));

        let mut history = Vec::with_capacity(self.params.epochs);
        for epoch in 0..self.params.epochs {
            let mut total = 0f32;
            for batch in training {
                total += self.train_batch(batch)?;
            }
            let mean = if training.is_empty() {
                0.0
            } else {
                total / training.len() as f32
            };
            history.push(mean);

            let report_validation = !validation.is_empty()
                && self.params.validation_period > 0
                && epoch % self.params.validation_period == 0;
            if report_validation {
                let validation_loss = self.evaluate(validation)?;
                pbar.set_message(format!(
                    "epoch {epoch:3} train loss {mean:8.5} validation loss {validation_loss:8.5}"
                ));
            } else {
                pbar.set_message(format!("epoch {epoch:3} train loss {mean:8.5}"));
            }
            pbar.inc(1);
        }
        pbar.finish();
        Ok(history)
    }

    /// Mean MSE over the given batches, without touching the parameters.
    pub fn evaluate(&self, batches: &[GraphBatch]) -> Result<f32> {
        let mut total = 0f32;
        for batch in batches {
            let trace = self.model.forward(&batch.node_features, &batch.adjacency)?;
            total += loss::mse(&trace.outputs, &batch.targets)?.to_scalar::<f32>()?;
        }
        Ok(if batches.is_empty() {
            0.0
        } else {
            total / batches.len() as f32
        })
    }
}
