use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::{Device, IndexOp, Tensor};
use itertools::Itertools;

use super::traits::{Dataset, RandomSplit};

/// One graph with its regression target.
#[derive(Clone)]
pub struct GraphSample {
    pub node_features: Tensor,
    pub adjacency: Tensor,
    pub target: Tensor,
}

/// A stack of samples ready for the forward pass.
pub struct GraphBatch {
    pub node_features: Tensor,
    pub adjacency: Tensor,
    pub targets: Tensor,
}

impl GraphBatch {
    pub fn stack(samples: &[&GraphSample]) -> candle_core::Result<Self> {
        let node_features: Vec<Tensor> =
            samples.iter().map(|s| s.node_features.clone()).collect();
        let adjacency: Vec<Tensor> = samples.iter().map(|s| s.adjacency.clone()).collect();
        let targets: Vec<Tensor> = samples.iter().map(|s| s.target.clone()).collect();
        Ok(Self {
            node_features: Tensor::stack(&node_features, 0)?,
            adjacency: Tensor::stack(&adjacency, 0)?,
            targets: Tensor::stack(&targets, 0)?,
        })
    }

    pub fn batch_size(&self) -> candle_core::Result<usize> {
        self.node_features.dim(0)
    }
}

/// In-memory collection of graph samples sharing one node count, feature
/// count and target size.
#[derive(Clone, Default)]
pub struct GraphDataset {
    samples: Vec<GraphSample>,
}

impl GraphDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: GraphSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[GraphSample] {
        &self.samples
    }

    // ```python
    // data = {
    //     "node_features": node_features,   # [count, nodes, features]
    //     "adjacency": adjacency_matrices,  # [count, nodes, nodes]
    //     "targets": targets,               # [count, readout]
    // }
    // with open("graphs.npz", "wb") as f:
    //     np.savez(f, **data)
    // ```
    pub fn from_npz<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let mut arrays: HashMap<String, Tensor> =
            HashMap::from_iter(Tensor::read_npz(path.as_ref())?);
        let mut take = |key: &str| -> Result<Tensor> {
            Ok(arrays
                .remove(key)
                .with_context(|| format!("missing array {key:?}"))?
                .to_device(device)?)
        };
        let node_features = take("node_features")?;
        let adjacency = take("adjacency")?;
        let targets = take("targets")?;

        let count = node_features.dim(0)?;
        let mut dataset = Self::new();
        for idx in 0..count {
            dataset.push(GraphSample {
                node_features: node_features.i(idx)?,
                adjacency: adjacency.i(idx)?,
                target: targets.i(idx)?,
            });
        }
        Ok(dataset)
    }
}

impl Dataset for GraphDataset {
    type Batch = GraphBatch;

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn batches(&self, batch_size: usize) -> Result<Vec<GraphBatch>> {
        if batch_size == 0 {
            bail!("batch size must be positive");
        }
        let mut batches = Vec::new();
        for chunk in &self.samples.iter().chunks(batch_size) {
            let chunk: Vec<&GraphSample> = chunk.collect();
            batches.push(GraphBatch::stack(&chunk)?);
        }
        Ok(batches)
    }
}

impl RandomSplit<(f64, f64)> for GraphDataset {
    type Output = (GraphDataset, GraphDataset, GraphDataset);

    /// Shuffles and splits into train, validation and test partitions; the
    /// test partition takes whatever the two ratios leave over.
    fn random_split(&self, (train, validation): (f64, f64)) -> Result<Self::Output> {
        if train < 0.0 || validation < 0.0 || train + validation > 1.0 {
            bail!("invalid split ratios ({train}, {validation})");
        }
        let count = self.samples.len();
        if count == 0 {
            return Ok((Self::new(), Self::new(), Self::new()));
        }

        let device = Device::Cpu;
        let permutation = Tensor::rand(0f32, 1f32, count, &device)?
            .arg_sort_last_dim(true)?
            .to_vec1::<u32>()?;
        let train_end = (train * count as f64).round() as usize;
        let validation_end = train_end + (validation * count as f64).round() as usize;

        let mut partitions = (Self::new(), Self::new(), Self::new());
        for (position, &sample_idx) in permutation.iter().enumerate() {
            let sample = self.samples[sample_idx as usize].clone();
            if position < train_end {
                partitions.0.push(sample);
            } else if position < validation_end {
                partitions.1.push(sample);
            } else {
                partitions.2.push(sample);
            }
        }
        Ok(partitions)
    }
}
