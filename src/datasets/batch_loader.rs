use super::graph_dataset::{GraphBatch, GraphDataset};

/// Iterates a dataset in insertion order, yielding stacked batches; the last
/// batch may be short.
pub struct BatchLoader<'a> {
    cursor: usize,
    batch_size: usize,
    dataset: &'a GraphDataset,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a GraphDataset, batch_size: usize) -> Self {
        Self {
            cursor: 0,
            batch_size: batch_size.max(1),
            dataset,
        }
    }
}

impl<'a> Iterator for BatchLoader<'a> {
    type Item = GraphBatch;
    fn next(&mut self) -> Option<Self::Item> {
        let samples = self.dataset.samples();
        if self.cursor >= samples.len() {
            None
        } else {
            let end = (self.cursor + self.batch_size).min(samples.len());
            let chunk: Vec<_> = samples[self.cursor..end].iter().collect();
            self.cursor = end;
            Some(GraphBatch::stack(&chunk).unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::GraphSample;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn loader_walks_the_dataset_once() {
        let device = Device::Cpu;
        let mut dataset = GraphDataset::new();
        for _ in 0..4 {
            dataset.push(GraphSample {
                node_features: Tensor::rand(0f32, 1f32, (2, 2), &device).unwrap(),
                adjacency: Tensor::ones((2, 2), DType::F32, &device).unwrap(),
                target: Tensor::rand(0f32, 1f32, 1, &device).unwrap(),
            });
        }
        let sizes: Vec<usize> = BatchLoader::new(&dataset, 3)
            .map(|batch| batch.batch_size().unwrap())
            .collect();
        assert_eq!(sizes, vec![3, 1]);
    }
}
