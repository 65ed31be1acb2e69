use anyhow::Result;
use candle_core::{Device, Tensor};

use candle_mpnn::datasets::{Dataset, GraphDataset, GraphSample, RandomSplit};
use candle_mpnn::models::RnnEncoder;
use candle_mpnn::training::{Trainer, TrainingParams};

const NUM_NODES: usize = 6;
const NUM_FEATURES: usize = 3;
const READOUT_DIM: usize = 1;

fn path_graph(num_nodes: usize, device: &Device) -> Result<Tensor> {
    let mut adjacency = vec![0f32; num_nodes * num_nodes];
    for node in 0..num_nodes - 1 {
        adjacency[node * num_nodes + node + 1] = 1.0;
        adjacency[(node + 1) * num_nodes + node] = 1.0;
    }
    Ok(Tensor::from_vec(adjacency, (num_nodes, num_nodes), device)?)
}

// cargo run --example train
fn main() -> Result<()> {
    let device = Device::Cpu;

    // synthetic task: predict the mean node feature of a path graph
    let mut dataset = GraphDataset::new();
    for _ in 0..32 {
        let node_features = Tensor::rand(0f32, 1f32, (NUM_NODES, NUM_FEATURES), &device)?;
        let target = node_features.mean_all()?.reshape(1)?;
        dataset.push(GraphSample {
            node_features,
            adjacency: path_graph(NUM_NODES, &device)?,
            target,
        });
    }
    let (train, validation, test) = dataset.random_split((0.75, 0.125))?;

    let model = RnnEncoder::new(2, NUM_NODES, NUM_FEATURES, READOUT_DIM, &device)?;
    let trainer = Trainer::new(
        model,
        TrainingParams {
            epochs: 50,
            learning_rate: 5e-3,
            validation_period: 5,
        },
    );

    let history = trainer.fit(&train.batches(8)?, &validation.batches(8)?)?;
    println!(
        "Train loss: {:8.5} -> {:8.5}",
        history.first().copied().unwrap_or(0.0),
        history.last().copied().unwrap_or(0.0),
    );

    let test_loss = trainer.evaluate(&test.batches(8)?)?;
    println!("Test loss: {test_loss:8.5}");
    Ok(())
}
