use candle_core::{DType, Device, Tensor};

use candle_mpnn::models::{GraphEncoder, GruEncoder};

// cargo run --example encode
fn main() -> anyhow::Result<()> {
    let device = Device::Cpu;

    // one fully connected graph, no self loops
    let num_nodes = 4;
    let adjacency = (Tensor::ones((num_nodes, num_nodes), DType::F32, &device)?
        - Tensor::eye(num_nodes, DType::F32, &device)?)?
    .unsqueeze(0)?;
    let node_features = Tensor::rand(0f32, 1f32, (1, num_nodes, 8), &device)?;

    let gru = GruEncoder::new(3, num_nodes, 8, &device)?;
    let encodings = gru.encode(&node_features, &adjacency)?;
    println!("{:?}", encodings.to_vec3::<f32>()?);
    Ok(())
}
