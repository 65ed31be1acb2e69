use candle_core::{Result, Tensor};

pub trait GraphEncoder {
    /// Per-node encodings for a batch of graphs,
    /// `[batch, num_nodes, num_features]`.
    fn encode(&self, node_features: &Tensor, adjacency: &Tensor) -> Result<Tensor>;
}
