use candle_core::{IndexOp, Result, Tensor};

use crate::utils::{check_shape, matvec, neighbors_of};

/// Per-node sum of incoming messages, `out[n] = Σ_{m ∈ N(n)} messages[m][n]`,
/// as a `num_nodes × num_features` matrix.
pub fn sum_neighbor_messages(
    num_nodes: usize,
    adjacency: &Tensor,
    messages: &Tensor,
) -> Result<Tensor> {
    let num_features = messages.dim(2)?;
    let zero = Tensor::zeros(num_features, messages.dtype(), messages.device())?;
    let mut summed = Vec::with_capacity(num_nodes);
    for node in 0..num_nodes {
        let mut acc = zero.clone();
        for neighbor in neighbors_of(&adjacency.i(node)?)? {
            acc = (acc + messages.i((neighbor, node))?)?;
        }
        summed.push(acc);
    }
    Tensor::stack(&summed, 0)
}

/// Encodes every node from its own features and its incoming messages.
/// `messages` is expected to be rectified already by the caller.
pub fn encode_messages(
    num_nodes: usize,
    u_node_features: &Tensor,
    u_neighbor_messages: &Tensor,
    node_features: &Tensor,
    adjacency: &Tensor,
    messages: &Tensor,
) -> Result<Tensor> {
    let num_features = node_features.dim(1)?;
    check_shape(u_node_features, &[num_features, num_features], "u_node_features")?;
    check_shape(
        u_neighbor_messages,
        &[num_features, num_features],
        "u_neighbor_messages",
    )?;
    check_shape(node_features, &[num_nodes, num_features], "node_features")?;
    check_shape(adjacency, &[num_nodes, num_nodes], "adjacency")?;
    check_shape(messages, &[num_nodes, num_nodes, num_features], "messages")?;

    let zero = Tensor::zeros(num_features, messages.dtype(), messages.device())?;
    let mut encodings = Vec::with_capacity(num_nodes);
    for node in 0..num_nodes {
        let mut from_messages = zero.clone();
        for neighbor in neighbors_of(&adjacency.i(node)?)? {
            from_messages =
                (from_messages + matvec(u_neighbor_messages, &messages.i((neighbor, node))?)?)?;
        }
        let from_own_features = matvec(u_node_features, &node_features.i(node)?)?;
        encodings.push((from_own_features + from_messages)?.relu()?);
    }
    Tensor::stack(&encodings, 0)
}
