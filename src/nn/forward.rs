use candle_core::{IndexOp, Result, Tensor};
use candle_nn::ops;

use super::{compose_message_rounds, encode_messages, sum_neighbor_messages};
use crate::utils::{check_shape, matvec};

/// Everything the forward pass produces. The backward pass consumes the full
/// set, not just the predictions.
pub struct ForwardTrace {
    /// Sigmoid predictions, `[batch, readout_dim]`.
    pub outputs: Tensor,
    /// Pre-activation readout, `[batch, readout_dim]`.
    pub linear_outputs: Tensor,
    /// Flattened per-graph encodings, `[batch, num_nodes · num_features]`.
    pub encodings: Tensor,
    /// Rectified incoming message sums per node, `[batch, num_nodes, num_features]`.
    pub summed_messages: Tensor,
    /// Raw messages for every round, oldest first; each `[batch, num_nodes,
    /// num_nodes, num_features]`. The last entry is the final messages.
    pub message_rounds: Vec<Tensor>,
}

impl ForwardTrace {
    /// Raw messages after the final round.
    pub fn messages(&self) -> &Tensor {
        self.message_rounds.last().expect("at least the initial round")
    }
}

/// Runs composition, encoding and the linear + sigmoid readout for every
/// graph in the batch. Graphs are independent of each other.
#[allow(clippy::too_many_arguments)]
pub fn forward(
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    readout_dim: usize,
    batch_size: usize,
    node_features: &Tensor,
    adjacency: &Tensor,
    w_node_features: &Tensor,
    w_neighbor_messages: &Tensor,
    u_node_features: &Tensor,
    u_neighbor_messages: &Tensor,
    linear_weight: &Tensor,
    linear_bias: &Tensor,
) -> Result<ForwardTrace> {
    check_shape(
        node_features,
        &[batch_size, num_nodes, num_features],
        "node_features",
    )?;
    check_shape(adjacency, &[batch_size, num_nodes, num_nodes], "adjacency")?;
    check_shape(
        linear_weight,
        &[readout_dim, num_nodes * num_features],
        "linear_weight",
    )?;
    check_shape(linear_bias, &[readout_dim], "linear_bias")?;

    let initial_messages = Tensor::zeros(
        (num_nodes, num_nodes, num_features),
        node_features.dtype(),
        node_features.device(),
    )?;

    let mut outputs = Vec::with_capacity(batch_size);
    let mut linear_outputs = Vec::with_capacity(batch_size);
    let mut encodings = Vec::with_capacity(batch_size);
    let mut summed_messages = Vec::with_capacity(batch_size);
    let mut rounds_per_graph = Vec::with_capacity(batch_size);

    for batch in 0..batch_size {
        let graph_features = node_features.i(batch)?;
        let graph_adjacency = adjacency.i(batch)?;

        let rounds = compose_message_rounds(
            time_steps,
            num_nodes,
            num_features,
            w_node_features,
            w_neighbor_messages,
            &graph_features,
            &graph_adjacency,
            &initial_messages,
        )?;
        let rectified = rounds.last().expect("at least the initial round").relu()?;

        summed_messages.push(sum_neighbor_messages(num_nodes, &graph_adjacency, &rectified)?);
        let encoding = encode_messages(
            num_nodes,
            u_node_features,
            u_neighbor_messages,
            &graph_features,
            &graph_adjacency,
            &rectified,
        )?
        .reshape(num_nodes * num_features)?;

        let linear_output = (linear_bias + matvec(linear_weight, &encoding)?)?;
        outputs.push(ops::sigmoid(&linear_output)?);
        linear_outputs.push(linear_output);
        encodings.push(encoding);
        rounds_per_graph.push(rounds);
    }

    // regroup per-graph round stacks into one batched tensor per round
    let mut message_rounds = Vec::with_capacity(time_steps + 1);
    for round in 0..=time_steps {
        let per_graph: Vec<Tensor> = rounds_per_graph
            .iter()
            .map(|rounds| rounds[round].clone())
            .collect();
        message_rounds.push(Tensor::stack(&per_graph, 0)?);
    }

    Ok(ForwardTrace {
        outputs: Tensor::stack(&outputs, 0)?,
        linear_outputs: Tensor::stack(&linear_outputs, 0)?,
        encodings: Tensor::stack(&encodings, 0)?,
        summed_messages: Tensor::stack(&summed_messages, 0)?,
        message_rounds,
    })
}
