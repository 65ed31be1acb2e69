use candle_core::{IndexOp, Result, Tensor};
use candle_nn::ops;

use crate::utils::{check_shape, matvec, neighbors_of, remove_index};

/// One gate of the gated composer: a feature transform, a message transform
/// and a bias, each over the feature dimension.
pub struct GateWeights {
    pub features: Tensor,
    pub messages: Tensor,
    pub bias: Tensor,
}

impl GateWeights {
    fn check(&self, num_features: usize, what: &str) -> Result<()> {
        check_shape(&self.features, &[num_features, num_features], what)?;
        check_shape(&self.messages, &[num_features, num_features], what)?;
        check_shape(&self.bias, &[num_features], what)
    }

    fn open(&self, own_features: &Tensor, message: &Tensor) -> Result<Tensor> {
        ops::sigmoid(
            &((matvec(&self.features, own_features)? + matvec(&self.messages, message)?)?
                + &self.bias)?,
        )
    }
}

/// Gated variant of message composition. Same loop structure and sparsity as
/// the plain composer, but each edge blends the aggregated prior messages
/// with a fresh memory through update and reset gates.
#[allow(clippy::too_many_arguments)]
pub fn compose_gated_messages(
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    update: &GateWeights,
    reset: &GateWeights,
    memory: &GateWeights,
    node_features: &Tensor,
    adjacency: &Tensor,
    initial_messages: &Tensor,
) -> Result<Tensor> {
    update.check(num_features, "update gate")?;
    reset.check(num_features, "reset gate")?;
    memory.check(num_features, "memory gate")?;
    check_shape(node_features, &[num_nodes, num_features], "node_features")?;
    check_shape(adjacency, &[num_nodes, num_nodes], "adjacency")?;
    check_shape(
        initial_messages,
        &[num_nodes, num_nodes, num_features],
        "initial_messages",
    )?;

    let zero_message = Tensor::zeros(num_features, node_features.dtype(), node_features.device())?;
    let mut messages = initial_messages.clone();

    for _ in 0..time_steps {
        let mut new_messages = vec![zero_message.clone(); num_nodes * num_nodes];

        for node in 0..num_nodes {
            let neighbors = neighbors_of(&adjacency.i(node)?)?;
            let own_features = node_features.i(node)?;

            for (position, &target) in neighbors.iter().enumerate() {
                let others = remove_index(&neighbors, position);

                let mut aggregated = zero_message.clone();
                let mut gated = zero_message.clone();
                for &other in &others {
                    let prior = messages.i((other, node))?;
                    aggregated = (aggregated + &prior)?;
                    gated = (gated + (reset.open(&own_features, &prior)? * prior)?)?;
                }

                let update_gate = update.open(&own_features, &aggregated)?;
                let fresh_memory = ((matvec(&memory.features, &own_features)?
                    + matvec(&memory.messages, &gated)?)?
                    + &memory.bias)?
                    .tanh()?;
                new_messages[node * num_nodes + target] = ((&update_gate * aggregated)?
                    + ((1.0 - update_gate)? * fresh_memory)?)?;
            }
        }

        messages =
            Tensor::stack(&new_messages, 0)?.reshape((num_nodes, num_nodes, num_features))?;
    }
    Ok(messages)
}
