use candle_core::{IndexOp, Result, Tensor};

use crate::utils::{check_shape, matvec, neighbors_of, remove_index};

/// Runs `time_steps` rounds of message passing and returns every round,
/// oldest first. `rounds[0]` is `initial_messages`, `rounds[time_steps]` the
/// final messages. Entries at non-edges stay zero throughout.
#[allow(clippy::too_many_arguments)]
pub fn compose_message_rounds(
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    w_node_features: &Tensor,
    w_neighbor_messages: &Tensor,
    node_features: &Tensor,
    adjacency: &Tensor,
    initial_messages: &Tensor,
) -> Result<Vec<Tensor>> {
    check_shape(w_node_features, &[num_features, num_features], "w_node_features")?;
    check_shape(
        w_neighbor_messages,
        &[num_features, num_features],
        "w_neighbor_messages",
    )?;
    check_shape(node_features, &[num_nodes, num_features], "node_features")?;
    check_shape(adjacency, &[num_nodes, num_nodes], "adjacency")?;
    check_shape(
        initial_messages,
        &[num_nodes, num_nodes, num_features],
        "initial_messages",
    )?;

    let zero_message = Tensor::zeros(num_features, node_features.dtype(), node_features.device())?;
    let mut rounds = vec![initial_messages.clone()];

    for step in 0..time_steps {
        let messages = &rounds[step];
        let mut new_messages = vec![zero_message.clone(); num_nodes * num_nodes];

        for node in 0..num_nodes {
            let neighbors = neighbors_of(&adjacency.i(node)?)?;
            let from_own_features = matvec(w_node_features, &node_features.i(node)?)?;

            for (position, &target) in neighbors.iter().enumerate() {
                let mut from_other_neighbors = zero_message.clone();
                if neighbors.len() > 1 {
                    for neighbor in remove_index(&neighbors, position) {
                        let incoming = messages.i((neighbor, node))?.relu()?;
                        from_other_neighbors =
                            (from_other_neighbors + matvec(w_neighbor_messages, &incoming)?)?;
                    }
                }
                new_messages[node * num_nodes + target] =
                    (&from_own_features + from_other_neighbors)?;
            }
        }

        rounds.push(
            Tensor::stack(&new_messages, 0)?.reshape((num_nodes, num_nodes, num_features))?,
        );
    }
    Ok(rounds)
}

/// Final messages after `time_steps` rounds; see [`compose_message_rounds`].
#[allow(clippy::too_many_arguments)]
pub fn compose_messages(
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    w_node_features: &Tensor,
    w_neighbor_messages: &Tensor,
    node_features: &Tensor,
    adjacency: &Tensor,
    initial_messages: &Tensor,
) -> Result<Tensor> {
    let mut rounds = compose_message_rounds(
        time_steps,
        num_nodes,
        num_features,
        w_node_features,
        w_neighbor_messages,
        node_features,
        adjacency,
        initial_messages,
    )?;
    Ok(rounds.pop().unwrap_or_else(|| initial_messages.clone()))
}
