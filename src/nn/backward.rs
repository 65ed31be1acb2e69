use candle_core::{IndexOp, Result, Tensor};
use candle_nn::ops;

use super::ForwardTrace;
use crate::utils::{check_shape, matvec, neighbors_of, outer, relu_mask, remove_index};

/// Parameter gradients for one batch. `linear_bias` is per sample,
/// `[batch, readout_dim]`; everything else is already summed over the batch.
pub struct Gradients {
    pub w_node_features: Tensor,
    pub w_neighbor_messages: Tensor,
    pub u_node_features: Tensor,
    pub u_neighbor_messages: Tensor,
    pub linear_weight: Tensor,
    pub linear_bias: Tensor,
}

impl Gradients {
    pub(crate) fn named(&self) -> Result<Vec<(&'static str, Tensor)>> {
        Ok(vec![
            ("w_node_features", self.w_node_features.clone()),
            ("w_neighbor_messages", self.w_neighbor_messages.clone()),
            ("u_node_features", self.u_node_features.clone()),
            ("u_neighbor_messages", self.u_neighbor_messages.clone()),
            ("linear_weight", self.linear_weight.clone()),
            ("linear_bias", self.linear_bias.sum(0)?),
        ])
    }
}

fn sigmoid_grad(z: &Tensor) -> Result<Tensor> {
    let s = ops::sigmoid(z)?;
    &s * (1.0 - &s)?
}

/// Back-propagates `grad_output` through the readout, the encoder and every
/// round of message composition, retracing the same graph topology as the
/// forward pass. Consumes the per-round message stack recorded in the trace.
#[allow(clippy::too_many_arguments)]
pub fn backward(
    grad_output: &Tensor,
    trace: &ForwardTrace,
    node_features: &Tensor,
    adjacency: &Tensor,
    batch_size: usize,
    num_nodes: usize,
    num_features: usize,
    w_neighbor_messages: &Tensor,
    u_neighbor_messages: &Tensor,
    linear_weight: &Tensor,
) -> Result<Gradients> {
    check_shape(grad_output, trace.linear_outputs.dims(), "grad_output")?;
    check_shape(
        node_features,
        &[batch_size, num_nodes, num_features],
        "node_features",
    )?;
    check_shape(adjacency, &[batch_size, num_nodes, num_nodes], "adjacency")?;

    // readout layer
    let delta1 = (grad_output * sigmoid_grad(&trace.linear_outputs)?)?;
    let linear_bias_grad = delta1.clone();
    let linear_weight_grad = delta1.t()?.matmul(&trace.encodings)?;

    // encoding layer
    let delta2 = (delta1
        .matmul(linear_weight)?
        .reshape((batch_size, num_nodes, num_features))?
        * relu_mask(&trace.encodings)?.reshape((batch_size, num_nodes, num_features))?)?;
    let u_node_grad = delta2.transpose(1, 2)?.matmul(node_features)?.sum(0)?;
    let u_neighbor_grad = delta2
        .transpose(1, 2)?
        .matmul(&trace.summed_messages)?
        .sum(0)?;

    // message composition, unrolled back through the rounds
    let time_steps = trace.message_rounds.len() - 1;
    let u_neighbor_t = u_neighbor_messages.t()?;
    let w_neighbor_t = w_neighbor_messages.t()?;
    let zero_message = Tensor::zeros(num_features, delta2.dtype(), delta2.device())?;
    let mut w_node_grad = Tensor::zeros(
        (num_features, num_features),
        delta2.dtype(),
        delta2.device(),
    )?;
    let mut w_neighbor_grad = w_node_grad.clone();

    for batch in 0..batch_size {
        let neighbors: Vec<Vec<usize>> = (0..num_nodes)
            .map(|node| neighbors_of(&adjacency.i((batch, node))?))
            .collect::<Result<_>>()?;
        let delta2_graph = delta2.i(batch)?;
        let final_messages = trace.message_rounds[time_steps].i(batch)?;

        // seed with the encoder's contribution to each incoming edge
        let mut message_grads = vec![zero_message.clone(); num_nodes * num_nodes];
        for node in 0..num_nodes {
            let upstream = matvec(&u_neighbor_t, &delta2_graph.i(node)?)?;
            for &neighbor in &neighbors[node] {
                let mask = relu_mask(&final_messages.i((neighbor, node))?)?;
                message_grads[neighbor * num_nodes + node] = (&upstream * mask)?;
            }
        }

        for step in (1..=time_steps).rev() {
            let previous = trace.message_rounds[step - 1].i(batch)?;
            let mut previous_grads = vec![zero_message.clone(); num_nodes * num_nodes];

            for node in 0..num_nodes {
                let own_features = node_features.i((batch, node))?;
                for (position, &target) in neighbors[node].iter().enumerate() {
                    let edge_grad = &message_grads[node * num_nodes + target];
                    w_node_grad = (w_node_grad + outer(edge_grad, &own_features)?)?;
                    if neighbors[node].len() > 1 {
                        for other in remove_index(&neighbors[node], position) {
                            let prior = previous.i((other, node))?;
                            w_neighbor_grad =
                                (w_neighbor_grad + outer(edge_grad, &prior.relu()?)?)?;
                            let flow = (matvec(&w_neighbor_t, edge_grad)? * relu_mask(&prior)?)?;
                            let slot = other * num_nodes + node;
                            let accumulated = (&previous_grads[slot] + flow)?;
                            previous_grads[slot] = accumulated;
                        }
                    }
                }
            }
            message_grads = previous_grads;
        }
    }

    Ok(Gradients {
        w_node_features: w_node_grad,
        w_neighbor_messages: w_neighbor_grad,
        u_node_features: u_node_grad,
        u_neighbor_messages: u_neighbor_grad,
        linear_weight: linear_weight_grad,
        linear_bias: linear_bias_grad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::forward;
    use candle_core::{DType, Device, Tensor};

    struct Setup {
        node_features: Tensor,
        adjacency: Tensor,
        w_node: Vec<f32>,
        w_neighbor: Vec<f32>,
        u_node: Vec<f32>,
        u_neighbor: Vec<f32>,
        linear_weight: Tensor,
        linear_bias: Tensor,
    }

    // path graph 0 - 1 - 2, one sample, everything positive so relu stays
    // active and finite differences are smooth
    fn setup(device: &Device) -> Setup {
        Setup {
            node_features: Tensor::from_vec(
                vec![0.5f32, 1.0, 1.5, 0.4, 0.8, 1.2],
                (1, 3, 2),
                device,
            )
            .unwrap(),
            adjacency: Tensor::from_vec(
                vec![0f32, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
                (1, 3, 3),
                device,
            )
            .unwrap(),
            w_node: vec![0.5, 0.1, 0.2, 0.4],
            w_neighbor: vec![0.3, 0.05, 0.1, 0.2],
            u_node: vec![0.4, 0.1, 0.15, 0.3],
            u_neighbor: vec![0.25, 0.1, 0.05, 0.35],
            linear_weight: Tensor::from_vec(vec![0.05f32; 6], (1, 6), device).unwrap(),
            linear_bias: Tensor::from_vec(vec![0.1f32], 1, device).unwrap(),
        }
    }

    fn run_forward(
        setup: &Setup,
        w_node: &[f32],
        w_neighbor: &[f32],
        u_node: &[f32],
        u_neighbor: &[f32],
        device: &Device,
    ) -> ForwardTrace {
        forward(
            2,
            3,
            2,
            1,
            1,
            &setup.node_features,
            &setup.adjacency,
            &Tensor::from_vec(w_node.to_vec(), (2, 2), device).unwrap(),
            &Tensor::from_vec(w_neighbor.to_vec(), (2, 2), device).unwrap(),
            &Tensor::from_vec(u_node.to_vec(), (2, 2), device).unwrap(),
            &Tensor::from_vec(u_neighbor.to_vec(), (2, 2), device).unwrap(),
            &setup.linear_weight,
            &setup.linear_bias,
        )
        .unwrap()
    }

    fn loss(trace: &ForwardTrace) -> f32 {
        trace.outputs.sum_all().unwrap().to_scalar::<f32>().unwrap()
    }

    fn analytic_gradients(setup: &Setup, device: &Device) -> Gradients {
        let trace = run_forward(
            setup,
            &setup.w_node,
            &setup.w_neighbor,
            &setup.u_node,
            &setup.u_neighbor,
            device,
        );
        let grad_output = Tensor::ones((1, 1), DType::F32, device).unwrap();
        backward(
            &grad_output,
            &trace,
            &setup.node_features,
            &setup.adjacency,
            1,
            3,
            2,
            &Tensor::from_vec(setup.w_neighbor.clone(), (2, 2), device).unwrap(),
            &Tensor::from_vec(setup.u_neighbor.clone(), (2, 2), device).unwrap(),
            &setup.linear_weight,
        )
        .unwrap()
    }

    // central difference of Σ outputs with respect to one weight entry
    fn numerical(
        setup: &Setup,
        which: fn(&Setup) -> &Vec<f32>,
        run: fn(&Setup, &[f32], &Device) -> ForwardTrace,
        index: usize,
        device: &Device,
    ) -> f32 {
        let eps = 1e-3f32;
        let base = which(setup).clone();
        let mut plus = base.clone();
        plus[index] += eps;
        let mut minus = base;
        minus[index] -= eps;
        (loss(&run(setup, &plus, device)) - loss(&run(setup, &minus, device))) / (2.0 * eps)
    }

    fn assert_matches_numerical(
        analytic: &Tensor,
        setup: &Setup,
        which: fn(&Setup) -> &Vec<f32>,
        run: fn(&Setup, &[f32], &Device) -> ForwardTrace,
        device: &Device,
    ) {
        let analytic = analytic.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (index, &value) in analytic.iter().enumerate() {
            let expected = numerical(setup, which, run, index, device);
            assert!(
                (value - expected).abs() < 2e-3,
                "entry {index}: analytic {value}, numerical {expected}"
            );
        }
    }

    #[test]
    fn bias_gradient_is_sigmoid_derivative() {
        let device = Device::Cpu;
        let setup = setup(&device);
        let gradients = analytic_gradients(&setup, &device);

        let trace = run_forward(
            &setup,
            &setup.w_node,
            &setup.w_neighbor,
            &setup.u_node,
            &setup.u_neighbor,
            &device,
        );
        let expected = sigmoid_grad(&trace.linear_outputs)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(gradients.linear_bias.to_vec2::<f32>().unwrap(), expected);
    }

    #[test]
    fn node_transform_gradient_matches_numerical() {
        let device = Device::Cpu;
        let setup = setup(&device);
        let gradients = analytic_gradients(&setup, &device);
        assert_matches_numerical(
            &gradients.w_node_features,
            &setup,
            |s| &s.w_node,
            |s, w, d| run_forward(s, w, &s.w_neighbor, &s.u_node, &s.u_neighbor, d),
            &device,
        );
    }

    #[test]
    fn neighbor_transform_gradient_matches_numerical() {
        let device = Device::Cpu;
        let setup = setup(&device);
        let gradients = analytic_gradients(&setup, &device);
        assert_matches_numerical(
            &gradients.w_neighbor_messages,
            &setup,
            |s| &s.w_neighbor,
            |s, w, d| run_forward(s, &s.w_node, w, &s.u_node, &s.u_neighbor, d),
            &device,
        );
    }

    #[test]
    fn encoding_gradients_match_numerical() {
        let device = Device::Cpu;
        let setup = setup(&device);
        let gradients = analytic_gradients(&setup, &device);
        assert_matches_numerical(
            &gradients.u_node_features,
            &setup,
            |s| &s.u_node,
            |s, w, d| run_forward(s, &s.w_node, &s.w_neighbor, w, &s.u_neighbor, d),
            &device,
        );
        assert_matches_numerical(
            &gradients.u_neighbor_messages,
            &setup,
            |s| &s.u_neighbor,
            |s, w, d| run_forward(s, &s.w_node, &s.w_neighbor, &s.u_node, w, d),
            &device,
        );
    }
}
