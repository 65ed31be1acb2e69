use candle_core::{bail, DType, Device, IndexOp, Result, Tensor, Var};
use candle_nn::{Init, VarBuilder, VarMap};

use super::traits::GraphEncoder;
use crate::nn::{backward, compose_messages, encode_messages, forward, ForwardTrace, Gradients};
use crate::utils::check_shape;

/// Recurrent message-passing encoder with a linear + sigmoid readout and a
/// hand-written backward pass. Parameters live in the model's own `VarMap`;
/// `step` is their single writer.
pub struct RnnEncoder {
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    readout_dim: usize,
    w_node_features: Tensor,
    w_neighbor_messages: Tensor,
    u_node_features: Tensor,
    u_neighbor_messages: Tensor,
    linear_weight: Tensor,
    linear_bias: Tensor,
    varmap: VarMap,
}

impl RnnEncoder {
    pub fn new(
        time_steps: usize,
        num_nodes: usize,
        num_features: usize,
        readout_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        // Xavier Uniform
        let bound = (6.0 / (2 * num_features) as f64).sqrt();
        let square = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let w_node_features =
            vs.get_with_hints((num_features, num_features), "w_node_features", square)?;
        let w_neighbor_messages =
            vs.get_with_hints((num_features, num_features), "w_neighbor_messages", square)?;
        let u_node_features =
            vs.get_with_hints((num_features, num_features), "u_node_features", square)?;
        let u_neighbor_messages =
            vs.get_with_hints((num_features, num_features), "u_neighbor_messages", square)?;

        // readout initialised by Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in))
        let fan_in = num_nodes * num_features;
        let bound = 1.0 / (fan_in as f64).sqrt();
        let readout = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let linear_weight = vs.get_with_hints((readout_dim, fan_in), "linear_weight", readout)?;
        let linear_bias = vs.get_with_hints(readout_dim, "linear_bias", readout)?;

        Ok(Self {
            time_steps,
            num_nodes,
            num_features,
            readout_dim,
            w_node_features,
            w_neighbor_messages,
            u_node_features,
            u_neighbor_messages,
            linear_weight,
            linear_bias,
            varmap,
        })
    }

    pub fn time_steps(&self) -> usize {
        self.time_steps
    }
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
    pub fn num_features(&self) -> usize {
        self.num_features
    }
    pub fn readout_dim(&self) -> usize {
        self.readout_dim
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Full forward pass over one batch; the batch size is taken from the
    /// leading dimension of `node_features`.
    pub fn forward(&self, node_features: &Tensor, adjacency: &Tensor) -> Result<ForwardTrace> {
        let batch_size = node_features.dim(0)?;
        forward(
            self.time_steps,
            self.num_nodes,
            self.num_features,
            self.readout_dim,
            batch_size,
            node_features,
            adjacency,
            &self.w_node_features,
            &self.w_neighbor_messages,
            &self.u_node_features,
            &self.u_neighbor_messages,
            &self.linear_weight,
            &self.linear_bias,
        )
    }

    /// Gradients of the loss behind `grad_output` with respect to every
    /// parameter, retracing the batch recorded in `trace`.
    pub fn backward(
        &self,
        grad_output: &Tensor,
        trace: &ForwardTrace,
        node_features: &Tensor,
        adjacency: &Tensor,
    ) -> Result<Gradients> {
        let batch_size = node_features.dim(0)?;
        backward(
            grad_output,
            trace,
            node_features,
            adjacency,
            batch_size,
            self.num_nodes,
            self.num_features,
            &self.w_neighbor_messages,
            &self.u_neighbor_messages,
            &self.linear_weight,
        )
    }

    /// One SGD update over all parameters.
    pub fn step(&self, gradients: &Gradients, learning_rate: f64) -> Result<()> {
        let named = gradients.named()?;
        let vars = self.varmap.data().lock().unwrap();
        for (name, gradient) in named {
            let Some(var) = vars.get(name) else {
                bail!("no parameter named {name}");
            };
            var.set(&(var.as_tensor() - (&gradient * learning_rate)?)?)?;
        }
        Ok(())
    }
}

impl GraphEncoder for RnnEncoder {
    fn encode(&self, node_features: &Tensor, adjacency: &Tensor) -> Result<Tensor> {
        let batch_size = node_features.dim(0)?;
        check_shape(
            adjacency,
            &[batch_size, self.num_nodes, self.num_nodes],
            "adjacency",
        )?;
        let initial_messages = Tensor::zeros(
            (self.num_nodes, self.num_nodes, self.num_features),
            node_features.dtype(),
            node_features.device(),
        )?;
        let mut encodings = Vec::with_capacity(batch_size);
        for batch in 0..batch_size {
            let graph_features = node_features.i(batch)?;
            let graph_adjacency = adjacency.i(batch)?;
            let messages = compose_messages(
                self.time_steps,
                self.num_nodes,
                self.num_features,
                &self.w_node_features,
                &self.w_neighbor_messages,
                &graph_features,
                &graph_adjacency,
                &initial_messages,
            )?;
            encodings.push(encode_messages(
                self.num_nodes,
                &self.u_node_features,
                &self.u_neighbor_messages,
                &graph_features,
                &graph_adjacency,
                &messages.relu()?,
            )?);
        }
        Tensor::stack(&encodings, 0)
    }
}
