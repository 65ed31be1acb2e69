use candle_core::{DType, Device, IndexOp, Result, Tensor, Var};
use candle_nn::{Init, VarBuilder, VarMap};

use super::traits::GraphEncoder;
use crate::nn::{compose_gated_messages, GateWeights};
use crate::utils::{check_shape, matvec};

/// Gated message-passing encoder. Encoding only: gradients for the gated
/// composer are not hand-written, so this model cannot be trained through
/// [`crate::training::Trainer`].
pub struct GruEncoder {
    time_steps: usize,
    num_nodes: usize,
    num_features: usize,
    update: GateWeights,
    reset: GateWeights,
    memory: GateWeights,
    u_node_features: Tensor,
    u_neighbor_messages: Tensor,
    varmap: VarMap,
}

fn gate(vs: &VarBuilder, num_features: usize, init: Init) -> Result<GateWeights> {
    Ok(GateWeights {
        features: vs.get_with_hints((num_features, num_features), "features", init)?,
        messages: vs.get_with_hints((num_features, num_features), "messages", init)?,
        bias: vs.get_with_hints(num_features, "bias", Init::Const(0.0))?,
    })
}

impl GruEncoder {
    pub fn new(
        time_steps: usize,
        num_nodes: usize,
        num_features: usize,
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
        Ok(Self {
            time_steps,
            num_nodes,
            num_features,
            update: gate(&vs.pp("update"), num_features, square)?,
            reset: gate(&vs.pp("reset"), num_features, square)?,
            memory: gate(&vs.pp("memory"), num_features, square)?,
            u_node_features: vs.get_with_hints(
                (num_features, num_features),
                "u_node_features",
                square,
            )?,
            u_neighbor_messages: vs.get_with_hints(
                (num_features, num_features),
                "u_neighbor_messages",
                square,
            )?,
            varmap,
        })
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

impl GraphEncoder for GruEncoder {
    fn encode(&self, node_features: &Tensor, adjacency: &Tensor) -> Result<Tensor> {
        let batch_size = node_features.dim(0)?;
        check_shape(
            node_features,
            &[batch_size, self.num_nodes, self.num_features],
            "node_features",
        )?;
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
            let messages = compose_gated_messages(
                self.time_steps,
                self.num_nodes,
                self.num_features,
                &self.update,
                &self.reset,
                &self.memory,
                &graph_features,
                &adjacency.i(batch)?,
                &initial_messages,
            )?;

            // each node is encoded from the sum of its outgoing messages
            let mut nodes = Vec::with_capacity(self.num_nodes);
            for node in 0..self.num_nodes {
                let outgoing = messages.i(node)?.sum(0)?;
                let encoded = (matvec(&self.u_node_features, &graph_features.i(node)?)?
                    + matvec(&self.u_neighbor_messages, &outgoing)?)?
                .relu()?;
                nodes.push(encoded);
            }
            encodings.push(Tensor::stack(&nodes, 0)?);
        }
        Tensor::stack(&encodings, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn encode_shapes() {
        let device = Device::Cpu;
        let model = GruEncoder::new(2, 3, 2, &device).unwrap();
        let node_features = Tensor::rand(0f32, 1f32, (2, 3, 2), &device).unwrap();
        let adjacency = Tensor::ones((2, 3, 3), DType::F32, &device).unwrap();
        let encodings = model.encode(&node_features, &adjacency).unwrap();
        assert_eq!(encodings.dims(), &[2, 3, 2]);
    }

    #[test]
    fn no_edges_encodes_features_alone() {
        let device = Device::Cpu;
        let model = GruEncoder::new(2, 2, 2, &device).unwrap();
        let node_features = Tensor::rand(0f32, 1f32, (1, 2, 2), &device).unwrap();
        let adjacency = Tensor::zeros((1, 2, 2), DType::F32, &device).unwrap();

        let encodings = model.encode(&node_features, &adjacency).unwrap();
        for (node, encoded) in encodings.i(0).unwrap().to_vec2::<f32>().unwrap().iter().enumerate() {
            let expected = matvec(
                &model.u_node_features,
                &node_features.i((0, node)).unwrap(),
            )
            .unwrap()
            .relu()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
            assert_eq!(encoded, &expected);
        }
    }
}
