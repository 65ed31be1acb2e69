mod compose;
pub use compose::{compose_message_rounds, compose_messages};
mod encode;
pub use encode::{encode_messages, sum_neighbor_messages};
mod forward;
pub use forward::{forward, ForwardTrace};
mod backward;
pub use backward::{backward, Gradients};
mod gru;
pub use gru::{compose_gated_messages, GateWeights};
