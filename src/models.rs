mod traits;
pub use traits::GraphEncoder;

mod rnn;
pub use rnn::RnnEncoder;
mod gru;
pub use gru::GruEncoder;
