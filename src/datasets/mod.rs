mod batch_loader;
pub use batch_loader::*;

mod graph_dataset;
pub use graph_dataset::*;

mod traits;
pub use traits::*;
