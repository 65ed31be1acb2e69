pub mod datasets;
pub mod models;
pub mod nn;
pub mod training;
pub mod utils;
