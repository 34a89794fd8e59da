pub mod inference_core;
pub mod stage;
