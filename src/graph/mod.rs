pub mod inference_graph;
pub mod pass;
