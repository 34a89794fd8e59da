pub mod barrier;
pub mod command_buffer;
pub mod context;
pub mod memory;
pub mod pipeline;
pub mod query;
pub mod resize_op;
pub mod staging;
pub mod vk_image;
