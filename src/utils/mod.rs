pub mod dump;
pub mod error;
pub mod expect_msg;
pub mod fp16;
