pub mod cpu;
pub mod shader;
