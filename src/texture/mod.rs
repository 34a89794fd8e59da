pub mod color;
pub mod convert;
pub mod desc;
pub mod image_texture;
pub mod io;
pub mod raw;
pub mod resize;
