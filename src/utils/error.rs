use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnnError {
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Barrier error: {0}")]
    Barrier(String),

    #[error("Render Pass error: {0}")]
    RenderPass(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Inference Graph error: {0}")]
    Graph(String),

    #[error("Inference Core error: {0}")]
    Core(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

// Convert vk::Result (Vulkan return codes) into SnnError
impl From<vulkanalia::vk::Result> for SnnError {
    fn from(r: vulkanalia::vk::Result) -> Self {
        SnnError::Vulkan(format!("vk::Result: {:?}", r))
    }
}

impl From<vulkanalia::vk::ErrorCode> for SnnError {
    fn from(c: vulkanalia::vk::ErrorCode) -> Self {
        SnnError::Vulkan(format!("vk::ErrorCode: {:?}", c))
    }
}

impl From<std::io::Error> for SnnError {
    fn from(e: std::io::Error) -> Self {
        SnnError::Io(e.to_string())
    }
}

impl From<image::ImageError> for SnnError {
    fn from(e: image::ImageError) -> Self {
        SnnError::Image(e.to_string())
    }
}

impl From<toml::de::Error> for SnnError {
    fn from(e: toml::de::Error) -> Self {
        SnnError::Config(e.to_string())
    }
}
