pub mod cost;
pub mod encoder;
pub mod inference;

// Re-export commonly used services
pub use cost::{CostAccountant, PricingTable};
pub use encoder::{EncodedTask, TaskEncoder};
pub use inference::{BatchProvider, InferenceClient, OpenAiClient};
