pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{encode_data_uri, resolve_image_ref};
pub use metrics::{Metrics, MetricsSnapshot};
