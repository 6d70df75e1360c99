pub mod entities;
pub mod timestamps;

// Re-export tracing for use in this crate
pub use tracing;
