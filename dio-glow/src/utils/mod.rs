pub use tokio;

pub mod task;
