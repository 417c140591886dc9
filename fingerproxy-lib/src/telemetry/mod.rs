pub mod metrics;
pub mod metrics_handler;
pub mod server;
pub mod tracing;

pub use metrics::{init_metrics, Metrics};
pub use metrics_handler::handle_metrics;
pub use server::start_metrics_server;
pub use tracing::init_tracing;
