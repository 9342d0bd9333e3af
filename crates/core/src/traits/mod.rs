pub mod job_queue;
pub mod notifier;
pub mod registry;
pub mod state_store;

pub use job_queue::*;
pub use notifier::*;
pub use registry::*;
pub use state_store::*;
