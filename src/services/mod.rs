pub mod clock;
pub mod generation;
pub mod http_store;
pub mod memory_store;
pub mod queue;
pub mod store;
pub mod sweeper;
