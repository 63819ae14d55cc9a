//! Process-level plumbing for running the engine as a service.

pub mod shutdown;

pub use shutdown::ShutdownCoordinator;
