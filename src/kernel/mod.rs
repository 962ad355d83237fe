/// Kernel initialization and bootstrap module
pub mod init;

pub use init::{init_kernel, log_memory_map};
