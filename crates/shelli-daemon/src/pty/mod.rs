pub mod manager;

pub use manager::{resolve_command, ManagedPty, PtyManager};
