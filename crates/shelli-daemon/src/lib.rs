pub mod ansi;
pub mod client;
pub mod errors;
pub mod frame_detector;
pub mod pid;
pub mod pty;
pub mod responder;
pub mod server;
pub mod session;
pub mod store;
pub mod ttl;
pub mod types;
pub mod vt_screen;

// Primary re-exports
pub use errors::DaemonError;
pub use server::run_server;
pub use types::{load_daemon_config, DaemonConfig};
