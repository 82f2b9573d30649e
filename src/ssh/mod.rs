// ABOUTME: SSH transport to managed servers.
// ABOUTME: Pooled per-server sessions, command channels, and Docker socket forwarding.

mod error;
mod forward;
mod pool;
mod session;

pub use error::SshError;
pub use forward::SocketForward;
pub use pool::SessionPool;
pub use session::{CommandOutput, Session, SessionConfig};
