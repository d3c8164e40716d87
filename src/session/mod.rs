//! Session lifecycle and reconnection

pub mod retry;
pub mod state;
pub mod stream;

pub use retry::ReconnectPolicy;
pub use state::{SessionPhase, SessionState};
pub use stream::{SessionHandle, StreamSession};
