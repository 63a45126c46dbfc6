pub mod pump;
pub mod recording;
pub mod scheduler;
pub mod stream_guard;
pub mod transport;


pub use recording::SessionInfo;
pub use transport::Transport;
