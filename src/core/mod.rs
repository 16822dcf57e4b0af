pub mod circular_buffer;
pub mod correlation;
pub mod frame;
pub mod health;
pub mod retry;
pub mod types;

pub use circular_buffer::*;
pub use correlation::*;
pub use frame::*;
pub use health::*;
pub use retry::*;
pub use types::*;
