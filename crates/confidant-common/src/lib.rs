pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{Message, MessageRole};
pub use types::{SessionId, UserId};
