pub mod chat;
pub mod error;
pub mod lines;

pub use chat::{ChatCompletionRequest, RequestError};
pub use error::error_body;
pub use lines::LineSplitter;
