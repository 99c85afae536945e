//! Training story generation: validated requests, prompt construction, an
//! upstream chat-completion call, allow-list sanitization of the returned
//! HTML, and a client controller that drives the whole exchange.

pub mod error;
pub mod filler;
pub mod prompt;
pub mod request;
pub mod sanitize;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "web")]
pub mod upstream;
#[cfg(feature = "web")]
pub mod web;

pub use error::{ErrorBody, ErrorKind, StoryError};
pub use request::{StoryFields, StoryRequest, StoryResponse};
pub use sanitize::{Fragment, sanitize_html};
