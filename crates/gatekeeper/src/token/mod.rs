pub mod cipher;
pub mod codec;
pub mod service;

pub use codec::TokenPayload;
pub use service::{IssueError, TokenService, ValidateErrorKind, ValidatedToken};
