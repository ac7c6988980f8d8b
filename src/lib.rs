pub mod config;
pub mod config_store;
pub mod crypto;
pub mod error;
pub mod model;
pub mod parser;
pub mod providers;
pub mod storage;
pub mod util;
pub mod validation;

pub use error::{DomainError, ErrorCode};
pub use model::{Identifier, WorkItemRecord};
