pub mod book;
pub mod engine;
pub mod error;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, RuleError, RuleResult};
