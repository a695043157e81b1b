//! Route handlers.

pub mod cache;
pub mod chat;
pub mod health;

#[cfg(test)]
pub(crate) mod test_support;
