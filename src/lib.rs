//! CrewClause: cached, retrying chat-completion backend for an aviation
//! union-contract assistant.
//!
//! A question goes through [`assistant::ContractAssistant::answer`]: the
//! [`cache::ResponseCache`] is consulted first, a miss calls the upstream
//! [`providers::LLMProvider`] through [`retry::execute_with_retry`], and the
//! fresh answer is cached as a best-effort side effect.

pub mod api;
pub mod assistant;
pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod retry;
pub mod utils;

pub use assistant::{Answer, AnswerSource, AskRequest, ContractAssistant};
pub use config::Config;
pub use error::{CrewError, ProviderError, Result};
