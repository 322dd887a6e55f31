//! Archform: turn an architecture diagram into a validated CloudFormation
//! template through a short conversation with a model.
//!
//! The [`orchestrator`] drives each session; [`retrieval`], [`store`] and
//! [`validation`] are its collaborators, and [`cli`] wires them from
//! [`settings`].

#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
pub mod session;
pub mod settings;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ArchformError, Result};
