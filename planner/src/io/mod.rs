//! Side effects and external capabilities.

pub mod approval;
pub mod config;
pub mod events;
pub mod llm;
pub mod lock;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod state;
pub mod workspace;
