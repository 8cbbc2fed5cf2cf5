//! Dispensary: a streaming pharmacy assistant backend.
//!
//! A language model answers customer questions by calling pharmacy tools
//! (catalog lookup, stock, prescriptions, refills). The [`agent_loop`] runs
//! the model in rounds, executes the tools it requests through a
//! [`tools::ToolRegistry`], and emits one provider-independent
//! [`agent_loop::AgentEvent`] stream whichever backend is configured.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use dispensary::prelude::*;
//!
//! # async fn example() -> dispensary::error::Result<()> {
//! let config = DispensaryConfig::from_env()?;
//! let store = Arc::new(MemoryStore::bundled()?);
//! let tools = Arc::new(pharmacy_registry(store.clone(), store));
//! let dispatcher = Dispatcher::from_config(&config, tools)?;
//!
//! let mut events = dispatcher.stream(vec![ConversationMessage::user("Is Nurofen in stock in Haifa?")]);
//! while let Some(event) = events.next().await {
//!     println!("{}", event.to_json());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod store;
pub mod tools;
pub mod types;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
