//! # Roo Code Contracts
//!
//! Typed contract between the Roo Code extension and the programs that drive
//! it. The extension hosts tasks; consumers start them, answer their asks,
//! and watch them through events.
//!
//! - **Events**: nine named lifecycle events with positional payloads
//!   ([`RooCodeEvent`], [`EventManager`])
//! - **RooCodeApi trait**: commands and queries a host accepts
//! - **Messages**: the closed [`ClineAsk`] / [`ClineSay`] vocabularies and
//!   [`ClineMessage`]
//! - **Configuration**: every global-state and secret key
//!   ([`ConfigurationKey`], [`ConfigurationStore`])
//! - **Tasks**: [`TaskRegistry`] bookkeeping that emits events in contract
//!   order, and [`ContractMonitor`] to check a stream of them
//! - **Usage / History**: token metrics from the message log, task snapshots
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! roo-code-contracts = "0.1"
//! ```
//!
//! ```rust,ignore
//! use roo_code_contracts::prelude::*;
//!
//! let mut events = api.subscribe(EventFilter::new().named(RooCodeEventName::TaskCompleted));
//! let task_id = api.start_new_task(Some("Write a README".into()), None).await?;
//! while let Ok(event) = events.recv().await {
//!     if event.task_id() == task_id {
//!         break;
//!     }
//! }
//! ```

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod history;
pub mod images;
pub mod logging;
pub mod message;
pub mod monitor;
pub mod tasks;
pub mod types;
pub mod usage;

// Re-export everything in prelude for convenience
pub mod prelude {
    pub use crate::api::*;
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::history::*;
    pub use crate::images::*;
    pub use crate::message::*;
    pub use crate::monitor::*;
    pub use crate::tasks::*;
    pub use crate::types::*;
    pub use crate::usage::*;
}

// Also re-export at crate root
pub use prelude::*;
