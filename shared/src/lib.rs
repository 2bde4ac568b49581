//! Shared library for the Dataset Scanner Lambda functions.
//!
//! Holds the endpoint handlers and everything behind them: the assistant client and run
//! poller, the statistics payload normalizer, the dataflow catalog and the gateway client.

pub mod assistant;
pub mod catalog;
pub mod client;
pub mod config;
pub mod conversation;
pub mod delimited;
pub mod error;
pub mod http;
pub mod models;
pub mod poller;
pub mod proxy;
pub mod sdmx;
pub mod secrets;
pub mod session;
pub mod transcript;

pub use assistant::{AssistantApi, AssistantClient, RunStatus};
pub use catalog::{QueryDefinition, QueryOptions};
pub use client::{ScannerBackend, ScannerClient};
pub use config::Config;
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use models::{ChatTurn, SearchResult};
pub use poller::{poll_run, CancelToken, PollMode, PollPolicy, RunOutcome};
pub use sdmx::{normalize, DatasetData, ResponseFormat};
pub use session::ChatSession;
