#![doc = include_str!("../README.md")]

/// Acceptance verdicts for one feed
pub mod acceptance;
/// The active groups file
pub mod active;
/// Article headers, parsing and building
pub mod article;
/// Per-peer batch files
pub mod batch;
/// Peer fan-out
pub mod broadcast;
/// Site configuration
mod config;
/// Control message handling
pub mod control;
/// Per-peer transmission decision
pub mod dispatch;
/// Error types
mod error;
/// Peer feed configuration
pub mod feeds;
/// Compression and 7-bit encoding of payloads
pub mod filter;
/// Article history
pub mod history;
/// Filing articles in the local spool
pub mod insert;
/// Newsgroup pattern matching
pub mod matching;
/// Mailing unapproved postings to moderators
pub mod moderation;
/// The posting pipeline
mod relay;
/// Destination compilation
pub mod resolver;
/// Comma-separated set operations
pub mod sets;
/// Association tables
pub mod tables;
/// Handing files to the outside world
pub mod transport;

pub use acceptance::{Verdict, accept, accept_compiled};
pub use active::{ActiveGroups, Group, GroupStatus};
pub use article::{Article, ArticleBuilder, ControlMessage, Headers, parse_article};
pub use config::{DEFAULT_FOLD_WIDTH, DEFAULT_TRANSMIT, RelayConfig, SubscriptionStrategy};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{RelayError, Result};
pub use feeds::{Feed, FeedStore};
pub use matching::ngmatch;
pub use relay::{PostOutcome, Relay};
pub use resolver::{CompiledArticle, Destination, DestinationStatus, GroupResolver};
