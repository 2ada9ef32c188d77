//! Article representation
//!
//! Provides the header model the relay consults (newsgroups, distribution,
//! path, approval, control, date, message-id) and the serialization used
//! for the spool and for transmission.
//!
//! This module is organized into:
//! - `types`: Article, Headers and ControlMessage
//! - `parsing`: article and header parsing functions
//! - `builder`: ArticleBuilder for articles the relay generates itself

mod builder;
mod parsing;
mod types;

pub use self::builder::{ArticleBuilder, DATE_FORMAT, current_date, generate_message_id};
pub use self::parsing::{parse_article, parse_comma_list, parse_headers, split_article};
pub use self::types::{Article, ControlMessage, Headers, PATH_SEP};
