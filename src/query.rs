//! Query Layer
//!
//! Request text flows through this module in four steps:
//!
//! - [`Request::parse`]: text to a validated [`Request`]
//! - [`FilterNode`] / [`StatSpec`]: total row predicates and aggregates
//! - [`QueryExecutor`]: fan-out over peer snapshots, sort, project, paginate
//! - [`Response`]: `csv` / `json` / `wrapped_json` bodies with optional `fixed16` preamble

mod error;
mod executor;
mod filter;
mod request;
mod response;
mod stats;

pub use error::{ExecuteError, RequestError};
pub use executor::{QueryExecutor, QueryResult};
pub use filter::{Combinator, FilterNode, FilterStack, Operator, Predicate};
pub use request::{
    Command, MAX_REQUEST_BYTES, OutputFormat, Query, Request, ResponseHeader, ResponseOptions,
    SortDirection, SortKey, read_text,
};
pub use response::{FIXED16_LEN, Response, fixed16_preamble, parse_fixed16, sniff_header};
pub use stats::{StatKind, StatSpec, combine_stats};
