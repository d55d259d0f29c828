//! Request parsing.
//!
//! A request is a command line (`GET <table>` or `COMMAND [<ts>] <text>`)
//! followed by header lines and terminated by a blank line or end of input.
//! Parsing validates tables, columns, operators and header values against the
//! static schema, so an accepted [`Request`] can always be executed.
//!
//! The [`fmt::Display`] impl writes the canonical text of a request; parsing
//! canonical text and writing it again reproduces it byte for byte.

use std::fmt;

use strum_macros::{AsRefStr, Display, EnumString};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::query::RequestError;
use crate::query::filter::{Combinator, FILTER_HEADERS, FilterNode, FilterStack, Predicate};
use crate::query::stats::{StatSpec, combine_stats};
use crate::table::{Column, TableName};

/// Upper bound for a single request read from a client.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Sort direction of a `Sort:` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Response body encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    WrappedJson,
}

/// Response preamble mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ResponseHeader {
    #[default]
    Off,
    Fixed16,
}

/// One `Sort:` key.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub column: &'static Column,
    pub index: usize,
    pub direction: SortDirection,
}

/// Options shared by every request kind.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    pub header: ResponseHeader,
    pub format: OutputFormat,
    /// Explicit `ColumnHeaders:` value, if given.
    pub column_headers: Option<bool>,
    pub keep_alive: bool,
}

/// A parsed `GET` request.
#[derive(Debug, Clone)]
pub struct Query {
    pub table: TableName,
    /// Columns named by `Columns:`; empty selects the full schema.
    pub columns: Vec<&'static Column>,
    /// Top-level filters, implicitly and-ed.
    pub filters: Vec<FilterNode>,
    pub stats: Vec<StatSpec>,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Restrict the query to these peer keys; empty means all peers.
    pub backends: Vec<String>,
    pub options: ResponseOptions,
}

impl Query {
    /// Bare query selecting every row and column of `table`.
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            stats: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            backends: Vec::new(),
            options: ResponseOptions::default(),
        }
    }

    /// Whether a row passes every top-level filter.
    pub fn matches(&self, row: &crate::table::Row) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }

    /// Whether column names are emitted ahead of the data.
    ///
    /// Defaults to on only for requests without `Columns:` and `Stats:`.
    pub fn column_headers(&self) -> bool {
        self.options
            .column_headers
            .unwrap_or(self.columns.is_empty() && self.stats.is_empty())
    }

    /// Columns of the result in output order.
    pub fn output_columns(&self) -> Vec<&'static Column> {
        if self.columns.is_empty() {
            self.table.columns().iter().collect()
        } else {
            self.columns.clone()
        }
    }
}

/// A parsed `COMMAND` request.
#[derive(Debug, Clone)]
pub struct Command {
    pub timestamp: Option<i64>,
    pub text: String,
    pub backends: Vec<String>,
    pub options: ResponseOptions,
}

impl Command {
    /// Command line forwarded verbatim to peers.
    pub fn line(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("COMMAND [{ts}] {}", self.text),
            None => format!("COMMAND {}", self.text),
        }
    }
}

/// A parsed client request.
#[derive(Debug, Clone)]
pub enum Request {
    Get(Query),
    Command(Command),
}

impl Request {
    pub fn options(&self) -> &ResponseOptions {
        match self {
            Self::Get(query) => &query.options,
            Self::Command(command) => &command.options,
        }
    }

    /// Read one request from a client stream.
    ///
    /// Returns the request and the number of bytes consumed, or `None` when
    /// the stream ended before a request started.
    pub async fn read<R>(reader: &mut R) -> Result<Option<(Self, usize)>, RequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        match read_text(reader).await? {
            Some((text, consumed)) => Self::parse(&text).map(|request| Some((request, consumed))),
            None => Ok(None),
        }
    }

    /// Parse request text. Parsing stops at the first blank line.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let mut lines = text.lines().skip_while(|line| line.trim().is_empty());
        let first = lines
            .next()
            .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
        let headers = lines.take_while(|line| !line.is_empty());

        if let Some(table) = first.strip_prefix("GET ") {
            let table = table.trim();
            let table = table
                .parse::<TableName>()
                .map_err(|_| RequestError::UnknownTable(table.to_string()))?;
            return parse_get(table, headers).map(Self::Get);
        }
        if let Some(rest) = first.strip_prefix("COMMAND ") {
            return parse_command(rest, headers).map(Self::Command);
        }
        Err(RequestError::Malformed(format!(
            "unknown request method: {first}"
        )))
    }
}

/// Read the text of one request from a client stream: every line up to the
/// next blank line or end of input, skipping leading blank lines.
///
/// Returns the text and the number of bytes consumed, or `None` when the
/// stream ended before a request started.
pub async fn read_text<R>(reader: &mut R) -> Result<Option<(String, usize)>, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut text = String::new();
    let mut consumed = 0;
    loop {
        // One byte past the limit is enough to tell an oversized request.
        let budget = (MAX_REQUEST_BYTES + 1).saturating_sub(consumed) as u64;
        let mut line = String::new();
        let n = (&mut *reader).take(budget).read_line(&mut line).await?;
        consumed += n;
        if consumed > MAX_REQUEST_BYTES {
            return Err(RequestError::Malformed(format!(
                "request exceeds {MAX_REQUEST_BYTES} bytes"
            )));
        }
        if n == 0 {
            break;
        }
        let blank = line.trim_end_matches(['\r', '\n']).is_empty();
        if blank && text.is_empty() {
            continue;
        }
        if blank {
            break;
        }
        text.push_str(&line);
    }

    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some((text, consumed)))
}

fn parse_get<'a>(
    table: TableName,
    headers: impl Iterator<Item = &'a str>,
) -> Result<Query, RequestError> {
    let mut query = Query::new(table);
    let mut filters = FilterStack::default();

    for line in headers {
        let (keyword, value) = split_header(line)?;
        match keyword {
            "Columns" => {
                for name in value.split_whitespace() {
                    let (_, column) = lookup(table, name)?;
                    query.columns.push(column);
                }
            }
            "Filter" => filters.push(FilterNode::Leaf(Predicate::parse(table, value)?)),
            "And" => filters.combine(Combinator::And, parse_count("And", value)?, "And")?,
            "Or" => filters.combine(Combinator::Or, parse_count("Or", value)?, "Or")?,
            "Negate" => filters.negate("Negate")?,
            "Stats" => query.stats.push(StatSpec::parse(table, value)?),
            "StatsAnd" => combine_stats(
                &mut query.stats,
                Combinator::And,
                parse_count("StatsAnd", value)?,
                "StatsAnd",
            )?,
            "StatsOr" => combine_stats(
                &mut query.stats,
                Combinator::Or,
                parse_count("StatsOr", value)?,
                "StatsOr",
            )?,
            "StatsNegate" => combine_stats(&mut query.stats, Combinator::Not, 1, "StatsNegate")?,
            "Sort" => query.sort.push(parse_sort(table, value)?),
            "Limit" => query.limit = Some(parse_count("Limit", value)?),
            "Offset" => query.offset = parse_count("Offset", value)?,
            _ => parse_common(keyword, value, &mut query.options, &mut query.backends)?,
        }
    }

    query.filters = filters.into_nodes();
    Ok(query)
}

fn parse_command<'a>(
    rest: &str,
    headers: impl Iterator<Item = &'a str>,
) -> Result<Command, RequestError> {
    let rest = rest.trim_start();
    let (timestamp, text) = match rest.strip_prefix('[') {
        Some(stamped) => {
            let (ts, text) = stamped.split_once(']').ok_or_else(|| RequestError::InvalidValue {
                header: "COMMAND",
                value: rest.to_string(),
            })?;
            let ts = ts.trim().parse::<i64>().map_err(|_| RequestError::InvalidValue {
                header: "COMMAND",
                value: format!("[{ts}]"),
            })?;
            (Some(ts), text.trim_start())
        }
        None => (None, rest),
    };
    if text.trim().is_empty() {
        return Err(RequestError::Malformed("COMMAND lacks command text".to_string()));
    }

    let mut command = Command {
        timestamp,
        text: text.to_string(),
        backends: Vec::new(),
        options: ResponseOptions::default(),
    };
    for line in headers {
        let (keyword, value) = split_header(line)?;
        parse_common(keyword, value, &mut command.options, &mut command.backends)?;
    }
    Ok(command)
}

/// Headers valid for every request kind.
fn parse_common(
    keyword: &str,
    value: &str,
    options: &mut ResponseOptions,
    backends: &mut Vec<String>,
) -> Result<(), RequestError> {
    let value = value.trim();
    match keyword {
        "ResponseHeader" => options.header = parse_enum("ResponseHeader", value)?,
        "OutputFormat" => options.format = parse_enum("OutputFormat", value)?,
        "ColumnHeaders" => options.column_headers = Some(parse_switch("ColumnHeaders", value)?),
        "KeepAlive" => options.keep_alive = parse_switch("KeepAlive", value)?,
        "Backends" => backends.extend(value.split_whitespace().map(str::to_string)),
        _ => return Err(RequestError::UnknownHeader(keyword.to_string())),
    }
    Ok(())
}

fn split_header(line: &str) -> Result<(&str, &str), RequestError> {
    let (keyword, value) = line
        .split_once(':')
        .ok_or_else(|| RequestError::Malformed(format!("malformed header line: {line}")))?;
    Ok((keyword.trim(), value.strip_prefix(' ').unwrap_or(value)))
}

fn lookup(table: TableName, name: &str) -> Result<(usize, &'static Column), RequestError> {
    table.column(name).ok_or_else(|| RequestError::UnknownColumn {
        table,
        column: name.to_string(),
    })
}

fn parse_sort(table: TableName, value: &str) -> Result<SortKey, RequestError> {
    let mut parts = value.split_whitespace();
    let name = parts.next().ok_or_else(|| RequestError::InvalidValue {
        header: "Sort",
        value: value.to_string(),
    })?;
    let direction = match parts.next() {
        Some(dir) => parse_enum("Sort", dir)?,
        None => SortDirection::Asc,
    };
    if parts.next().is_some() {
        return Err(RequestError::InvalidValue {
            header: "Sort",
            value: value.to_string(),
        });
    }
    let (index, column) = lookup(table, name)?;
    Ok(SortKey {
        column,
        index,
        direction,
    })
}

fn parse_count(header: &'static str, value: &str) -> Result<usize, RequestError> {
    value.trim().parse().map_err(|_| RequestError::InvalidValue {
        header,
        value: value.to_string(),
    })
}

fn parse_switch(header: &'static str, value: &str) -> Result<bool, RequestError> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(RequestError::InvalidValue {
            header,
            value: value.to_string(),
        }),
    }
}

fn parse_enum<T: std::str::FromStr>(header: &'static str, value: &str) -> Result<T, RequestError> {
    value.parse().map_err(|_| RequestError::InvalidValue {
        header,
        value: value.to_string(),
    })
}

fn write_common(
    f: &mut fmt::Formatter<'_>,
    options: &ResponseOptions,
    backends: &[String],
) -> fmt::Result {
    if !backends.is_empty() {
        writeln!(f, "Backends: {}", backends.join(" "))?;
    }
    if options.format != OutputFormat::Csv {
        writeln!(f, "OutputFormat: {}", options.format)?;
    }
    if options.header != ResponseHeader::Off {
        writeln!(f, "ResponseHeader: {}", options.header)?;
    }
    if let Some(on) = options.column_headers {
        writeln!(f, "ColumnHeaders: {}", if on { "on" } else { "off" })?;
    }
    if options.keep_alive {
        writeln!(f, "KeepAlive: on")?;
    }
    Ok(())
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get(query) => {
                writeln!(f, "GET {}", query.table)?;
                if !query.columns.is_empty() {
                    let names: Vec<&str> = query.columns.iter().map(|c| c.name).collect();
                    writeln!(f, "Columns: {}", names.join(" "))?;
                }
                let mut body = String::new();
                for filter in &query.filters {
                    filter.write_canonical(&FILTER_HEADERS, &mut body);
                }
                for stat in &query.stats {
                    stat.write_canonical(&mut body);
                }
                f.write_str(&body)?;
                for key in &query.sort {
                    writeln!(f, "Sort: {} {}", key.column.name, key.direction)?;
                }
                if let Some(limit) = query.limit {
                    writeln!(f, "Limit: {limit}")?;
                }
                if query.offset > 0 {
                    writeln!(f, "Offset: {}", query.offset)?;
                }
                write_common(f, &query.options, &query.backends)?;
            }
            Self::Command(command) => {
                writeln!(f, "{}", command.line())?;
                write_common(f, &command.options, &command.backends)?;
            }
        }
        writeln!(f)
    }
}
