//! Response serialization.
//!
//! Bodies are rendered as `csv`, `json` or `wrapped_json`. With
//! `ResponseHeader: fixed16` the body is preceded by a 16-byte preamble
//! holding the status code and the body length, so a reader can consume
//! exactly one response from a stream.

use crate::query::request::{OutputFormat, Request, ResponseHeader, ResponseOptions};
use crate::query::{ExecuteError, QueryResult};

/// Length of the `fixed16` preamble in bytes.
pub const FIXED16_LEN: usize = 16;

/// `fixed16` preamble: 3-digit status, space, right-aligned length, newline.
pub fn fixed16_preamble(status: u16, body_len: usize) -> String {
    format!("{:03} {:>11}\n", status, body_len)
}

/// Parse a `fixed16` preamble into status and body length.
pub fn parse_fixed16(preamble: &[u8]) -> Option<(u16, usize)> {
    if preamble.len() != FIXED16_LEN || preamble[FIXED16_LEN - 1] != b'\n' {
        return None;
    }
    let text = std::str::from_utf8(preamble).ok()?;
    let status = text.get(0..3)?.parse().ok()?;
    let len = text.get(3..FIXED16_LEN - 1)?.trim().parse().ok()?;
    Some((status, len))
}

/// Header mode requested by raw request text, for answering requests that
/// failed to parse in the format the client expects.
pub fn sniff_header(text: &str) -> ResponseHeader {
    let fixed16 = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(keyword, value)| keyword.trim() == "ResponseHeader" && value.trim() == "fixed16");
    if fixed16 {
        ResponseHeader::Fixed16
    } else {
        ResponseHeader::Off
    }
}

/// A rendered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub header: ResponseHeader,
}

impl Response {
    /// Render the outcome of executing `request`.
    pub fn from_result(request: &Request, result: Result<QueryResult, ExecuteError>) -> Self {
        let options = request.options();
        let result = match result {
            Ok(result) => result,
            Err(e) => return Self::error(options.header, e.status_code(), &e.to_string()),
        };

        let query = match request {
            Request::Get(query) => query,
            Request::Command(_) => {
                return Self {
                    status: 200,
                    body: Vec::new(),
                    header: options.header,
                };
            }
        };

        match render_body(options, query.column_headers(), &result) {
            Ok(body) => Self {
                status: 200,
                body,
                header: options.header,
            },
            Err(e) => Self::error(
                options.header,
                500,
                &format!("failed to render response: {e}"),
            ),
        }
    }

    /// Response carrying an error message instead of data.
    pub fn error(header: ResponseHeader, status: u16, message: &str) -> Self {
        let mut body = message.trim_end().as_bytes().to_vec();
        body.push(b'\n');
        Self {
            status,
            body,
            header,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Wire bytes, preamble included when requested.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.header {
            ResponseHeader::Off => self.body.clone(),
            ResponseHeader::Fixed16 => {
                let mut out = fixed16_preamble(self.status, self.body.len()).into_bytes();
                out.extend_from_slice(&self.body);
                out
            }
        }
    }
}

fn render_body(
    options: &ResponseOptions,
    column_headers: bool,
    result: &QueryResult,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    match options.format {
        OutputFormat::Csv => {
            if column_headers {
                out.extend_from_slice(result.columns.join(";").as_bytes());
                out.push(b'\n');
            }
            for row in &result.rows {
                let fields: Vec<String> = row.iter().map(ToString::to_string).collect();
                out.extend_from_slice(fields.join(";").as_bytes());
                out.push(b'\n');
            }
        }
        OutputFormat::Json => {
            out.push(b'[');
            let mut first = true;
            if column_headers {
                serde_json::to_writer(&mut out, &result.columns)?;
                first = false;
            }
            for row in &result.rows {
                if !first {
                    out.extend_from_slice(b",\n");
                }
                serde_json::to_writer(&mut out, row)?;
                first = false;
            }
            out.extend_from_slice(b"]\n");
        }
        OutputFormat::WrappedJson => {
            let wrapped = serde_json::json!({
                "data": result.rows,
                "columns": result.columns,
                "total": result.total,
                "failed": result.failed,
                "duration": result.duration.as_secs_f64(),
            });
            serde_json::to_writer(&mut out, &wrapped)?;
            out.push(b'\n');
        }
    }
    Ok(out)
}
