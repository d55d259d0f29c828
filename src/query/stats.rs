//! `Stats:` aggregation.
//!
//! A stats line is either an aggregation (`Stats: avg latency`) or a bare
//! filter counting its matches (`Stats: state = 2`). Any stats line collapses
//! the result into a single row holding one value per `Stats:` header.

use strum_macros::{AsRefStr, Display, EnumString};

use crate::query::RequestError;
use crate::query::filter::{Combinator, FilterNode, FilterStack, HeaderNames, Predicate};
use crate::table::{Column, Row, TableName, Value};

pub(crate) const STATS_HEADERS: HeaderNames = HeaderNames {
    leaf: "Stats",
    and: "StatsAnd",
    or: "StatsOr",
    negate: "StatsNegate",
};

/// Aggregation applied to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum StatKind {
    Sum,
    Avg,
    Min,
    Max,
}

/// One `Stats:` entry.
#[derive(Debug, Clone)]
pub enum StatSpec {
    /// Number of rows matching the filter.
    Count(FilterNode),
    /// Aggregate of a numeric column over all rows.
    Aggregate {
        kind: StatKind,
        column: &'static Column,
        index: usize,
    },
}

impl StatSpec {
    /// Parse the text after `Stats:`.
    pub fn parse(table: TableName, text: &str) -> Result<Self, RequestError> {
        let text = text.trim_start();
        if let Some((keyword, column)) = text.split_once(' ')
            && let Ok(kind) = keyword.parse::<StatKind>()
            && !column.is_empty()
            && !column.contains(' ')
        {
            let (index, column) =
                table
                    .column(column)
                    .ok_or_else(|| RequestError::UnknownColumn {
                        table,
                        column: column.to_string(),
                    })?;
            return Ok(Self::Aggregate {
                kind,
                column,
                index,
            });
        }

        Predicate::parse(table, text).map(|p| Self::Count(FilterNode::Leaf(p)))
    }

    pub(crate) fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Count(filter) => filter.write_canonical(&STATS_HEADERS, out),
            Self::Aggregate { kind, column, .. } => {
                out.push_str(&format!("Stats: {} {}\n", kind, column.name));
            }
        }
    }

    /// Compute the stat over the given rows.
    pub fn compute<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> Value {
        match self {
            Self::Count(filter) => {
                let count = rows.into_iter().filter(|row| filter.matches(row)).count();
                Value::Int(count as i64)
            }
            Self::Aggregate { kind, index, .. } => {
                let mut acc = Accumulator::default();
                for value in rows.into_iter().filter_map(|row| row.get(*index)) {
                    if let Some(n) = value.as_f64() {
                        acc.add(n);
                    }
                }
                Value::Float(acc.finish(*kind))
            }
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn add(&mut self, n: f64) {
        self.count += 1;
        self.sum += n;
        self.min = Some(self.min.map_or(n, |m| m.min(n)));
        self.max = Some(self.max.map_or(n, |m| m.max(n)));
    }

    fn finish(&self, kind: StatKind) -> f64 {
        match kind {
            StatKind::Sum => self.sum,
            StatKind::Avg if self.count == 0 => 0.0,
            StatKind::Avg => self.sum / self.count as f64,
            StatKind::Min => self.min.unwrap_or(0.0),
            StatKind::Max => self.max.unwrap_or(0.0),
        }
    }
}

/// Fold the filters of the last `count` counting stats into one, for
/// `StatsAnd`/`StatsOr`/`StatsNegate`.
pub fn combine_stats(
    stats: &mut Vec<StatSpec>,
    kind: Combinator,
    count: usize,
    header: &'static str,
) -> Result<(), RequestError> {
    let wanted = if kind == Combinator::Not { 1 } else { count };
    let available = stats
        .iter()
        .rev()
        .take_while(|s| matches!(s, StatSpec::Count(_)))
        .count();
    if wanted > available {
        return Err(RequestError::StackUnderflow {
            header,
            wanted,
            available,
        });
    }

    let mut stack = FilterStack::default();
    for spec in stats.split_off(stats.len() - wanted) {
        if let StatSpec::Count(filter) = spec {
            stack.push(filter);
        }
    }
    match kind {
        Combinator::Not => stack.negate(header)?,
        _ => stack.combine(kind, count, header)?,
    }
    if let Some(filter) = stack.pop() {
        stats.push(StatSpec::Count(filter));
    }
    Ok(())
}
