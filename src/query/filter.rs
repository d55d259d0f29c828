//! Filter expressions.
//!
//! `Filter:` lines compile into [`Predicate`] leaves; `And:`, `Or:` and
//! `Negate:` fold entries of a [`FilterStack`] into [`FilterNode`]
//! combinators. Evaluation never fails: a value that cannot be compared with
//! the operator simply does not match.

use regex::Regex;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::query::RequestError;
use crate::table::{Column, Row, TableName, Value};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
pub enum Operator {
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    /// Case-insensitive substring.
    #[strum(serialize = "~")]
    Contains,
    #[strum(serialize = "!~")]
    NotContains,
    #[strum(serialize = "=~")]
    RegexMatch,
    #[strum(serialize = "!=~")]
    RegexNotMatch,
    /// List contains an element equal to the literal.
    #[strum(serialize = "~~")]
    ListContains,
    #[strum(serialize = "!~~")]
    ListNotContains,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "!>=")]
    NotGreaterEqual,
}

impl Operator {
    /// Every operator in protocol order.
    pub const ALL: [Operator; 13] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::RegexMatch,
        Operator::RegexNotMatch,
        Operator::Contains,
        Operator::NotContains,
        Operator::ListContains,
        Operator::ListNotContains,
        Operator::Less,
        Operator::LessEqual,
        Operator::Greater,
        Operator::GreaterEqual,
        Operator::NotGreaterEqual,
    ];

    fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual | Self::NotGreaterEqual
        )
    }

    fn is_regex(self) -> bool {
        matches!(self, Self::RegexMatch | Self::RegexNotMatch)
    }
}

/// A single `column operator literal` comparison bound to a table column.
#[derive(Debug, Clone)]
pub struct Predicate {
    column: &'static Column,
    index: usize,
    op: Operator,
    literal: String,
    lowered: String,
    number: Option<f64>,
    regex: Option<Regex>,
}

impl Predicate {
    /// Bind an operator and literal to a column of `table`.
    pub fn new(
        table: TableName,
        column: &str,
        op: Operator,
        literal: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let (index, column) = table
            .column(column)
            .ok_or_else(|| RequestError::UnknownColumn {
                table,
                column: column.to_string(),
            })?;
        let literal = literal.into();

        let regex = if op.is_regex() {
            Some(compile_pattern(&literal)?)
        } else {
            None
        };

        Ok(Self {
            column,
            index,
            op,
            lowered: literal.to_lowercase(),
            number: literal.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
            literal,
            regex,
        })
    }

    /// Parse the text after `Filter:`/`Stats:`, i.e. `column op [literal]`.
    ///
    /// The literal is everything after the single space following the
    /// operator, so it may be empty or contain spaces.
    pub fn parse(table: TableName, text: &str) -> Result<Self, RequestError> {
        let text = text.trim_start();
        let (column, rest) = text.split_once(' ').unwrap_or((text, ""));
        if column.is_empty() {
            return Err(RequestError::Malformed("filter lacks a column".to_string()));
        }
        let (op, literal) = rest.split_once(' ').unwrap_or((rest, ""));
        if op.is_empty() {
            return Err(RequestError::Malformed(format!(
                "filter on {column} lacks an operator"
            )));
        }
        let op = op
            .parse::<Operator>()
            .map_err(|_| RequestError::InvalidOperator(op.to_string()))?;

        Self::new(table, column, op, literal)
    }

    pub fn column(&self) -> &'static Column {
        self.column
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Evaluate against a row of the table the predicate was built for.
    pub fn matches(&self, row: &Row) -> bool {
        row.get(self.index)
            .is_some_and(|value| self.matches_value(value))
    }

    fn matches_value(&self, value: &Value) -> bool {
        if self.op.is_numeric() {
            let (Some(lhs), Some(rhs)) = (value.as_f64(), self.number) else {
                return false;
            };
            return match self.op {
                Operator::Less => lhs < rhs,
                Operator::LessEqual => lhs <= rhs,
                Operator::Greater => lhs > rhs,
                Operator::GreaterEqual => lhs >= rhs,
                _ => lhs < rhs,
            };
        }

        match self.op {
            Operator::Equal => self.equals(value),
            Operator::NotEqual => !self.equals(value),
            Operator::Contains => self.contains(value),
            Operator::NotContains => !self.contains(value),
            Operator::RegexMatch => self.regex_matches(value),
            Operator::RegexNotMatch => !self.regex_matches(value),
            Operator::ListContains => self.list_contains(value),
            Operator::ListNotContains => !self.list_contains(value),
            _ => false,
        }
    }

    fn equals(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => *s == self.literal,
            Value::Int(_) | Value::Float(_) | Value::Time(_) => match (value.as_f64(), self.number) {
                (Some(lhs), Some(rhs)) => lhs == rhs,
                _ => value.text() == self.literal,
            },
            Value::StringList(_) | Value::PairList(_) if self.literal.is_empty() => value.is_empty(),
            Value::StringList(_) | Value::PairList(_) => value.text() == self.literal,
        }
    }

    fn contains(&self, value: &Value) -> bool {
        value
            .items()
            .iter()
            .any(|item| item.to_lowercase().contains(&self.lowered))
            || (value.is_empty() && self.lowered.is_empty())
    }

    fn regex_matches(&self, value: &Value) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };
        match value {
            Value::StringList(_) | Value::PairList(_) => {
                value.items().iter().any(|item| regex.is_match(item))
            }
            _ => regex.is_match(&value.text()),
        }
    }

    fn list_contains(&self, value: &Value) -> bool {
        match value {
            Value::PairList(pairs) => pairs.iter().any(|(k, v)| {
                *k == self.literal
                    || self
                        .literal
                        .split_once(' ')
                        .is_some_and(|(lk, lv)| lk == k.as_str() && lv == v.as_str())
            }),
            _ => value.items().iter().any(|item| *item == self.literal),
        }
    }

    fn write_canonical(&self, out: &mut String) {
        out.push_str(self.column.name);
        out.push(' ');
        out.push_str(self.op.as_ref());
        if !self.literal.is_empty() {
            out.push(' ');
            out.push_str(&self.literal);
        }
    }
}

/// Compile a regex operand. A literal that is not a valid pattern, such
/// as `{}` or `(`, matches as plain text.
fn compile_pattern(literal: &str) -> Result<Regex, RequestError> {
    Regex::new(literal)
        .or_else(|_| Regex::new(&regex::escape(literal)))
        .map_err(|e| RequestError::InvalidRegex {
            pattern: literal.to_string(),
            reason: e.to_string(),
        })
}

/// Kind of a combinator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    Not,
}

/// Filter expression tree.
#[derive(Debug, Clone)]
pub enum FilterNode {
    Leaf(Predicate),
    Combinator {
        kind: Combinator,
        children: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Evaluate the expression against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Leaf(predicate) => predicate.matches(row),
            Self::Combinator {
                kind: Combinator::And,
                children,
            } => children.iter().all(|child| child.matches(row)),
            Self::Combinator {
                kind: Combinator::Or,
                children,
            } => children.iter().any(|child| child.matches(row)),
            Self::Combinator {
                kind: Combinator::Not,
                children,
            } => !children.iter().all(|child| child.matches(row)),
        }
    }

    /// Append the header lines that reproduce this node.
    pub(crate) fn write_canonical(&self, headers: &HeaderNames, out: &mut String) {
        match self {
            Self::Leaf(predicate) => {
                out.push_str(headers.leaf);
                out.push_str(": ");
                predicate.write_canonical(out);
                out.push('\n');
            }
            Self::Combinator { kind, children } => {
                for child in children {
                    child.write_canonical(headers, out);
                }
                match kind {
                    Combinator::And => {
                        out.push_str(&format!("{}: {}\n", headers.and, children.len()))
                    }
                    Combinator::Or => {
                        out.push_str(&format!("{}: {}\n", headers.or, children.len()))
                    }
                    Combinator::Not => out.push_str(&format!("{}:\n", headers.negate)),
                }
            }
        }
    }
}

/// Header keywords used when writing a stack back out.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderNames {
    pub leaf: &'static str,
    pub and: &'static str,
    pub or: &'static str,
    pub negate: &'static str,
}

pub(crate) const FILTER_HEADERS: HeaderNames = HeaderNames {
    leaf: "Filter",
    and: "And",
    or: "Or",
    negate: "Negate",
};

/// Operand stack for the postfix `And`/`Or`/`Negate` grammar.
#[derive(Debug, Clone, Default)]
pub struct FilterStack {
    nodes: Vec<FilterNode>,
}

impl FilterStack {
    pub fn push(&mut self, node: FilterNode) {
        self.nodes.push(node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace the last `count` entries by one `And`/`Or` combinator.
    pub fn combine(
        &mut self,
        kind: Combinator,
        count: usize,
        header: &'static str,
    ) -> Result<(), RequestError> {
        if count == 0 {
            return Err(RequestError::InvalidValue {
                header,
                value: count.to_string(),
            });
        }
        if count > self.nodes.len() {
            return Err(RequestError::StackUnderflow {
                header,
                wanted: count,
                available: self.nodes.len(),
            });
        }
        let children = self.nodes.split_off(self.nodes.len() - count);
        self.nodes.push(FilterNode::Combinator { kind, children });
        Ok(())
    }

    /// Replace the last entry by its negation.
    pub fn negate(&mut self, header: &'static str) -> Result<(), RequestError> {
        let child = self.nodes.pop().ok_or(RequestError::StackUnderflow {
            header,
            wanted: 1,
            available: 0,
        })?;
        self.nodes.push(FilterNode::Combinator {
            kind: Combinator::Not,
            children: vec![child],
        });
        Ok(())
    }

    /// Remove the last entry.
    pub fn pop(&mut self) -> Option<FilterNode> {
        self.nodes.pop()
    }

    /// Remaining entries, implicitly and-ed by the caller.
    pub fn into_nodes(self) -> Vec<FilterNode> {
        self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{PEER_KEY, TableName};

    fn backend_row(peer_key: &str, bytes_send: i64) -> Row {
        let values = TableName::Backends
            .columns()
            .iter()
            .map(|column| match column.name {
                PEER_KEY => Value::String(peer_key.to_string()),
                "bytes_send" => Value::Int(bytes_send),
                _ => Value::zero(column.kind),
            })
            .collect();
        Row::new(values)
    }

    fn check(text: &str, row: &Row) -> bool {
        Predicate::parse(TableName::Backends, text).unwrap().matches(row)
    }

    #[test]
    fn test_peer_key_operators() {
        let row = backend_row("mockid0", 10);
        assert!(check("peer_key = mockid0", &row));
        assert!(check("peer_key ~~ mockid0", &row));
        assert!(check("peer_key =~ mockid0", &row));
        assert!(check("peer_key != id2", &row));
        assert!(check("peer_key !=~ id2", &row));
        assert!(check("peer_key !=", &row));
        assert!(check("peer_key ~ MOCKID", &row));
        assert!(!check("peer_key !~ mock", &row));
        assert!(!check("peer_key !~~ mockid0", &row));
    }

    #[test]
    fn test_numeric_operators() {
        let row = backend_row("mockid0", 10);
        assert!(check("bytes_send > 0", &row));
        assert!(check("bytes_send >= 10", &row));
        assert!(check("bytes_send <= 10", &row));
        assert!(!check("bytes_send < 10", &row));
        assert!(check("bytes_send !>= 11", &row));
        assert!(check("bytes_send = 10.0", &row));
    }

    #[test]
    fn test_numeric_mismatch_is_non_match() {
        let row = backend_row("mockid0", 10);
        assert!(!check("bytes_send > test", &row));
        assert!(!check("bytes_send !>= test", &row));
        assert!(!check("peer_key < 5", &row));
        assert!(!check("bytes_send >", &row));
    }

    #[test]
    fn test_list_operators() {
        let (idx, _) = TableName::Hosts.column("groups").unwrap();
        let mut values: Vec<Value> = TableName::Hosts
            .columns()
            .iter()
            .map(|c| Value::zero(c.kind))
            .collect();
        values[idx] = Value::StringList(vec!["linux".into(), "web".into()]);
        let row = Row::new(values);

        let check = |text: &str| Predicate::parse(TableName::Hosts, text).unwrap().matches(&row);
        assert!(check("groups ~~ web"));
        assert!(!check("groups ~~ we"));
        assert!(check("groups !~~ db"));
        assert!(check("groups ~ WE"));
        assert!(check("groups =~ ^lin"));
        assert!(!check("groups ="));
        assert!(check("contacts ="));
        assert!(!check("groups > 1"));
    }

    #[test]
    fn test_parse_errors() {
        let err = Predicate::parse(TableName::Backends, "nope = 1").unwrap_err();
        assert!(matches!(err, RequestError::UnknownColumn { .. }));

        let err = Predicate::parse(TableName::Backends, "peer_key ={}").unwrap_err();
        assert_eq!(err.to_string(), "bad request: invalid filter operator ={}");

        let err = Predicate::parse(TableName::Backends, "peer_key").unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        let row = backend_row("id{}(0", 10);
        assert!(check("peer_key =~ {}", &row));
        assert!(check("peer_key =~ {}(", &row));
        assert!(!check("peer_key !=~ (", &row));
        assert!(check("peer_key !=~ )", &row));
        assert!(check("peer_key =~ ^id\\{", &row));
        assert!(!check("peer_key =~ ^\\{", &row));

        let predicate = Predicate::parse(TableName::Backends, "peer_key =~ {}").unwrap();
        assert_eq!(predicate.literal(), "{}");
    }

    #[test]
    fn test_stack_combinators() {
        let row = backend_row("mockid0", 10);
        let leaf = |text: &str| FilterNode::Leaf(Predicate::parse(TableName::Backends, text).unwrap());

        let mut stack = FilterStack::default();
        stack.push(leaf("peer_key = other"));
        stack.push(leaf("peer_key = mockid0"));
        stack.combine(Combinator::Or, 2, "Or").unwrap();
        assert_eq!(stack.len(), 1);
        stack.negate("Negate").unwrap();

        let nodes = stack.into_nodes();
        assert!(!nodes[0].matches(&row));

        let mut out = String::new();
        nodes[0].write_canonical(&FILTER_HEADERS, &mut out);
        assert_eq!(
            out,
            "Filter: peer_key = other\nFilter: peer_key = mockid0\nOr: 2\nNegate:\n"
        );
    }

    #[test]
    fn test_stack_underflow() {
        let mut stack = FilterStack::default();
        let err = stack.combine(Combinator::And, 2, "And").unwrap_err();
        assert!(matches!(err, RequestError::StackUnderflow { available: 0, .. }));
        assert!(stack.negate("Negate").is_err());
        assert!(stack.combine(Combinator::And, 0, "And").is_err());
    }
}
