//! Static table schemas.
//!
//! The schema of a table is fixed at compile time and identical across every
//! peer exposing that table. Peer-scoped tables are fetched from backends;
//! `backends` and `columns` are generated by the multiplexer itself.

use strum_macros::{AsRefStr, Display, EnumString};

use super::value::ValueType;

/// Name of the virtual column identifying the peer a row came from.
pub const PEER_KEY: &str = "peer_key";

/// Name of the virtual column carrying the peer's display name.
pub const PEER_NAME: &str = "peer_name";

/// Known tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum TableName {
    /// One row per configured peer with its connection health.
    Backends,
    /// One row per column of every table.
    Columns,
    /// Program status of each backend.
    Status,
    /// Monitored hosts.
    Hosts,
    /// Monitored services.
    Services,
}

impl TableName {
    /// Every table in declaration order.
    pub const ALL: [TableName; 5] = [
        TableName::Backends,
        TableName::Columns,
        TableName::Status,
        TableName::Hosts,
        TableName::Services,
    ];

    /// Tables fetched from and cached per peer.
    pub const PEER_SCOPED: [TableName; 3] =
        [TableName::Status, TableName::Hosts, TableName::Services];

    /// Whether the table is produced locally instead of fetched from peers.
    pub fn is_virtual(self) -> bool {
        matches!(self, Self::Backends | Self::Columns)
    }

    /// Declared columns in schema order.
    pub fn columns(self) -> &'static [Column] {
        match self {
            Self::Backends => BACKENDS,
            Self::Columns => COLUMNS,
            Self::Status => STATUS,
            Self::Hosts => HOSTS,
            Self::Services => SERVICES,
        }
    }

    /// Look up a column by name.
    pub fn column(self, name: &str) -> Option<(usize, &'static Column)> {
        self.columns()
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }

    /// Columns that uniquely identify a row within one peer, used to merge
    /// delta refreshes. Empty when the table only supports full refreshes.
    pub fn primary_key(self) -> &'static [&'static str] {
        match self {
            Self::Hosts => &["name"],
            Self::Services => &["host_name", "description"],
            _ => &[],
        }
    }

    /// Column whose value advances whenever a row changes.
    pub fn change_column(self) -> Option<&'static str> {
        match self {
            Self::Hosts | Self::Services => Some("last_check"),
            _ => None,
        }
    }
}

/// A column declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ValueType,
    pub table: TableName,
    pub description: &'static str,
}

impl Column {
    /// Whether the value is stamped by the multiplexer rather than fetched.
    pub fn is_virtual(&self) -> bool {
        self.table.is_virtual() || self.name == PEER_KEY || self.name == PEER_NAME
    }
}

const fn col(
    table: TableName,
    name: &'static str,
    kind: ValueType,
    description: &'static str,
) -> Column {
    Column {
        name,
        kind,
        table,
        description,
    }
}

use TableName as T;
use ValueType as V;

static BACKENDS: &[Column] = &[
    col(T::Backends, PEER_KEY, V::String, "Unique key of the peer"),
    col(T::Backends, PEER_NAME, V::String, "Display name of the peer"),
    col(T::Backends, "addr", V::String, "Connection address of the peer"),
    col(T::Backends, "status", V::Int, "Health code: 0 up, 1 stale, 2 down, 3 pending"),
    col(T::Backends, "state", V::String, "Health state name of the peer"),
    col(T::Backends, "paused", V::Int, "Whether the refresh loop is paused (0/1)"),
    col(T::Backends, "bytes_send", V::Int, "Bytes sent to the peer since start"),
    col(T::Backends, "bytes_received", V::Int, "Bytes received from the peer since start"),
    col(T::Backends, "queries", V::Int, "Requests sent to the peer since start"),
    col(T::Backends, "last_error", V::String, "Last communication error, empty when healthy"),
    col(T::Backends, "last_update", V::Time, "Time of the last successful refresh"),
    col(T::Backends, "last_online", V::Time, "Time the peer was last seen reachable"),
    col(T::Backends, "response_time", V::Float, "Duration of the last refresh in seconds"),
];

static COLUMNS: &[Column] = &[
    col(T::Columns, "table", V::String, "Name of the table"),
    col(T::Columns, "name", V::String, "Name of the column"),
    col(T::Columns, "type", V::String, "Value type of the column"),
    col(T::Columns, "description", V::String, "Description of the column"),
];

static STATUS: &[Column] = &[
    col(T::Status, "program_start", V::Time, "Time the monitoring core was started"),
    col(T::Status, "program_version", V::String, "Version of the monitoring core"),
    col(T::Status, "nagios_pid", V::Int, "Process id of the monitoring core"),
    col(T::Status, "enable_notifications", V::Int, "Whether notifications are enabled globally (0/1)"),
    col(T::Status, "execute_service_checks", V::Int, "Whether active service checks are enabled (0/1)"),
    col(T::Status, "last_command_check", V::Time, "Time of the last external command check"),
    col(T::Status, PEER_KEY, V::String, "Unique key of the peer"),
    col(T::Status, PEER_NAME, V::String, "Display name of the peer"),
];

static HOSTS: &[Column] = &[
    col(T::Hosts, "name", V::String, "Host name"),
    col(T::Hosts, "alias", V::String, "Alternative host name"),
    col(T::Hosts, "address", V::String, "Network address of the host"),
    col(T::Hosts, "state", V::Int, "Current state: 0 up, 1 down, 2 unreachable"),
    col(T::Hosts, "plugin_output", V::String, "Output of the last check"),
    col(T::Hosts, "last_check", V::Time, "Time of the last check"),
    col(T::Hosts, "latency", V::Float, "Check latency in seconds"),
    col(T::Hosts, "groups", V::StringList, "Host groups the host belongs to"),
    col(T::Hosts, "contacts", V::StringList, "Contacts responsible for the host"),
    col(T::Hosts, "custom_variables", V::PairList, "Custom variables of the host"),
    col(T::Hosts, PEER_KEY, V::String, "Unique key of the peer"),
    col(T::Hosts, PEER_NAME, V::String, "Display name of the peer"),
];

static SERVICES: &[Column] = &[
    col(T::Services, "host_name", V::String, "Name of the host the service belongs to"),
    col(T::Services, "description", V::String, "Service description"),
    col(T::Services, "state", V::Int, "Current state: 0 ok, 1 warning, 2 critical, 3 unknown"),
    col(T::Services, "plugin_output", V::String, "Output of the last check"),
    col(T::Services, "last_check", V::Time, "Time of the last check"),
    col(T::Services, "latency", V::Float, "Check latency in seconds"),
    col(T::Services, "groups", V::StringList, "Service groups the service belongs to"),
    col(T::Services, "contacts", V::StringList, "Contacts responsible for the service"),
    col(T::Services, "custom_variables", V::PairList, "Custom variables of the service"),
    col(T::Services, PEER_KEY, V::String, "Unique key of the peer"),
    col(T::Services, PEER_NAME, V::String, "Display name of the peer"),
];
