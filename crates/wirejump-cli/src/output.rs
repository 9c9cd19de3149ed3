//! Reply formatting
//!
//! Replies are printed either as aligned `Title: value` tables or, with
//! `--json`, as a single `{"error": bool, "message": ...}` document.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use wirejump_proto::catalog::{
    EmptyReply, ListProvidersReply, PeerReply, ServersReply, StatusReply, VersionReply,
};

/// Placeholder for absent or empty values
pub const EMPTY_VALUE: &str = "N/A";

/// Printed when the daemon sends an empty reply
pub const SUCCESS_MESSAGE: &str = "Command executed successfully";

/// Minimum width of the title column
const TITLE_WIDTH: usize = 24;

#[derive(Debug, Default)]
pub struct Table {
    rows: Vec<Row>,
}

#[derive(Debug)]
enum Row {
    Heading(String),
    Field { indent: usize, title: String, value: String },
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heading(&mut self, title: &str) -> &mut Self {
        self.rows.push(Row::Heading(title.to_string()));
        self
    }

    pub fn field(&mut self, title: &str, value: impl Into<String>) -> &mut Self {
        self.push_field(0, title, value.into())
    }

    /// Field nested under the last heading
    pub fn nested(&mut self, title: &str, value: impl Into<String>) -> &mut Self {
        self.push_field(1, title, value.into())
    }

    fn push_field(&mut self, indent: usize, title: &str, value: String) -> &mut Self {
        self.rows.push(Row::Field {
            indent,
            title: title.to_string(),
            value,
        });
        self
    }

    pub fn render(&self) -> String {
        let label = |indent: usize, title: &str| format!("{}{}:", "  ".repeat(indent), title);

        let width = self
            .rows
            .iter()
            .filter_map(|row| match row {
                Row::Field { indent, title, .. } => Some(label(*indent, title).len() + 1),
                Row::Heading(_) => None,
            })
            .fold(TITLE_WIDTH, usize::max);

        let mut out = String::new();
        for row in &self.rows {
            match row {
                Row::Heading(title) => out.push_str(&format!("{}\n", title)),
                Row::Field {
                    indent,
                    title,
                    value,
                } => out.push_str(&format!(
                    "{:<width$}{}\n",
                    label(*indent, title),
                    value,
                    width = width
                )),
            }
        }

        out
    }
}

/// Replies that know how to lay themselves out
pub trait Pretty {
    fn table(&self) -> Table;
}

fn text(value: Option<&str>) -> String {
    match value {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => EMPTY_VALUE.to_string(),
    }
}

fn yes_no(value: bool) -> String {
    let word = if value { "yes" } else { "no" };
    word.to_string()
}

fn list(values: &[String]) -> String {
    if values.is_empty() {
        EMPTY_VALUE.to_string()
    } else {
        values.join(", ")
    }
}

/// Unix timestamp in RFC 2822 form
pub fn timestamp(value: Option<i64>) -> String {
    value
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|time| time.to_rfc2822())
        .unwrap_or_else(|| EMPTY_VALUE.to_string())
}

impl Pretty for EmptyReply {
    fn table(&self) -> Table {
        Table::new()
    }
}

impl Pretty for ListProvidersReply {
    fn table(&self) -> Table {
        let mut table = Table::new();
        table.field("Providers", list(&self.providers));
        table
    }
}

impl Pretty for ServersReply {
    fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .field("Servers", list(&self.servers))
            .field("Last updated", timestamp(self.last_updated))
            .field("Preferred location", text(self.preferred.as_deref()));
        table
    }
}

impl Pretty for StatusReply {
    fn table(&self) -> Table {
        let upstream = &self.upstream;
        let provider = &self.provider;

        let mut table = Table::new();
        table
            .heading("Upstream connection")
            .nested("Online", yes_no(upstream.online))
            .nested("Active since", timestamp(upstream.active_since))
            .nested("Country", text(upstream.country.as_deref()))
            .nested("City", text(upstream.city.as_deref()))
            .heading("Provider")
            .nested("Name", text(provider.name.as_deref()))
            .nested(
                "Preferred location",
                text(provider.preferred_location.as_deref()),
            )
            .nested("Account expires", timestamp(provider.account_expires));
        table
    }
}

impl Pretty for PeerReply {
    fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .heading("Peer")
            .nested("IPv4 Address", text(Some(&self.peer.ipv4_address)))
            .nested("Isolated", yes_no(self.peer.isolated));
        table
    }
}

impl Pretty for VersionReply {
    fn table(&self) -> Table {
        let mut table = Table::new();
        table.field("Version", text(Some(&self.version)));
        table
    }
}

/// `--json` envelope
pub fn json_document<T: Serialize>(error: bool, message: &T) -> String {
    let message = serde_json::to_value(message).unwrap_or(Value::Null);
    json!({ "error": error, "message": message }).to_string()
}
