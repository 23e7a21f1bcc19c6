//! Query results.
//!
//! Values are kept as text whatever the column's format code says. NULL is
//! `None`, so it stays distinct from the empty string.

use std::sync::Arc;

use crate::error::ErrorFields;
use crate::protocol::backend::ColumnDescriptor;
use crate::protocol::types::Oid;

/// One row of a simple query result, paired with its column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRow {
    names: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl TextRow {
    pub(crate) fn new(names: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column called `name`.
    ///
    /// Returns `None` both for a missing column and for NULL; use
    /// [`TextRow::contains`] to tell them apart.
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)?.as_deref()
    }

    /// Value at `index` in wire order.
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.values.get(index)?.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// `(column name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }
}

/// Outcome of one statement inside a simple query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleQueryResponse {
    /// CommandComplete tag; empty for a failed statement or an empty query
    pub command_tag: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<TextRow>,
    /// Set when this statement ended with an ErrorResponse
    pub error: Option<ErrorFields>,
    /// Notices received while this statement was running
    pub notices: Vec<ErrorFields>,
}

impl SimpleQueryResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Row count reported in the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        crate::protocol::backend::CommandComplete {
            tag: &self.command_tag,
        }
        .rows_affected()
    }
}

/// Rows produced by executing a portal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalResult {
    pub rows: Vec<Vec<Option<String>>>,
    /// `None` when the portal was suspended before completion
    pub command_tag: Option<String>,
    pub notices: Vec<ErrorFields>,
    /// The row limit was reached; executing the portal again continues it.
    ///
    /// The implicit Sync closes an unnamed portal, so only portals bound
    /// inside an explicit transaction can be resumed.
    pub suspended: bool,
}

/// Result of describing a prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedStatementDescription {
    pub parameters: Vec<Oid>,
    /// Empty when the statement returns no rows (NoData)
    pub columns: Vec<ColumnDescriptor>,
    pub notices: Vec<ErrorFields>,
}

/// Result of describing a portal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalDescription {
    pub columns: Vec<ColumnDescriptor>,
    pub notices: Vec<ErrorFields>,
}
