//! Time-series row model and the `LineSender` seam
//!
//! A `Row` is one InfluxDB-line-protocol style record: table, symbol
//! (low-cardinality, indexed) columns, typed field columns and a designated
//! event timestamp. Senders buffer rows until `flush`.

use crate::error::TimeSeriesError;

/// Typed field column value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Str(String),
    F64(f64),
    I64(i64),
}

/// One row destined for a time-series table
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table: String,
    pub symbols: Vec<(&'static str, String)>,
    pub columns: Vec<(&'static str, ColumnValue)>,
    /// Designated timestamp, nanoseconds since the Unix epoch
    pub timestamp_nanos: i64,
}

impl Row {
    pub fn new(table: impl Into<String>, timestamp_nanos: i64) -> Self {
        Self {
            table: table.into(),
            symbols: Vec::new(),
            columns: Vec::new(),
            timestamp_nanos,
        }
    }

    pub fn symbol(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.symbols.push((name, value.into()));
        self
    }

    pub fn str_column(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.columns.push((name, ColumnValue::Str(value.into())));
        self
    }

    pub fn f64_column(mut self, name: &'static str, value: f64) -> Self {
        self.columns.push((name, ColumnValue::F64(value)));
        self
    }

    pub fn i64_column(mut self, name: &'static str, value: i64) -> Self {
        self.columns.push((name, ColumnValue::I64(value)));
        self
    }

    /// Look up a field column by name
    pub fn column(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Look up a symbol column by name
    pub fn symbol_value(&self, name: &str) -> Option<&str> {
        self.symbols
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Buffered, blocking sender for time-series rows.
///
/// Callers serialize access themselves; a sender is never shared without a lock.
pub trait LineSender: Send {
    /// Append one row to the local buffer. A rejected row leaves the buffer
    /// exactly as it was before the call.
    fn append(&mut self, row: &Row) -> Result<(), TimeSeriesError>;

    /// Send every buffered row. On failure the buffer is kept intact so a later
    /// flush can retry.
    fn flush(&mut self) -> Result<(), TimeSeriesError>;

    /// Number of rows buffered and not yet flushed
    fn pending_rows(&self) -> usize;

    /// Drop every buffered row, returning how many were dropped
    fn discard(&mut self) -> usize;

    /// Release the underlying connection. Buffered rows are not flushed.
    fn close(&mut self) -> Result<(), TimeSeriesError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_builder() {
        let row = Row::new("polymarket_trades", 1_706_000_000_000_000_000)
            .symbol("side", "BUY")
            .str_column("asset", "123")
            .f64_column("price", 0.55)
            .i64_column("outcome_index", 1);

        assert_eq!(row.symbol_value("side"), Some("BUY"));
        assert_eq!(row.column("price"), Some(&ColumnValue::F64(0.55)));
        assert_eq!(row.column("outcome_index"), Some(&ColumnValue::I64(1)));
        assert_eq!(row.column("missing"), None);
    }
}
