use std::fmt;
use std::str::FromStr;

use questdb::ingress::{Buffer, Sender, TimestampNanos};
use tracing::info;

use crate::error::TimeSeriesError;
use crate::timeseries::{ColumnValue, LineSender, Row};

/// ILP transport to QuestDB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlpProtocol {
    /// Raw TCP. Rows only leave the buffer on an explicit flush.
    Tcp,
    /// HTTP. Each flush is a request with a server-side acknowledgement.
    Http,
}

impl IlpProtocol {
    fn scheme(self) -> &'static str {
        match self {
            IlpProtocol::Tcp => "tcp",
            IlpProtocol::Http => "http",
        }
    }
}

impl fmt::Display for IlpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for IlpProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(IlpProtocol::Tcp),
            "http" => Ok(IlpProtocol::Http),
            other => Err(format!("unknown ILP protocol: {}", other)),
        }
    }
}

/// Build the client configuration string, e.g. `tcp::addr=localhost:9009;`
pub(crate) fn conf_string(protocol: IlpProtocol, host: &str, port: u16) -> String {
    format!("{}::addr={}:{};", protocol.scheme(), host, port)
}

/// `LineSender` writing to QuestDB through the official ILP client
pub struct QuestDbSender {
    sender: Option<Sender>,
    buffer: Buffer,
}

impl QuestDbSender {
    pub fn connect(protocol: IlpProtocol, host: &str, port: u16) -> Result<Self, TimeSeriesError> {
        let conf = conf_string(protocol, host, port);
        let sender = Sender::from_conf(&conf)
            .map_err(|e| TimeSeriesError::ConnectionFailed(e.to_string()))?;
        info!(protocol = %protocol, host = %host, port = port, "Connected to QuestDB");
        Ok(Self {
            sender: Some(sender),
            buffer: Buffer::new(),
        })
    }

    fn append_row(buffer: &mut Buffer, row: &Row) -> Result<(), questdb::Error> {
        buffer.table(row.table.as_str())?;
        for (name, value) in &row.symbols {
            buffer.symbol(*name, value.as_str())?;
        }
        for (name, value) in &row.columns {
            match value {
                ColumnValue::Str(v) => buffer.column_str(*name, v.as_str())?,
                ColumnValue::F64(v) => buffer.column_f64(*name, *v)?,
                ColumnValue::I64(v) => buffer.column_i64(*name, *v)?,
            };
        }
        buffer.at(TimestampNanos::new(row.timestamp_nanos))
    }
}

impl LineSender for QuestDbSender {
    fn append(&mut self, row: &Row) -> Result<(), TimeSeriesError> {
        if self.sender.is_none() {
            return Err(TimeSeriesError::Closed);
        }
        self.buffer
            .set_marker()
            .map_err(|e| TimeSeriesError::RowRejected(e.to_string()))?;
        let result = Self::append_row(&mut self.buffer, row);
        if let Err(e) = result {
            // Drop the partial row so the buffer only ever holds complete rows
            self.buffer
                .rewind_to_marker()
                .map_err(|e| TimeSeriesError::RowRejected(e.to_string()))?;
            return Err(TimeSeriesError::RowRejected(e.to_string()));
        }
        self.buffer.clear_marker();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TimeSeriesError> {
        let sender = self.sender.as_mut().ok_or(TimeSeriesError::Closed)?;
        if self.buffer.row_count() == 0 {
            return Ok(());
        }
        sender
            .flush(&mut self.buffer)
            .map_err(|e| TimeSeriesError::FlushFailed(e.to_string()))
    }

    fn pending_rows(&self) -> usize {
        self.buffer.row_count()
    }

    fn discard(&mut self) -> usize {
        let dropped = self.buffer.row_count();
        self.buffer.clear();
        dropped
    }

    fn close(&mut self) -> Result<(), TimeSeriesError> {
        // Dropping the client closes the socket / HTTP agent
        self.sender.take();
        Ok(())
    }
}
