//! InfluxDB line protocol output.
//!
//! ```text
//! bpf_prog,id=42,name=tcp_probe,type=Kprobe jited_size=512u,time_loaded=3000000000u 1718000000000000000
//! ```

use std::{
    fmt::Write as _,
    io::{self, Write},
    time::UNIX_EPOCH,
};

use tracing::debug;

use crate::metric::{Accumulator, FieldValue, Metric};

/// Accumulator writing one line per record to `W`.
///
/// The first write error is kept and returned by [`LineProtocol::finish`]; records added after it
/// are dropped.
pub struct LineProtocol<W: Write> {
    writer: W,
    error: Option<io::Error>,
}

impl<W: Write> LineProtocol<W> {
    /// Writes lines to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    /// Flushes the writer and hands it back, or returns the first write error.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Accumulator for LineProtocol<W> {
    fn add_metric(&mut self, metric: Metric) {
        if self.error.is_some() {
            return;
        }
        let Some(line) = encode(&metric) else {
            debug!(tags = ?metric.tags, "dropping record without fields");
            return;
        };
        if let Err(err) = writeln!(self.writer, "{line}") {
            self.error = Some(err);
        }
    }
}

/// Encodes `metric` as a single line, without the trailing newline.
///
/// Returns `None` for records without fields, which line protocol cannot represent.
pub fn encode(metric: &Metric) -> Option<String> {
    if metric.fields.is_empty() {
        return None;
    }
    let mut line = String::new();
    escape_into(&mut line, metric.name, &[',', ' ']);

    for (key, value) in &metric.tags {
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }

    for (i, (key, value)) in metric.fields.iter().enumerate() {
        line.push(if i == 0 { ' ' } else { ',' });
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        match value {
            FieldValue::UInt(value) => {
                let _ = write!(line, "{value}u");
            }
            FieldValue::Str(value) => {
                line.push('"');
                escape_into(&mut line, value, &['"', '\\']);
                line.push('"');
            }
        }
    }

    let nanos = metric
        .timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let _ = write!(line, " {nanos}");
    Some(line)
}

fn escape_into(buf: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        if special.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}
