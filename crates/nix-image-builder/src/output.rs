//! Output sink for human-readable build progress.
//!
//! The builder writes progress lines and relays the runtime's load output
//! through an [`OutputSink`]. The sink is write-only: nothing written to it
//! feeds back into control flow.

use std::fmt;

use tracing::Level;

/// A structured key/value pair attached to a progress line.
pub type Field<'a> = (&'a str, &'a dyn fmt::Display);

/// Leveled, structured progress output.
pub trait OutputSink: Send + Sync {
    /// Emit one progress line at `level`.
    fn emit(&self, level: Level, message: &str, fields: &[Field<'_>]);

    /// Relay one line of raw tool output.
    fn stdout(&self, line: &str);

    fn info(&self, message: &str, fields: &[Field<'_>]) {
        self.emit(Level::INFO, message, fields);
    }

    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        self.emit(Level::WARN, message, fields);
    }

    fn error(&self, message: &str, fields: &[Field<'_>]) {
        self.emit(Level::ERROR, message, fields);
    }
}

/// Render fields as ` key=value key=value`.
pub fn render_fields(fields: &[Field<'_>]) -> String {
    let mut rendered = String::new();
    for (key, value) in fields {
        rendered.push(' ');
        rendered.push_str(key);
        rendered.push('=');
        rendered.push_str(&value.to_string());
    }
    rendered
}

/// Sink that forwards everything to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, level: Level, message: &str, fields: &[Field<'_>]) {
        let fields = render_fields(fields);
        match level {
            Level::ERROR => tracing::error!("{message}{fields}"),
            Level::WARN => tracing::warn!("{message}{fields}"),
            Level::INFO => tracing::info!("{message}{fields}"),
            Level::DEBUG => tracing::debug!("{message}{fields}"),
            _ => tracing::trace!("{message}{fields}"),
        }
    }

    fn stdout(&self, line: &str) {
        tracing::info!(stream = "stdout", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        let path = "/nix/store/abc.tar";
        let attempt = 2;
        let rendered = render_fields(&[("path", &path), ("attempt", &attempt)]);
        assert_eq!(rendered, " path=/nix/store/abc.tar attempt=2");
    }

    #[test]
    fn test_render_no_fields() {
        assert_eq!(render_fields(&[]), "");
    }
}
