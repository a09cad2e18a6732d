use std::error::Error as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use eucan_core::{Catalogue, CatalogueOutcome, ErrorReport, EucanError, EucanWarning};

const INDENT: &str = "    ";

/// Human-readable progress output with an indentation level.
///
/// Carries no control-flow meaning; the importer only writes to it.
pub trait Reporter: Send {
    fn indent(&mut self);
    fn dedent(&mut self);
    fn reset_indent(&mut self);

    /// Writes one indented line, or a blank line for an empty string.
    fn print(&mut self, line: &str);

    fn print_catalogue_title(&mut self, catalogue: &Catalogue) {
        let title = format!(
            "🌍 Source catalogue {} ({})",
            catalogue.description, catalogue.code
        );
        let border = "=".repeat(title.chars().count() + 1);
        self.reset_indent();
        self.print("");
        self.print(&border);
        self.print(&title);
        self.print(&border);
    }

    fn print_sub_header(&mut self, text: &str) {
        self.print("");
        self.print(text);
    }

    fn print_error(&mut self, error: &EucanError) {
        let message = match error.source() {
            Some(cause) => format!("{error} - Cause: {cause}"),
            None => error.to_string(),
        };
        self.print(&format!("❌ {message}"));
    }

    fn print_warning(&mut self, warning: &EucanWarning) {
        self.print(&format!("⚠️ {}", warning.message));
    }

    fn print_summary(&mut self, report: &ErrorReport) {
        self.reset_indent();
        self.print("");
        self.print("==========");
        self.print("📋 Summary");
        self.print("==========");

        for catalogue in &report.catalogues {
            let description = &catalogue.description;
            let line = match report.outcome(catalogue) {
                CatalogueOutcome::Failed { warnings: 0 } => {
                    format!("❌ Source catalogue {description} failed")
                }
                CatalogueOutcome::Failed { warnings } => {
                    format!("❌ Source catalogue {description} failed with {warnings} warning(s)")
                }
                CatalogueOutcome::SucceededWithWarnings(warnings) => format!(
                    "⚠️ Source catalogue {description} finished successfully with {warnings} warning(s)"
                ),
                CatalogueOutcome::Succeeded => {
                    format!("✅ Source catalogue {description} finished successfully")
                }
            };
            self.print(&line);
        }
    }
}

/// [`Reporter`] writing to stdout or any other sink.
pub struct Printer {
    indents: usize,
    out: Box<dyn Write + Send>,
}

impl Printer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { indents: 0, out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Reporter for Printer {
    fn indent(&mut self) {
        self.indents += 1;
    }

    fn dedent(&mut self) {
        self.indents = self.indents.saturating_sub(1);
    }

    fn reset_indent(&mut self) {
        self.indents = 0;
    }

    fn print(&mut self, line: &str) {
        // write errors on progress output are ignored
        let _ = if line.is_empty() {
            writeln!(self.out)
        } else {
            writeln!(self.out, "{}{line}", INDENT.repeat(self.indents))
        };
    }
}

/// Cloneable in-memory sink, handy for capturing printer output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer() -> (Printer, SharedBuffer) {
        let buffer = SharedBuffer::new();
        (Printer::new(Box::new(buffer.clone())), buffer)
    }

    #[test]
    fn indentation_is_four_spaces_per_level_and_never_negative() {
        let (mut printer, buffer) = printer();
        printer.print("level 0");
        printer.indent();
        printer.indent();
        printer.print("level 2");
        printer.dedent();
        printer.dedent();
        printer.dedent();
        printer.print("level 0 again");
        printer.indent();
        printer.print("");

        assert_eq!(buffer.contents(), "level 0\n        level 2\nlevel 0 again\n\n");
    }

    #[test]
    fn catalogue_title_is_framed() {
        let (mut printer, buffer) = printer();
        printer.indent();
        printer.print_catalogue_title(&Catalogue::new("TC", "Test", "https://test.nl", "LifeCycle"));

        let title = "🌍 Source catalogue Test (TC)";
        let border = "=".repeat(title.chars().count() + 1);
        assert_eq!(buffer.contents(), format!("\n{border}\n{title}\n{border}\n"));
    }

    #[test]
    fn errors_print_their_cause() {
        let (mut printer, buffer) = printer();
        printer.print_error(&EucanError::import_rows("eucan_events", "server on fire"));
        printer.print_error(&EucanError::Message("plain".to_string()));
        printer.print_warning(&EucanWarning::new("careful"));

        assert_eq!(
            buffer.contents(),
            "❌ Error importing rows to eucan_events - Cause: server on fire\n❌ plain\n⚠️ careful\n"
        );
    }

    #[test]
    fn summary_has_one_line_per_catalogue() {
        let ok = Catalogue::new("a", "A", "https://a", "LifeCycle");
        let warned = Catalogue::new("b", "B", "https://b", "LifeCycle");
        let failed = Catalogue::new("c", "C", "https://c", "Mica");
        let failed_warned = Catalogue::new("d", "D", "https://d", "LifeCycle");
        let mut report = ErrorReport::new(vec![
            ok.clone(),
            warned.clone(),
            failed.clone(),
            failed_warned.clone(),
        ]);
        report.add_warnings(&warned, vec![EucanWarning::new("w")]);
        report.add_error(&failed, EucanError::Message("x".to_string()));
        report.add_warnings(&failed_warned, vec![EucanWarning::new("w1"), EucanWarning::new("w2")]);
        report.add_error(&failed_warned, EucanError::Message("y".to_string()));

        let (mut printer, buffer) = printer();
        printer.indent();
        printer.print_summary(&report);

        assert_eq!(
            buffer.contents(),
            "\n==========\n📋 Summary\n==========\n\
             ✅ Source catalogue A finished successfully\n\
             ⚠️ Source catalogue B finished successfully with 1 warning(s)\n\
             ❌ Source catalogue C failed\n\
             ❌ Source catalogue D failed with 2 warning(s)\n"
        );
    }
}
