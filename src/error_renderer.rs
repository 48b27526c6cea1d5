//! Error rendering using ariadne
//!
//! Compile errors are rendered with a snippet of the offending source.
//! Errors that do not point into the root source are printed as one line.

use crate::{Diagnostic, Error, Severity};
use ariadne::{ColorGenerator, IndexType, Label, Report, ReportKind, Source};
use std::io::Write;

/// Name the root source is reported under.
const ROOT: &str = "<input>";

/// Render an error with formatting to stderr
///
/// # Example
/// ```no_run
/// use nwscript::{CompileOptions, compile, render_error};
///
/// let source = "void main() { PrintInteger(1) }";
/// if let Err(e) = compile(source, &CompileOptions::default()) {
///     render_error(&e);
/// }
/// ```
pub fn render_error(error: &Error) {
    render_error_to_writer(error, &mut std::io::stderr(), true).ok();
}

/// Render an error to a specific writer
pub fn render_error_to(error: &Error, writer: &mut dyn Write) -> std::io::Result<()> {
    render_error_to_writer(error, writer, true)
}

/// Render an error to a String
pub fn render_error_to_string(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Render an error to a String without color codes (useful for tests)
pub fn render_error_to_string_no_color(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

fn render_error_to_writer(
    error: &Error,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    match error {
        Error::Compilation {
            diagnostics,
            source,
        } => render_diagnostics(source, diagnostics, writer, use_color),
        other => {
            for diag in other.diagnostics() {
                match &diag.code {
                    Some(code) => writeln!(writer, "{}[{}]: {}", diag.severity, code, diag.message)?,
                    None => writeln!(writer, "{}: {}", diag.severity, diag.message)?,
                }
            }
            Ok(())
        }
    }
}

fn render_diagnostics(
    source: &str,
    diagnostics: &[Diagnostic],
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    for diag in diagnostics {
        // Spans into included files cannot be shown against the root text.
        if diag.file != ROOT {
            writeln!(
                writer,
                "{}: {}:{}:{}: {}",
                diag.severity, diag.file, diag.span.line, diag.span.column, diag.message
            )?;
            if let Some(help) = &diag.help {
                writeln!(writer, "  help: {}", help)?;
            }
            continue;
        }

        let mut colors = ColorGenerator::new();
        colors.next(); // Skip the first color.

        let kind = match diag.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
            Severity::Info => ReportKind::Advice,
        };

        let end = (diag.span.end as usize).min(source.len());
        let start = (diag.span.start as usize).min(end);
        let mut report = Report::build(kind, (ROOT, start..end))
            .with_message(&diag.message)
            .with_config(
                ariadne::Config::default()
                    .with_color(use_color)
                    .with_index_type(IndexType::Byte),
            );

        if let Some(code) = &diag.code {
            report = report.with_code(code);
        }

        let color = colors.next();
        report = report.with_label(
            Label::new((ROOT, start..end))
                .with_message(&diag.message)
                .with_color(color),
        );

        if let Some(help) = &diag.help {
            report = report.with_help(help);
        }

        report.finish().write((ROOT, Source::from(source)), &mut *writer)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompileOptions, compile, read_container};

    #[test]
    fn test_render_parse_error() {
        let source = "void main() { PrintInteger(1) }";
        let err = compile(source, &CompileOptions::default()).unwrap_err();
        let output = render_error_to_string_no_color(&err);

        assert!(output.contains("Error"), "{}", output);
        assert!(output.contains("PrintInteger(1)"), "{}", output);
        assert!(output.contains("C001"), "{}", output);
    }

    #[test]
    fn test_render_semantic_error() {
        let source = "void main() { int x = \"text\"; }";
        let err = compile(source, &CompileOptions::default()).unwrap_err();
        let output = render_error_to_string_no_color(&err);

        assert!(output.contains("type mismatch"), "{}", output);
        assert!(output.lines().count() > 1);
    }

    #[test]
    fn test_render_decode_error() {
        let err = read_container(b"XXXXV1.0").unwrap_err();
        let output = render_error_to_string_no_color(&err);
        assert!(output.starts_with("error[D001]: "), "{}", output);
    }
}
