use std::io::Write;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use ember::EmberError;

/// Converts a byte span to a character span for ariadne
fn byte_to_char_span(source: &str, byte_span: &Range<usize>) -> Range<usize> {
    let clamp = |at: usize| {
        let mut at = at.min(source.len());
        while !source.is_char_boundary(at) {
            at -= 1;
        }
        at
    };
    let start = source[..clamp(byte_span.start)].chars().count();
    let end = source[..clamp(byte_span.end)].chars().count();
    start..end.max(start)
}

/// Writes diagnostics either in the classic one-line format or, with
/// `pretty`, as ariadne reports pointing into the source.
pub struct Reporter {
    pretty: bool,
}

impl Reporter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn report_all<W: Write>(
        &self,
        errors: &[EmberError],
        source: &str,
        filename: Option<&str>,
        mut writer: W,
    ) {
        for error in errors {
            self.report(error, source, filename, &mut writer);
        }
    }

    pub fn report<W: Write>(
        &self,
        error: &EmberError,
        source: &str,
        filename: Option<&str>,
        mut writer: W,
    ) {
        let span = match error.span() {
            Some(span) if self.pretty => span,
            _ => {
                writeln!(writer, "{}", error).ok();
                return;
            }
        };

        let (kind, color) = if error.is_warning() {
            (ReportKind::Warning, Color::Yellow)
        } else {
            (ReportKind::Error, Color::Red)
        };

        let name = filename.unwrap_or("");
        let char_span = byte_to_char_span(source, span);
        let message = error.message();

        Report::build(kind, (name, char_span.clone()))
            .with_message(&message)
            .with_label(
                Label::new((name, char_span))
                    .with_message(&message)
                    .with_color(color),
            )
            .finish()
            .write((name, Source::from(source)), &mut writer)
            .ok();
    }
}
