//! Live console report of request outcomes.
//!
//! Every completed request prints one glyph. The outcome category (for example
//! `200 OK` or `no response`) is only printed when it differs from the previous one,
//! so long streaks of identical results collapse into a row of glyphs.

use std::io::{self, Write};

use crate::issuer::RequestOutcome;

/// Printed for each successful request.
pub const SUCCESS_GLYPH: &str = "✅";
/// Printed for each request that failed in any way.
pub const FAILURE_GLYPH: &str = "❌";
/// Width of the banner rules printed before each scenario.
pub const BANNER_WIDTH: usize = 80;

/// Writes the glyph stream for one or more load runs.
#[derive(Debug)]
pub struct OutcomeReporter<W: Write> {
    output: W,
    /// The last category label written, cleared at the start of each run.
    last_label: Option<String>,
}

impl OutcomeReporter<io::Stdout> {
    /// A reporter writing to standard out.
    pub fn stdout() -> Self {
        OutcomeReporter::new(io::stdout())
    }
}

impl<W: Write> OutcomeReporter<W> {
    pub fn new(output: W) -> Self {
        OutcomeReporter {
            output,
            last_label: None,
        }
    }

    /// Forget the last label so the next outcome always prints its category.
    pub fn reset(&mut self) {
        self.last_label = None;
    }

    /// Report one completed request.
    pub fn record(&mut self, outcome: &RequestOutcome) {
        let glyph = if outcome.is_success() {
            SUCCESS_GLYPH
        } else {
            FAILURE_GLYPH
        };

        let label = outcome.label();
        if self.last_label.as_deref() == Some(label.as_str()) {
            self.write(glyph);
        } else {
            self.write(&format!("{} {} ", glyph, label));
            self.last_label = Some(label);
        }
    }

    /// Terminate the glyph stream of a run.
    pub fn finish(&mut self) {
        self.write("\n");
    }

    /// Write a full line of text.
    pub fn announce(&mut self, line: &str) {
        self.write(&format!("{}\n", line));
    }

    /// Write the banner introducing a scenario.
    pub fn banner(&mut self, name: &str, options: &str) {
        let heavy = "█".repeat(BANNER_WIDTH);
        let light = "▒".repeat(BANNER_WIDTH);
        self.write(&format!(
            "\n{}\n{}\n{}\n{}\n{}\n",
            heavy,
            name.to_uppercase(),
            light,
            options,
            light
        ));
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    // Console failures must never abort a load run.
    fn write(&mut self, text: &str) {
        if let Err(e) = self
            .output
            .write_all(text.as_bytes())
            .and_then(|_| self.output.flush())
        {
            warn!("failed to write report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> RequestOutcome {
        RequestOutcome::Success {
            status_code: 200,
            status_text: "OK".to_string(),
        }
    }

    fn error() -> RequestOutcome {
        RequestOutcome::ErrorResponse {
            status_code: 500,
            status_text: "Error".to_string(),
        }
    }

    fn written(reporter: OutcomeReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn labels_only_on_change() {
        let mut reporter = OutcomeReporter::new(Vec::new());
        for outcome in [ok(), ok(), error(), error(), error(), ok()] {
            reporter.record(&outcome);
        }
        let output = written(reporter);

        assert_eq!(output, "✅ 200 OK ✅❌ 500 Error ❌❌✅ 200 OK ");
        assert_eq!(output.matches(SUCCESS_GLYPH).count(), 3);
        assert_eq!(output.matches(FAILURE_GLYPH).count(), 3);
        assert_eq!(output.matches("200 OK").count(), 2);
        assert_eq!(output.matches("500 Error").count(), 1);
    }

    #[test]
    fn failures_share_one_glyph() {
        let mut reporter = OutcomeReporter::new(Vec::new());
        reporter.record(&RequestOutcome::NoResponse);
        reporter.record(&RequestOutcome::NoResponse);
        reporter.record(&RequestOutcome::RequestError);
        reporter.record(&error());
        reporter.finish();

        assert_eq!(written(reporter), "❌ no response ❌❌ error ❌ 500 Error \n");
    }

    #[test]
    fn reset_prints_first_label_again() {
        let mut reporter = OutcomeReporter::new(Vec::new());
        reporter.record(&ok());
        reporter.finish();
        reporter.reset();
        reporter.record(&ok());
        reporter.record(&ok());

        assert_eq!(written(reporter), "✅ 200 OK \n✅ 200 OK ✅");
    }

    #[test]
    fn banner() {
        let mut reporter = OutcomeReporter::new(Vec::new());
        reporter.banner("baseline", "{}");
        let output = written(reporter);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "");
        assert_eq!(lines[1].chars().count(), BANNER_WIDTH);
        assert_eq!(lines[2], "BASELINE");
        assert_eq!(lines[4], "{}");
    }
}
