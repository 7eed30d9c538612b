//! Terminal rendering of progress events.

use ap_types::{ComputeState, IterationRecord, ProgressEvent};
use crossbeam_channel::Receiver;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};

const RULE_WIDTH: usize = 100;
const PIPELINE_WIDTH: usize = 45;

const LEGEND: [&str; 5] = [
    "ITER: The iteration being evaluated.",
    "PIPELINE: A summary description of the pipeline being evaluated.",
    "DURATION: Time taken for the current iteration.",
    "METRIC: The result of computing the primary metric on the fitted pipeline.",
    "BEST: The best observed score thus far.",
];

/// Writes one line per event, with the iteration table header emitted
/// before the first iteration row.
pub struct ProgressPrinter<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    pub fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::Compute {
                name,
                state,
                current_nodes,
            } => match state {
                ComputeState::Failed { message } => {
                    writeln!(self.out, "compute {name}: failed ({message})")
                }
                other => writeln!(self.out, "compute {name}: {other}, {current_nodes} node(s)"),
            },
            ProgressEvent::RunStatus { run_id, status } => {
                writeln!(self.out, "run {run_id}: {status}")
            }
            ProgressEvent::Iteration { record, best_score } => {
                if !self.header_written {
                    self.write_header()?;
                    self.header_written = true;
                }
                self.write_row(record, *best_score)
            }
        }?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self) -> io::Result<()> {
        let rule = "*".repeat(RULE_WIDTH);
        writeln!(self.out)?;
        writeln!(self.out, "{rule}")?;
        for line in LEGEND {
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out, "{rule}")?;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{:>6}   {:<width$}  {:>10}  {:>8}  {:>8}",
            "ITER",
            "PIPELINE",
            "DURATION",
            "METRIC",
            "BEST",
            width = PIPELINE_WIDTH
        )
    }

    fn write_row(&mut self, record: &IterationRecord, best: Option<f64>) -> io::Result<()> {
        writeln!(
            self.out,
            "{:>6}   {:<width$}  {:>10}  {:>8}  {:>8}",
            record.iteration,
            truncate(&record.pipeline, PIPELINE_WIDTH),
            format_duration(record.duration_seconds),
            format_score(record.score),
            format_score(best),
            width = PIPELINE_WIDTH
        )
    }
}

/// `h:mm:ss`
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{s:.4}"),
        None => "nan".to_string(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width - 3).collect();
        cut.push_str("...");
        cut
    }
}

/// Drain `rx` into a printer on a background thread. The thread ends when
/// every sender is dropped and hands back the writer.
pub fn spawn_printer<W>(rx: Receiver<ProgressEvent>, out: W) -> JoinHandle<io::Result<W>>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut printer = ProgressPrinter::new(out);
        for event in rx {
            printer.handle(&event)?;
        }
        Ok(printer.into_inner())
    })
}
