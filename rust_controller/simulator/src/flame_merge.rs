use std::fs::File;
use std::io::{self, Write};
use std::mem;

use prelude::flame::{self, Span};

static FLAME_GRAPH_FILE: &'static str = "flame-graph.html";
static FLAME_SUMMARY_FILE: &'static str = "flame-summary.txt";

/// Writes the spans recorded on the simulation thread to `flame-graph.html`, and a summary with
/// repeated solver and transcription spans collapsed into one to `flame-summary.txt`.
pub fn write_flame() -> io::Result<()> {
    flame::dump_html(&mut File::create(FLAME_GRAPH_FILE)?)?;

    let mut spans = flame::spans();
    merge_spans(&mut spans);
    write_summary(&mut File::create(FLAME_SUMMARY_FILE)?, &spans)?;
    info!("flame graph written to {} and {}", FLAME_GRAPH_FILE, FLAME_SUMMARY_FILE);
    Ok(())
}

/// Collapses sibling spans with the same name, summing their durations and adopting their
/// children.
fn merge_spans(spans: &mut Vec<Span>) {
    if spans.is_empty() {
        return;
    }

    // Spans with the most children come first within a group so they become the merge target
    spans.sort_by(|s1, s2| {
        let a = (&s1.name, s1.depth, usize::max_value() - s1.children.len());
        let b = (&s2.name, s2.depth, usize::max_value() - s2.children.len());
        a.cmp(&b)
    });

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for mut span in spans.drain(..) {
        match merged.last_mut() {
            Some(target) if target.name == span.name && target.depth == span.depth => {
                target.delta += span.delta;
                target.children.extend(mem::replace(&mut span.children, Vec::new()));
            }
            _ => merged.push(span),
        }
    }

    for span in &mut merged {
        merge_spans(&mut span.children);
    }
    *spans = merged;
}

/// One line per span, indented by depth, with the total time spent in it.
fn write_summary<W: Write>(out: &mut W, spans: &[Span]) -> io::Result<()> {
    for span in spans {
        let indent = "  ".repeat(span.depth as usize);
        writeln!(out, "{}{}: {:.3} ms", indent, span.name, span.delta as f64 / 1e6)?;
        write_summary(out, &span.children)?;
    }
    Ok(())
}
