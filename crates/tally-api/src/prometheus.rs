//! Prometheus text exposition format.
//!
//! Metric names reported by agents are free-form, so they are carried as a
//! `name` label on two fixed series rather than as Prometheus metric names.

use std::fmt::Write;

use tally_core::Snapshot;

/// Render every gauge and counter in the snapshot.
pub fn render_prometheus(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP tally_gauge Last reported gauge value.\n");
    out.push_str("# TYPE tally_gauge gauge\n");
    for (name, value) in &snapshot.gauges {
        let _ = writeln!(out, "tally_gauge{{name=\"{}\"}} {}", escape_label(name), value);
    }

    out.push_str("# HELP tally_counter Accumulated counter total.\n");
    out.push_str("# TYPE tally_counter counter\n");
    for (name, value) in &snapshot.counters {
        let _ = writeln!(out, "tally_counter{{name=\"{}\"}} {}", escape_label(name), value);
    }

    out
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
