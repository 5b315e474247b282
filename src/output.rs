use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use chrono::Local;

use logscope_logs::{GroupResults, GroupedEvent};

/// Plain-text rendering options
#[derive(Clone, Copy, Debug, Default)]
pub struct Format {
    /// Print noise events too, marked with `~`
    pub show_noise: bool,

    /// Render timestamps in local time instead of UTC
    pub local_time: bool,
}

/// Render one event as `timestamp [group] stream | message`
pub fn format_event(event: &GroupedEvent, format: Format) -> String {
    let ts = event
        .event
        .event
        .datetime()
        .map(|t| {
            if format.local_time {
                t.with_timezone(&Local).format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
            } else {
                t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
            }
        })
        .unwrap_or_else(|| event.event.timestamp().to_string());
    let marker = if event.event.noise { "~" } else { " " };

    format!(
        "{}{} [{}] {} | {}",
        marker,
        ts,
        event.log_group,
        event.event.event.stream_id,
        event.event.event.message.trim_end()
    )
}

/// Print events oldest first so the newest line ends up at the bottom.
///
/// Returns the number of lines written.
pub fn print_events(out: &mut impl Write, events: &[GroupedEvent], format: Format) -> io::Result<usize> {
    let mut written = 0;
    for event in events.iter().rev() {
        if event.event.noise && !format.show_noise {
            continue;
        }
        writeln!(out, "{}", format_event(event, format))?;
        written += 1;
    }
    Ok(written)
}

/// Events already printed in watch mode, per log group.
///
/// A round can return events printed before: a stream that could not be
/// read holds its group's cursor back, so the next round reads the whole
/// window again.
#[derive(Debug, Default)]
pub struct SeenEvents {
    seen: HashMap<String, HashSet<(i64, String, String)>>,
}

impl SeenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop events printed before and remember the rest
    pub fn retain_unseen(&mut self, events: Vec<GroupedEvent>) -> Vec<GroupedEvent> {
        events
            .into_iter()
            .filter(|e| {
                let event = &e.event.event;
                self.seen.entry(e.log_group.clone()).or_default().insert((
                    event.timestamp,
                    event.stream_id.clone(),
                    event.message.clone(),
                ))
            })
            .collect()
    }

    /// Forget events at or before a group's cursor; no later round returns them
    pub fn forget_through(&mut self, log_group: &str, cursor: i64) {
        if let Some(seen) = self.seen.get_mut(log_group) {
            seen.retain(|(timestamp, _, _)| *timestamp > cursor);
        }
    }
}

/// Warnings for incomplete or degraded group results, one line each
pub fn warnings(results: &GroupResults) -> Vec<String> {
    let mut lines = Vec::new();
    for (group, result) in results {
        match result {
            Ok(r) => {
                if r.truncated {
                    lines.push(format!(
                        "{group}: results are incomplete (a cap or the deadline stopped the fetch)"
                    ));
                }
                if r.streams_failed > 0 {
                    lines.push(format!(
                        "{group}: {} of {} streams could not be read",
                        r.streams_failed,
                        r.streams_failed + r.streams_scanned
                    ));
                }
            }
            Err(e) => lines.push(format!("{group}: {e}")),
        }
    }
    lines
}

/// Summary line with signal and noise counts per group
pub fn summary(results: &GroupResults) -> String {
    let parts: Vec<String> = results
        .iter()
        .filter_map(|(group, result)| result.as_ref().ok().map(|r| (group, r)))
        .map(|(group, r)| {
            format!(
                "{group}: {} signal, {} noise",
                r.signal_count(),
                r.noise_count()
            )
        })
        .collect();
    parts.join("; ")
}
