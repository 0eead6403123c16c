//! JSON output formatting
//!
//! Events are written one object per line so the stream can be piped;
//! one-shot reports are pretty-printed.

use serde_json::{json, Value};

use crate::output::formatter::Report;

pub fn format_json(report: &Report<'_>) -> String {
    let data: Value = match report {
        Report::Event(event) => {
            return serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
        }
        Report::Units(units) => json!({ "units": units }),
        Report::Fingerprint { unit, fingerprint } => json!({
            "unit": unit,
            "digest": fingerprint.digest,
            "bytes": fingerprint.bytes,
        }),
        Report::Resolution { host, resolution } => json!({
            "host": host,
            "image": resolution.image,
            "source": resolution.source,
        }),
        Report::Bootstrap { outcome, history } => json!({
            "outcome": format!("{:?}", outcome).to_lowercase(),
            "history": history.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        }),
        Report::Exits(exits) => {
            let items: Vec<Value> = exits
                .iter()
                .map(|(unit, exit)| json!({ "unit": unit, "exit": exit.to_string() }))
                .collect();
            json!({ "exits": items })
        }
    };

    serde_json::to_string_pretty(&data).unwrap_or_else(|_| "{}".to_string())
}
