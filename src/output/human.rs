//! Human-readable output formatting

use bytesize::ByteSize;
use chrono::Local;

use crate::output::formatter::Report;
use crate::supervisor::{EventKind, IntegrityEvent};

pub fn format_human(report: &Report<'_>) -> String {
    match report {
        Report::Event(event) => format_event(event),
        Report::Units(units) => {
            if units.is_empty() {
                return "No running units found".to_string();
            }
            let mut output = String::from("Running Units\n-------------\n");
            for (i, unit) in units.iter().enumerate() {
                output.push_str(&format!("{:>3}. {}\n", i + 1, unit));
            }
            output
        }
        Report::Fingerprint { unit, fingerprint } => {
            format!(
                "Unit:   {}\n\
                 Digest: {}\n\
                 Export: {}",
                unit,
                fingerprint.digest,
                ByteSize(fingerprint.bytes)
            )
        }
        Report::Resolution { host, resolution } => {
            format!(
                "Host:   {}\n\
                 Image:  {}\n\
                 Source: {}",
                host,
                resolution.image,
                resolution.source
            )
        }
        Report::Bootstrap { outcome, history } => {
            let path: Vec<String> = history.iter().map(|s| s.to_string()).collect();
            format!("Bootstrap: {:?}\n  {}", outcome, path.join(" -> "))
        }
        Report::Exits(exits) => {
            if exits.is_empty() {
                return "Supervision stopped.".to_string();
            }
            let mut output = String::from("\nSupervision stopped.\n");
            for (unit, exit) in exits.iter() {
                output.push_str(&format!("  {:<20} {}\n", unit, exit));
            }
            output
        }
    }
}

fn format_event(event: &IntegrityEvent) -> String {
    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let mut line = format!("[{}] {}: {}", time, event.unit, describe(event.kind));
    if let Some(ref digest) = event.digest {
        line.push_str(&format!(" ({})", digest.short()));
    }
    if let Some(ref detail) = event.detail {
        line.push_str(&format!(" - {}", detail));
    }
    line
}

fn describe(kind: EventKind) -> &'static str {
    match kind {
        EventKind::NoDrift => "no drift",
        EventKind::Drifted => "DRIFT DETECTED",
        EventKind::RecoveryOk => "restored from snapshot",
        EventKind::RecoveryFailed => "RECOVERY FAILED",
        EventKind::Unmonitorable => "UNMONITORABLE",
        EventKind::Unreadable => "fingerprint unreadable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Digest;
    use crate::platform::{resolve_detailed, HostIdentity};
    use crate::supervisor::LoopExit;

    #[test]
    fn test_event_line() {
        let event = IntegrityEvent::new("web1", EventKind::Drifted)
            .with_digest(Digest::from_bytes([0xab; 32]))
            .with_detail("baseline 000000000000");
        let line = format_human(&Report::Event(&event));
        assert!(line.contains("web1: DRIFT DETECTED (abababababab)"));
        assert!(line.ends_with(" - baseline 000000000000"));
    }

    #[test]
    fn test_units_are_numbered_from_one() {
        let units = vec!["web1".to_string(), "db".to_string()];
        let output = format_human(&Report::Units(&units));
        assert!(output.contains("  1. web1\n"));
        assert!(output.contains("  2. db\n"));
        assert_eq!(format_human(&Report::Units(&[])), "No running units found");
    }

    #[test]
    fn test_resolution() {
        let host = HostIdentity::new("ubuntu", "20.04");
        let resolution = resolve_detailed("ubuntu", "20.04");
        let output = format_human(&Report::Resolution {
            host: &host,
            resolution: &resolution,
        });
        assert!(output.contains("Image:  ubuntu:20.04"));
    }

    #[test]
    fn test_exits() {
        let exits = vec![("web1".to_string(), LoopExit::Stopped)];
        let output = format_human(&Report::Exits(&exits));
        assert!(output.contains("web1"));
    }
}
