//! Output formatting

use crate::bootstrap::{BootstrapOutcome, BootstrapState};
use crate::fingerprint::Fingerprint;
use crate::output::human::format_human;
use crate::output::json::format_json;
use crate::platform::{HostIdentity, Resolution};
use crate::supervisor::{IntegrityEvent, LoopExit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Anything the command line prints to stdout
#[derive(Debug)]
pub enum Report<'a> {
    Event(&'a IntegrityEvent),
    Units(&'a [String]),
    Fingerprint {
        unit: &'a str,
        fingerprint: &'a Fingerprint,
    },
    Resolution {
        host: &'a HostIdentity,
        resolution: &'a Resolution,
    },
    Bootstrap {
        outcome: BootstrapOutcome,
        history: &'a [BootstrapState],
    },
    Exits(&'a [(String, LoopExit)]),
}

pub fn format_output(report: &Report<'_>, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => format_human(report),
        OutputFormat::Json => format_json(report),
    }
}
