//! Platform resolver
//!
//! Maps a host identity to a recommended base image. Lookup order is fixed:
//! exact version entry of the family, then the family default, then the
//! global default. Resolution never fails.

use serde::Serialize;

use super::normalize_family;

/// Image used when the family is unknown
pub const GLOBAL_DEFAULT_IMAGE: &str = "ubuntu:latest";

/// One family's version table
#[derive(Debug)]
pub struct FamilyTable {
    pub family: &'static str,
    pub aliases: &'static [&'static str],
    pub default: &'static str,
    pub versions: &'static [(&'static str, &'static str)],
}

impl FamilyTable {
    fn matches(&self, family: &str) -> bool {
        self.family == family || self.aliases.contains(&family)
    }

    /// Windows versions arrive as free text ("server 2022", "10 (19045)"),
    /// so every token is a candidate there. Elsewhere only the full version
    /// and its major component are.
    fn scans_all_tokens(&self) -> bool {
        self.family == "windows"
    }

    fn lookup(&self, version: &str) -> Option<&'static str> {
        version_candidates(version, self.scans_all_tokens())
            .into_iter()
            .find_map(|candidate| {
                self.versions
                    .iter()
                    .find(|(key, _)| *key == candidate)
                    .map(|(_, image)| *image)
            })
    }
}

pub static FAMILIES: &[FamilyTable] = &[
    FamilyTable {
        family: "centos",
        aliases: &[],
        default: "ubuntu:latest",
        versions: &[
            ("6", "centos:6"),
            ("7", "centos:7"),
            ("8", "centos:8"),
            ("9", "centos:stream9"),
        ],
    },
    FamilyTable {
        family: "ubuntu",
        aliases: &[],
        default: "ubuntu:24.04",
        versions: &[
            ("14", "ubuntu:14.04"),
            ("16", "ubuntu:16.04"),
            ("18", "ubuntu:18.04"),
            ("20", "ubuntu:20.04"),
            ("22", "ubuntu:22.04"),
            ("24", "ubuntu:24.04"),
        ],
    },
    FamilyTable {
        family: "debian",
        aliases: &[],
        default: "debian:12",
        versions: &[
            ("7", "debian:7"),
            ("8", "debian:8"),
            ("9", "debian:9"),
            ("10", "debian:10"),
            ("11", "debian:11"),
            ("12", "debian:12"),
        ],
    },
    FamilyTable {
        family: "fedora",
        aliases: &[],
        default: "fedora:latest",
        versions: &[
            ("25", "fedora:25"),
            ("26", "fedora:26"),
            ("27", "fedora:27"),
            ("28", "fedora:28"),
            ("29", "fedora:29"),
            ("30", "fedora:30"),
            ("31", "fedora:31"),
            ("35", "fedora:35"),
        ],
    },
    FamilyTable {
        family: "opensuse leap",
        aliases: &["opensuse"],
        default: "opensuse/leap:15",
        versions: &[("15", "opensuse/leap:15")],
    },
    FamilyTable {
        family: "opensuse tumbleweed",
        aliases: &[],
        default: "opensuse/tumbleweed",
        versions: &[],
    },
    FamilyTable {
        family: "bsd",
        aliases: &["freebsd", "openbsd", "netbsd"],
        default: "alpine:latest",
        versions: &[],
    },
    FamilyTable {
        family: "nix",
        aliases: &["nixos"],
        default: "alpine:latest",
        versions: &[],
    },
    FamilyTable {
        family: "windows",
        aliases: &[],
        default: "mcr.microsoft.com/windows/servercore:ltsc2019",
        versions: &[
            ("xp", "legacy-windows/xp:latest"),
            ("vista", "legacy-windows/vista:latest"),
            ("7", "legacy-windows/win7:latest"),
            ("2008", "legacy-windows/win2008:latest"),
            ("2012", "legacy-windows/win2012:latest"),
            ("10", "mcr.microsoft.com/windows/nanoserver:1809"),
            ("2016", "mcr.microsoft.com/windows/servercore:2016"),
            ("2019", "mcr.microsoft.com/windows/servercore:ltsc2019"),
            ("2022", "mcr.microsoft.com/windows/servercore:ltsc2022"),
        ],
    },
    FamilyTable {
        family: "linux",
        aliases: &[],
        default: "ubuntu:latest",
        versions: &[],
    },
];

/// Which rule produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Exact,
    FamilyDefault,
    GlobalDefault,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResolutionSource::Exact => "exact version match",
            ResolutionSource::FamilyDefault => "family default",
            ResolutionSource::GlobalDefault => "global default",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub image: &'static str,
    pub source: ResolutionSource,
}

/// Recommended base image for `(family, version)`
pub fn resolve(family: &str, version: &str) -> &'static str {
    resolve_detailed(family, version).image
}

/// Like [`resolve`], also reporting which rule matched
pub fn resolve_detailed(family: &str, version: &str) -> Resolution {
    let Some(table) = find_family(family) else {
        return Resolution {
            image: GLOBAL_DEFAULT_IMAGE,
            source: ResolutionSource::GlobalDefault,
        };
    };

    match table.lookup(version) {
        Some(image) => Resolution {
            image,
            source: ResolutionSource::Exact,
        },
        None => Resolution {
            image: table.default,
            source: ResolutionSource::FamilyDefault,
        },
    }
}

fn find_family(family: &str) -> Option<&'static FamilyTable> {
    let family = normalize_family(family);
    if family.is_empty() {
        return None;
    }

    // "centos linux" and similar OS names still select their family
    FAMILIES.iter().find(|t| t.matches(&family)).or_else(|| {
        FAMILIES.iter().find(|t| {
            family
                .strip_prefix(t.family)
                .is_some_and(|rest| rest.starts_with(' '))
        })
    })
}

/// Version strings to try, most specific first: the full version, its
/// major component, then (with `all_tokens`) every remaining token
fn version_candidates(version: &str, all_tokens: bool) -> Vec<String> {
    let version = version.trim().to_lowercase();
    if version.is_empty() {
        return Vec::new();
    }

    let mut tokens = version
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut candidates = vec![version.clone()];
    candidates.extend(tokens.next());
    if all_tokens {
        candidates.extend(tokens);
    }

    let mut seen = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.contains(&candidate) {
            seen.push(candidate);
        }
    }
    seen
}
