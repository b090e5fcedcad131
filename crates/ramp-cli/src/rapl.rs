//! Energy meter over Linux RAPL powercap counters.
//!
//! Only top-level package domains (`intel-rapl:N`) are read; subdomains are
//! already included in their package. Hosts without readable counters get
//! sessions that finish with a degraded zero reading.

use std::path::{Path, PathBuf};

use ramp_core::{EnergyMeter, EnergyReading, EnergySession, GridFactor};

pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

/// Microjoules in one kWh.
const UJ_PER_KWH: f64 = 3.6e12;

#[derive(Debug, Clone)]
struct Domain {
    energy: PathBuf,
    max_range_uj: u64,
}

impl Domain {
    fn read(&self) -> Option<u64> {
        read_u64(&self.energy)
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_package_domain(name: &str) -> bool {
    name.strip_prefix("intel-rapl:")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains(':'))
}

#[derive(Debug, Clone)]
pub struct RaplMeter {
    domains: Vec<Domain>,
    grid: GridFactor,
}

impl RaplMeter {
    pub fn discover(root: &Path, grid: GridFactor) -> Self {
        let mut domains = Vec::new();
        if let Ok(entries) = std::fs::read_dir(root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !is_package_domain(&name) {
                    continue;
                }
                let dir = entry.path();
                let energy = dir.join("energy_uj");
                if read_u64(&energy).is_none() {
                    tracing::debug!(domain = %name, "RAPL counter not readable");
                    continue;
                }
                domains.push(Domain {
                    energy,
                    max_range_uj: read_u64(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX),
                });
            }
        }
        if domains.is_empty() {
            tracing::warn!("no readable RAPL counters, local energy falls back to estimates");
        } else {
            tracing::debug!(domains = domains.len(), "RAPL counters found");
        }
        Self { domains, grid }
    }

    pub fn is_available(&self) -> bool {
        !self.domains.is_empty()
    }
}

struct RaplSession {
    domains: Vec<Domain>,
    start: Vec<Option<u64>>,
    grid: GridFactor,
}

/// Counter delta across a single wraparound.
fn delta(start: u64, end: u64, max_range: u64) -> u64 {
    if end >= start {
        end - start
    } else {
        max_range.saturating_sub(start).saturating_add(end)
    }
}

impl EnergySession for RaplSession {
    fn finish(self: Box<Self>) -> EnergyReading {
        if self.domains.is_empty() {
            return EnergyReading::unavailable();
        }
        let mut total_uj = 0u64;
        for (domain, start) in self.domains.iter().zip(&self.start) {
            match (start, domain.read()) {
                (Some(s), Some(e)) => total_uj += delta(*s, e, domain.max_range_uj),
                _ => return EnergyReading::unavailable(),
            }
        }
        self.grid.reading(total_uj as f64 / UJ_PER_KWH)
    }
}

impl EnergyMeter for RaplMeter {
    fn open(&self) -> Box<dyn EnergySession> {
        Box::new(RaplSession {
            start: self.domains.iter().map(Domain::read).collect(),
            domains: self.domains.clone(),
            grid: self.grid,
        })
    }
}
