//! Host memory probe backed by `sysinfo`, with optional NVIDIA VRAM readings.

use std::process::Command;
use std::time::Duration;

use sysinfo::{MemoryRefreshKind, ProcessesToUpdate, RefreshKind, System};

use ramp_core::{MemoryProbe, ResourceSample};

/// Sums resident memory of every process whose name contains `pattern`
/// (the engine server plus its runner children).
pub struct HostProbe {
    sys: System,
    pattern: String,
    nvidia: bool,
}

impl HostProbe {
    pub fn new(pattern: &str) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        let nvidia = query_nvidia().is_some();
        tracing::debug!(pattern, nvidia, "host probe ready");
        Self {
            sys,
            pattern: pattern.to_lowercase(),
            nvidia,
        }
    }

    fn process_rss(&mut self) -> u64 {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        self.sys
            .processes()
            .values()
            .filter(|p| {
                p.name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&self.pattern)
            })
            .map(|p| p.memory())
            .sum()
    }

    fn accelerator_used(&mut self) -> Option<u64> {
        if !self.nvidia {
            return None;
        }
        let used = query_nvidia();
        if used.is_none() {
            tracing::warn!("nvidia-smi stopped answering, VRAM sampling disabled");
            self.nvidia = false;
        }
        used
    }
}

impl MemoryProbe for HostProbe {
    fn sample(&mut self) -> ResourceSample {
        self.sys.refresh_memory();
        let process_rss_bytes = self.process_rss();
        ResourceSample {
            at: Duration::ZERO,
            process_rss_bytes,
            system_used_bytes: self.sys.used_memory(),
            available_bytes: self.sys.available_memory(),
            accelerator_used_bytes: self.accelerator_used(),
        }
    }

    fn available_bytes(&mut self) -> u64 {
        self.sys.refresh_memory();
        self.sys.available_memory()
    }
}

fn query_nvidia() -> Option<u64> {
    let out = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.used", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    parse_nvidia_smi(&String::from_utf8_lossy(&out.stdout))
}

/// Sum of `memory.used` (MiB) across GPUs, in bytes.
pub fn parse_nvidia_smi(output: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut seen = false;
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mib: u64 = line.parse().ok()?;
        total += mib * 1024 * 1024;
        seen = true;
    }
    seen.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        assert_eq!(parse_nvidia_smi("1024\n"), Some(1 << 30));
        assert_eq!(parse_nvidia_smi("512\n512\n"), Some(1 << 30));
        assert_eq!(parse_nvidia_smi(""), None);
        assert_eq!(parse_nvidia_smi("[N/A]"), None);
    }

    #[test]
    fn test_host_probe_reads_system_memory() {
        let mut probe = HostProbe::new("ramp-test-no-such-process");
        let s = probe.sample();
        assert!(s.available_bytes > 0);
        assert_eq!(s.process_rss_bytes, 0);
        assert!(probe.available_bytes() > 0);
    }
}
