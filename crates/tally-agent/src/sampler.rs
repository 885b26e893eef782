//! Process and host gauge sampling.
//!
//! `SystemSampler` reads the current process and the host memory through
//! sysinfo, refreshing only what it reports.

use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};

/// Gauges every sample carries, in reporting order.
pub const GAUGE_NAMES: [&str; 11] = [
    "ProcessResidentBytes",
    "ProcessVirtualBytes",
    "ProcessCpuPercent",
    "ProcessThreads",
    "TotalMemory",
    "UsedMemory",
    "FreeMemory",
    "AvailableMemory",
    "TotalSwap",
    "UsedSwap",
    "RandomValue",
];

/// Source of one reading of the gauge set.
pub trait Sampler: Send {
    fn sample(&mut self) -> Vec<(String, f64)>;
}

/// Samples the running process and the host it runs on.
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_processes(ProcessRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "current pid unavailable, process gauges report zero");
                None
            }
        };
        Self { system, pid }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> Vec<(String, f64)> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }

        let (resident, virt, cpu, threads) = self
            .pid
            .and_then(|pid| self.system.process(pid))
            .map(|p| {
                (
                    p.memory() as f64,
                    p.virtual_memory() as f64,
                    f64::from(p.cpu_usage()),
                    p.tasks().map_or(1, |tasks| tasks.len()) as f64,
                )
            })
            .unwrap_or_default();

        let values = [
            resident,
            virt,
            cpu,
            threads,
            self.system.total_memory() as f64,
            self.system.used_memory() as f64,
            self.system.free_memory() as f64,
            self.system.available_memory() as f64,
            self.system.total_swap() as f64,
            self.system.used_swap() as f64,
            rand::random::<f64>(),
        ];

        let mut gauges: Vec<(String, f64)> = GAUGE_NAMES
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        for (i, core) in self.system.cpus().iter().enumerate() {
            gauges.push((format!("CPUutilization{}", i + 1), f64::from(core.cpu_usage())));
        }
        gauges
    }
}
