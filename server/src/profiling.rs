//! Optional CPU and heap profiling toggled from the command line
//!
//! Heap profiling uses dhat and is only compiled in with the `dhat-heap`
//! feature, which also installs `dhat::Alloc` as the binary's global
//! allocator. CPU profiling samples this process with sysinfo
//! and logs a summary when the server stops.

use log::{info, warn};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregated CPU/memory samples of the server process
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UsageSummary {
    pub samples: u32,
    pub avg_cpu_percent: f32,
    pub peak_cpu_percent: f32,
    pub peak_memory_bytes: u64,
}

impl UsageSummary {
    pub fn record(&mut self, cpu_percent: f32, memory_bytes: u64) {
        let total = self.avg_cpu_percent * self.samples as f32 + cpu_percent;
        self.samples += 1;
        self.avg_cpu_percent = total / self.samples as f32;
        self.peak_cpu_percent = self.peak_cpu_percent.max(cpu_percent);
        self.peak_memory_bytes = self.peak_memory_bytes.max(memory_bytes);
    }
}

/// Background sampler started by `--cpuprofile`
pub struct CpuSampler {
    stop: watch::Sender<bool>,
    task: JoinHandle<UsageSummary>,
    started: Instant,
}

impl CpuSampler {
    pub fn start() -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let pid = Pid::from_u32(std::process::id());

        let task = tokio::spawn(async move {
            let mut system = System::new();
            let mut summary = UsageSummary::default();
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            // The first CPU reading is always zero; prime it.
            refresh(&mut system, pid);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        refresh(&mut system, pid);
                        if let Some(process) = system.process(pid) {
                            summary.record(process.cpu_usage(), process.memory());
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            summary
        });

        info!("Profiling CPU every {:?}", SAMPLE_INTERVAL);
        Self {
            stop,
            task,
            started: Instant::now(),
        }
    }

    pub async fn finish(self) -> UsageSummary {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(summary) => {
                info!(
                    "CPU profile over {:.1}s: {} samples, avg {:.1}%, peak {:.1}%, peak rss {} MB",
                    self.started.elapsed().as_secs_f32(),
                    summary.samples,
                    summary.avg_cpu_percent,
                    summary.peak_cpu_percent,
                    summary.peak_memory_bytes / 1024 / 1024
                );
                summary
            }
            Err(e) => {
                warn!("CPU sampler failed: {}", e);
                UsageSummary::default()
            }
        }
    }
}

fn refresh(system: &mut System, pid: Pid) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
    );
}

#[derive(Debug, Error)]
pub enum ProfilingError {
    #[error("--memprofile needs a server built with `--features dhat-heap`")]
    HeapProfilerUnavailable,
}

/// Heap profiler started by `--memprofile`; writes `dhat-heap.json` on drop
pub struct HeapProfiler {
    #[cfg(feature = "dhat-heap")]
    _profiler: dhat::Profiler,
}

#[cfg(feature = "dhat-heap")]
pub fn start_heap_profiler() -> Result<HeapProfiler, ProfilingError> {
    info!("Profiling heap, report goes to dhat-heap.json");
    Ok(HeapProfiler {
        _profiler: dhat::Profiler::new_heap(),
    })
}

#[cfg(not(feature = "dhat-heap"))]
pub fn start_heap_profiler() -> Result<HeapProfiler, ProfilingError> {
    Err(ProfilingError::HeapProfilerUnavailable)
}
