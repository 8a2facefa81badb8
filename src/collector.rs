//! Per-VM CPU utilization sampling.
//!
//! A collection cycle enumerates running VMs, resolves each VM's vCPU
//! count and QEMU host PID, then takes two time-separated snapshots of
//! per-task CPU accounting plus host iowait and converts the tick deltas
//! into percentages normalized by vCPU count. Every per-VM failure skips
//! that VM for the current cycle only; nothing is retried within a cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::accounting::{ProcSampler, TaskTicks};
use crate::error::CollectError;
use crate::metrics::VmCpuMetrics;
use crate::virt::{find_qemu_pid, parse_domain_names, parse_vcpu_count, DomainSource};

/// One point-in-time reading of all counters a VM's computation needs.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub tasks: TaskTicks,
    pub host_iowait: u64,
}

/// Derived percentages for one VM over one sample window.
///
/// Values are floored at 0 but deliberately not capped at 100: a VM that
/// spans more tick-capacity than the sampled window (scheduler skew) can
/// legitimately exceed 100%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilization {
    pub user_pct: f64,
    pub system_pct: f64,
    pub iowait_pct: f64,
}

/// A VM whose metadata resolved successfully for this cycle.
#[derive(Debug, Clone)]
struct VmTarget {
    name: String,
    vcpus: u32,
    pid: u32,
}

/// Outcome counters for one collection cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    /// VMs returned by the enumerator.
    pub vms_listed: usize,
    /// VMs whose percentages were published this cycle.
    pub vms_published: usize,
}

/// Converts two snapshots into clamped percentages.
///
/// `total_interval` is the tick capacity available across all vCPUs
/// during the window: ticks-per-second x window-seconds x vCPU count.
/// With the default 100 ms window this is `(clk_tck / 10) * vcpus`.
pub fn utilization(
    first: Snapshot,
    second: Snapshot,
    ticks_per_second: u64,
    vcpus: u32,
    window: Duration,
) -> Utilization {
    let total_interval = ticks_per_second as f64 * window.as_secs_f64() * vcpus as f64;

    let pct = |before: u64, after: u64| -> f64 {
        let delta = after as i64 - before as i64;
        // Clamp negative deltas (counter reset, task-set churn) to zero.
        (delta as f64 * 100.0 / total_interval).max(0.0)
    };

    Utilization {
        user_pct: pct(first.tasks.user, second.tasks.user),
        system_pct: pct(first.tasks.system, second.tasks.system),
        iowait_pct: pct(first.host_iowait, second.host_iowait),
    }
}

/// Drives the whole sampling pipeline and publishes to the gauge sink.
pub struct VmCpuCollector {
    source: Arc<dyn DomainSource>,
    sampler: ProcSampler,
    metrics: VmCpuMetrics,
    ticks_per_second: u64,
    sample_window: Duration,
    prune_stale: bool,
    /// VM labels currently live in the sink, for optional eviction.
    published: HashSet<String>,
}

impl VmCpuCollector {
    pub fn new(
        source: Arc<dyn DomainSource>,
        sampler: ProcSampler,
        metrics: VmCpuMetrics,
        ticks_per_second: u64,
        sample_window: Duration,
        prune_stale: bool,
    ) -> Self {
        Self {
            source,
            sampler,
            metrics,
            ticks_per_second,
            sample_window,
            prune_stale,
            published: HashSet::new(),
        }
    }

    /// Runs one collection cycle over all currently running VMs.
    ///
    /// Only an enumeration failure is returned; every per-VM failure is
    /// logged and skipped so the remaining VMs still publish. Each VM's
    /// sampling runs as its own task, so the cycle costs roughly one
    /// sample window regardless of VM count.
    pub async fn collect_cycle(&mut self) -> Result<CycleSummary, CollectError> {
        let listing = self.source.list_domains()?;
        let names = parse_domain_names(&listing);

        let mut targets = Vec::with_capacity(names.len());
        for name in &names {
            match self.resolve_target(name) {
                Ok(Some(target)) => targets.push(target),
                Ok(None) => {}
                Err(e) => warn!("skipping vm {} this cycle: {}", name, e),
            }
        }

        let mut tasks: JoinSet<Option<String>> = JoinSet::new();
        for target in targets {
            let sampler = self.sampler.clone();
            let metrics = self.metrics.clone();
            let ticks = self.ticks_per_second;
            let window = self.sample_window;
            tasks.spawn(async move {
                match sample_vm(&sampler, &target, ticks, window).await {
                    Ok(sample) => {
                        debug!(
                            "vm {} | user: {:.2}% | system: {:.2}% | iowait: {:.2}%",
                            target.name, sample.user_pct, sample.system_pct, sample.iowait_pct
                        );
                        metrics.set_for_vm(&target.name, &sample);
                        Some(target.name)
                    }
                    Err(e) => {
                        warn!("skipping vm {} this cycle: {}", target.name, e);
                        None
                    }
                }
            });
        }

        let mut seen = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(name)) => {
                    seen.insert(name);
                }
                Ok(None) => {}
                Err(e) => warn!("vm sampling task failed: {}", e),
            }
        }

        let summary = CycleSummary {
            vms_listed: names.len(),
            vms_published: seen.len(),
        };

        if self.prune_stale {
            for stale in self.published.difference(&seen) {
                debug!("evicting stale vm label {}", stale);
                self.metrics.remove_vm(stale);
            }
            self.published = seen;
        } else {
            // Parity with the never-prune sink behavior: labels accumulate.
            self.published.extend(seen);
        }

        Ok(summary)
    }

    /// Resolves vCPU count and host PID for one VM.
    ///
    /// `Ok(None)` means the VM is legitimately not sampleable right now
    /// (zero vCPUs reported, or no matching QEMU process) and is skipped
    /// without being treated as a failure.
    fn resolve_target(&self, name: &str) -> Result<Option<VmTarget>, CollectError> {
        let info = self.source.domain_info(name)?;
        let vcpus = parse_vcpu_count(&info);
        if vcpus == 0 {
            debug!("vm {} reports 0 vcpus, not ready; skipping", name);
            return Ok(None);
        }

        let table = self.source.process_table()?;
        let pid = match find_qemu_pid(&table, name) {
            Some(pid) => pid,
            None => {
                debug!("no qemu process found for vm {}; skipping", name);
                return Ok(None);
            }
        };

        Ok(Some(VmTarget {
            name: name.to_string(),
            vcpus,
            pid,
        }))
    }
}

/// Takes the two snapshots for one VM and derives its percentages.
async fn sample_vm(
    sampler: &ProcSampler,
    target: &VmTarget,
    ticks_per_second: u64,
    window: Duration,
) -> Result<Utilization, CollectError> {
    let first = snapshot(sampler, target.pid)?;
    tokio::time::sleep(window).await;
    let second = snapshot(sampler, target.pid)?;
    Ok(utilization(
        first,
        second,
        ticks_per_second,
        target.vcpus,
        window,
    ))
}

/// Reads task accounting and host iowait as close together as practical.
fn snapshot(sampler: &ProcSampler, pid: u32) -> Result<Snapshot, CollectError> {
    Ok(Snapshot {
        tasks: sampler.task_ticks(pid)?,
        host_iowait: sampler.host_iowait_ticks()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    fn snap(user: u64, system: u64, iowait: u64) -> Snapshot {
        Snapshot {
            tasks: TaskTicks { user, system },
            host_iowait: iowait,
        }
    }

    #[test]
    fn test_utilization_scenario_from_deltas() {
        // clk_tck=100, vcpus=2, 100ms window -> total_interval = 20 ticks.
        let first = snap(100, 50, 10);
        let second = snap(105, 50, 10);
        let u = utilization(first, second, 100, 2, Duration::from_millis(100));
        assert_eq!(u.user_pct, 25.0);
        assert_eq!(u.system_pct, 0.0);
        assert_eq!(u.iowait_pct, 0.0);
    }

    #[test]
    fn test_utilization_negative_delta_clamped() {
        // Second snapshot smaller than the first (counter anomaly).
        let first = snap(100, 53, 10);
        let second = snap(100, 50, 10);
        let u = utilization(first, second, 100, 2, Duration::from_millis(100));
        assert_eq!(u.system_pct, 0.0);
    }

    #[test]
    fn test_utilization_identical_counters_is_zero() {
        let s = snap(1234, 5678, 90);
        let u = utilization(s, s, 100, 4, Duration::from_millis(100));
        assert_eq!(
            u,
            Utilization {
                user_pct: 0.0,
                system_pct: 0.0,
                iowait_pct: 0.0
            }
        );
    }

    #[test]
    fn test_utilization_can_exceed_100_percent() {
        // 30 user ticks against a 20-tick window: published as 150, uncapped.
        let u = utilization(
            snap(0, 0, 0),
            snap(30, 0, 0),
            100,
            2,
            Duration::from_millis(100),
        );
        assert_eq!(u.user_pct, 150.0);
    }

    /// Fixture source returning canned command output.
    struct FixtureSource {
        listing: Mutex<String>,
        dominfo: String,
        ps: String,
    }

    impl FixtureSource {
        fn new(listing: &str, dominfo: &str, ps: &str) -> Self {
            Self {
                listing: Mutex::new(listing.to_string()),
                dominfo: dominfo.to_string(),
                ps: ps.to_string(),
            }
        }
    }

    impl DomainSource for FixtureSource {
        fn list_domains(&self) -> Result<String, CollectError> {
            Ok(self.listing.lock().unwrap().clone())
        }
        fn domain_info(&self, _vm: &str) -> Result<String, CollectError> {
            Ok(self.dominfo.clone())
        }
        fn process_table(&self) -> Result<String, CollectError> {
            Ok(self.ps.clone())
        }
    }

    /// Source whose metadata lookup fails for one named VM.
    struct FlakyMetadataSource {
        inner: FixtureSource,
        failing: String,
    }

    impl DomainSource for FlakyMetadataSource {
        fn list_domains(&self) -> Result<String, CollectError> {
            self.inner.list_domains()
        }
        fn domain_info(&self, vm: &str) -> Result<String, CollectError> {
            if vm == self.failing {
                return Err(CollectError::Metadata(format!("virsh dominfo {}: timed out", vm)));
            }
            self.inner.domain_info(vm)
        }
        fn process_table(&self) -> Result<String, CollectError> {
            self.inner.process_table()
        }
    }

    /// Source whose enumeration always fails.
    struct BrokenSource;

    impl DomainSource for BrokenSource {
        fn list_domains(&self) -> Result<String, CollectError> {
            Err(CollectError::Discovery("virsh unavailable".into()))
        }
        fn domain_info(&self, _vm: &str) -> Result<String, CollectError> {
            unreachable!("enumeration fails first")
        }
        fn process_table(&self) -> Result<String, CollectError> {
            unreachable!("enumeration fails first")
        }
    }

    fn write_task_stat(root: &Path, pid: u32, utime: u64, stime: u64) {
        let tid_dir = root.join(pid.to_string()).join("task").join(pid.to_string());
        fs::create_dir_all(&tid_dir).unwrap();
        let line = format!(
            "{pid} (qemu-system-x86) S 1 1 1 0 -1 0 0 0 0 0 {utime} {stime} 0 0 20 0 1 0 0 \
             0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
        );
        fs::write(tid_dir.join("stat"), line).unwrap();
    }

    fn gauge_value(registry: &Registry, metric: &str, vm: &str) -> Option<f64> {
        registry
            .gather()
            .iter()
            .find(|mf| mf.name() == metric)?
            .metric
            .iter()
            .find(|m| m.label.iter().any(|l| l.value() == vm))
            .map(|m| m.gauge.value())
    }

    fn collector_with(
        source: Arc<dyn DomainSource>,
        root: &Path,
        prune_stale: bool,
    ) -> (VmCpuCollector, Registry) {
        let registry = Registry::new();
        let metrics = VmCpuMetrics::new(&registry).unwrap();
        let collector = VmCpuCollector::new(
            source,
            ProcSampler::new(root),
            metrics,
            100,
            Duration::from_millis(5),
            prune_stale,
        );
        (collector, registry)
    }

    const TWO_VM_PS: &str =
        "root 4242 0.0 1.0 100 200 ? Sl Jan01 0:01 /usr/bin/qemu-system-x86_64 -name alpha\n";

    #[tokio::test]
    async fn test_cycle_publishes_resolvable_vms_and_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        // Only "alpha" has a qemu process; "beta" is listed but unmatched.
        write_task_stat(dir.path(), 4242, 500, 100);
        fs::write(dir.path().join("stat"), "cpu 1 2 3 4 50 6 7 0 0 0\n").unwrap();

        let source = Arc::new(FixtureSource::new(
            "alpha\nbeta\n\n",
            "Name: alpha\nCPU(s): 2\nState: running\n",
            TWO_VM_PS,
        ));
        let (mut collector, registry) = collector_with(source, dir.path(), false);

        let summary = collector.collect_cycle().await.unwrap();
        assert_eq!(summary.vms_listed, 2);
        assert_eq!(summary.vms_published, 1);

        // Counters unchanged across the window: all three gauges read 0.
        for metric in [
            "vm_cpu_user_percent",
            "vm_cpu_system_percent",
            "vm_cpu_iowait_percent",
        ] {
            assert_eq!(gauge_value(&registry, metric, "alpha"), Some(0.0));
            assert_eq!(gauge_value(&registry, metric, "beta"), None);
        }
    }

    #[tokio::test]
    async fn test_cycle_metadata_failure_skips_only_that_vm() {
        let dir = tempfile::tempdir().unwrap();
        write_task_stat(dir.path(), 4242, 500, 100);
        fs::write(dir.path().join("stat"), "cpu 1 2 3 4 50 6 7 0 0 0\n").unwrap();

        // "beta" fails metadata lookup; "alpha" must still publish.
        let source = Arc::new(FlakyMetadataSource {
            inner: FixtureSource::new(
                "alpha\nbeta\n",
                "Name: alpha\nCPU(s): 2\nState: running\n",
                TWO_VM_PS,
            ),
            failing: "beta".to_string(),
        });
        let (mut collector, registry) = collector_with(source, dir.path(), false);

        let summary = collector.collect_cycle().await.unwrap();
        assert_eq!(summary.vms_listed, 2);
        assert_eq!(summary.vms_published, 1);
        assert_eq!(
            gauge_value(&registry, "vm_cpu_user_percent", "alpha"),
            Some(0.0)
        );
        assert_eq!(gauge_value(&registry, "vm_cpu_user_percent", "beta"), None);
    }

    #[tokio::test]
    async fn test_cycle_empty_enumeration_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FixtureSource::new("", "", ""));
        let (mut collector, registry) = collector_with(source, dir.path(), false);

        let summary = collector.collect_cycle().await.unwrap();
        assert_eq!(summary.vms_listed, 0);
        assert_eq!(summary.vms_published, 0);
        assert!(registry.gather().iter().all(|mf| mf.metric.is_empty()));
    }

    #[tokio::test]
    async fn test_cycle_zero_vcpus_is_skipped_without_sink_writes() {
        let dir = tempfile::tempdir().unwrap();
        write_task_stat(dir.path(), 4242, 1, 1);
        fs::write(dir.path().join("stat"), "cpu 1 2 3 4 50 6 7 0 0 0\n").unwrap();

        // dominfo output lacks the CPU(s) attribute entirely.
        let source = Arc::new(FixtureSource::new(
            "alpha\n",
            "Name: alpha\nState: running\n",
            TWO_VM_PS,
        ));
        let (mut collector, registry) = collector_with(source, dir.path(), false);

        let summary = collector.collect_cycle().await.unwrap();
        assert_eq!(summary.vms_published, 0);
        assert_eq!(gauge_value(&registry, "vm_cpu_user_percent", "alpha"), None);
    }

    #[tokio::test]
    async fn test_cycle_discovery_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let (mut collector, _registry) = collector_with(Arc::new(BrokenSource), dir.path(), false);
        let err = collector.collect_cycle().await.unwrap_err();
        assert_eq!(err.kind(), "discovery");
    }

    #[tokio::test]
    async fn test_stale_labels_survive_by_default_and_prune_when_enabled() {
        for (prune, expect_after) in [(false, Some(0.0)), (true, None)] {
            let dir = tempfile::tempdir().unwrap();
            write_task_stat(dir.path(), 4242, 500, 100);
            fs::write(dir.path().join("stat"), "cpu 1 2 3 4 50 6 7 0 0 0\n").unwrap();

            let source = Arc::new(FixtureSource::new(
                "alpha\n",
                "Name: alpha\nCPU(s): 1\n",
                TWO_VM_PS,
            ));
            let (mut collector, registry) =
                collector_with(source.clone(), dir.path(), prune);

            collector.collect_cycle().await.unwrap();
            assert_eq!(
                gauge_value(&registry, "vm_cpu_user_percent", "alpha"),
                Some(0.0)
            );

            // The VM disappears before the next cycle.
            *source.listing.lock().unwrap() = String::new();
            collector.collect_cycle().await.unwrap();
            assert_eq!(
                gauge_value(&registry, "vm_cpu_user_percent", "alpha"),
                expect_after
            );
        }
    }
}
