//! Prometheus metrics definitions for kvirt-cpu-exporter.
//!
//! This module defines the per-VM utilization gauges plus the internal
//! exporter telemetry gauges published alongside them.

use prometheus::{Gauge, GaugeVec, Opts, Registry};

use crate::collector::Utilization;

/// Per-VM CPU utilization gauges, keyed by the `vm` label.
#[derive(Clone)]
pub struct VmCpuMetrics {
    pub user: GaugeVec,
    pub system: GaugeVec,
    pub iowait: GaugeVec,
}

impl VmCpuMetrics {
    /// Creates and registers the three utilization gauges with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let labels = &["vm"];

        let user = GaugeVec::new(
            Opts::new("vm_cpu_user_percent", "User CPU usage percentage for VM"),
            labels,
        )?;
        let system = GaugeVec::new(
            Opts::new("vm_cpu_system_percent", "System CPU usage percentage for VM"),
            labels,
        )?;
        let iowait = GaugeVec::new(
            Opts::new(
                "vm_cpu_iowait_percent",
                "Iowait CPU usage percentage for VM (host-wide iowait delta \
                 normalized by this VM's vCPU capacity)",
            ),
            labels,
        )?;

        registry.register(Box::new(user.clone()))?;
        registry.register(Box::new(system.clone()))?;
        registry.register(Box::new(iowait.clone()))?;

        Ok(Self {
            user,
            system,
            iowait,
        })
    }

    /// Upserts the three percentages for one VM.
    pub fn set_for_vm(&self, vm: &str, sample: &Utilization) {
        let labels = &[vm];
        self.user.with_label_values(labels).set(sample.user_pct);
        self.system.with_label_values(labels).set(sample.system_pct);
        self.iowait.with_label_values(labels).set(sample.iowait_pct);
    }

    /// Drops the label series of a VM no longer present.
    pub fn remove_vm(&self, vm: &str) {
        let labels = &[vm];
        // A series may be absent if a previous cycle only partially
        // published; removal of a missing series is not an error here.
        let _ = self.user.remove_label_values(labels);
        let _ = self.system.remove_label_values(labels);
        let _ = self.iowait.remove_label_values(labels);
    }
}

/// Internal exporter telemetry, one value per collection cycle.
#[derive(Clone)]
pub struct ExporterTelemetry {
    pub cycle_duration: Gauge,
    pub vms_total: Gauge,
    pub cycle_success: Gauge,
}

impl ExporterTelemetry {
    /// Creates and registers the telemetry gauges with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let cycle_duration = Gauge::new(
            "kvirt_exporter_cycle_duration_seconds",
            "Time spent running the last VM collection cycle",
        )?;
        let vms_total = Gauge::new(
            "kvirt_exporter_vms_total",
            "Number of VMs published in the last collection cycle",
        )?;
        let cycle_success = Gauge::new(
            "kvirt_exporter_cycle_success",
            "Whether the last collection cycle completed (1) or was abandoned (0)",
        )?;

        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(vms_total.clone()))?;
        registry.register(Box::new(cycle_success.clone()))?;

        Ok(Self {
            cycle_duration,
            vms_total,
            cycle_success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_remove_vm_series() {
        let registry = Registry::new();
        let metrics = VmCpuMetrics::new(&registry).unwrap();

        metrics.set_for_vm(
            "alpha",
            &Utilization {
                user_pct: 25.0,
                system_pct: 5.0,
                iowait_pct: 1.5,
            },
        );
        assert_eq!(metrics.user.with_label_values(&["alpha"]).get(), 25.0);
        assert_eq!(metrics.system.with_label_values(&["alpha"]).get(), 5.0);
        assert_eq!(metrics.iowait.with_label_values(&["alpha"]).get(), 1.5);

        metrics.remove_vm("alpha");
        let families = registry.gather();
        assert!(families
            .iter()
            .filter(|mf| mf.name().starts_with("vm_cpu_"))
            .all(|mf| mf.metric.is_empty()));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        VmCpuMetrics::new(&registry).unwrap();
        assert!(VmCpuMetrics::new(&registry).is_err());
    }
}
