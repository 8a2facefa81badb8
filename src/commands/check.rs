//! System check command implementation.
//!
//! Validates that the host provides everything a collection cycle needs:
//! the virsh management command, the scheduler tick constant, and the
//! /proc accounting sources.

use anyhow::Result;

use crate::accounting::{clock_ticks_per_second, ProcSampler};
use crate::virt::{parse_domain_names, DomainSource, VirshSource};

/// Implements the `check` subcommand.
pub fn command_check(virsh: bool, proc: bool, all: bool) -> Result<()> {
    println!("🔍 KVirt CPU Exporter - System Check");
    println!("====================================");

    let mut all_ok = true;

    // Nothing selected behaves like --all.
    let everything = all || !(virsh || proc);

    // Check scheduler tick constant and /proc accounting sources
    if proc || everything {
        println!("\n📁 Checking /proc accounting sources...");
        match clock_ticks_per_second() {
            Ok(ticks) => println!("   ✅ sysconf(_SC_CLK_TCK) = {} ticks/second", ticks),
            Err(e) => {
                println!("   ❌ Cannot resolve scheduler tick constant: {}", e);
                all_ok = false;
            }
        }

        let sampler = ProcSampler::default();
        match sampler.host_iowait_ticks() {
            Ok(iowait) => println!("   ✅ Host iowait counter readable ({} ticks)", iowait),
            Err(e) => {
                println!("   ❌ Cannot read host iowait counter: {}", e);
                all_ok = false;
            }
        }

        let self_pid = std::process::id();
        match sampler.task_ticks(self_pid) {
            Ok(ticks) => println!(
                "   ✅ Per-task accounting readable (self: user={} system={})",
                ticks.user, ticks.system
            ),
            Err(e) => {
                println!("   ❌ Cannot read per-task accounting: {}", e);
                all_ok = false;
            }
        }
    }

    // Check virsh availability
    if virsh || everything {
        println!("\n🖥️ Checking virsh management layer...");
        let source = VirshSource;
        match source.list_domains() {
            Ok(listing) => {
                let names = parse_domain_names(&listing);
                println!("   ✅ virsh reachable, {} running VM(s)", names.len());
                for name in names.iter().take(5) {
                    println!("      - {}", name);
                }
            }
            Err(e) => {
                println!("   ❌ virsh enumeration failed: {}", e);
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("✅ All checks passed");
        Ok(())
    } else {
        println!("❌ Some checks failed");
        std::process::exit(1);
    }
}
