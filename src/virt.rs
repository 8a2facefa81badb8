//! VM discovery via the libvirt management layer and the process table.
//!
//! The external commands are hidden behind the `DomainSource` trait so the
//! collector can be driven by fixture text in tests. Parsing of each
//! command's output is kept in a narrow free function with an explicit
//! field contract, since these are version-dependent text formats.

use std::process::Command;

use tracing::debug;

use crate::error::CollectError;

/// Command-line marker identifying the hypervisor runtime process.
const QEMU_MARKER: &str = "qemu-system";
/// Attribute line in `virsh dominfo` output naming the vCPU count.
const VCPU_ATTRIBUTE: &str = "CPU(s)";

/// Raw text sources for VM enumeration and metadata.
///
/// Implementations return the command output as text; all interpretation
/// happens in the parsing functions below.
pub trait DomainSource: Send + Sync {
    /// Output of the management-layer enumeration (one VM name per line).
    fn list_domains(&self) -> Result<String, CollectError>;

    /// Structured key/value metadata for one VM.
    fn domain_info(&self, vm: &str) -> Result<String, CollectError>;

    /// The host process table, one process record per line.
    fn process_table(&self) -> Result<String, CollectError>;
}

/// Production source shelling out to `virsh` and `ps`.
#[derive(Debug, Clone, Default)]
pub struct VirshSource;

impl VirshSource {
    fn run(program: &str, args: &[&str]) -> Result<String, std::io::Error> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DomainSource for VirshSource {
    fn list_domains(&self) -> Result<String, CollectError> {
        Self::run("virsh", &["list", "--name"])
            .map_err(|e| CollectError::Discovery(format!("virsh list --name: {}", e)))
    }

    fn domain_info(&self, vm: &str) -> Result<String, CollectError> {
        Self::run("virsh", &["dominfo", vm])
            .map_err(|e| CollectError::Metadata(format!("virsh dominfo {}: {}", vm, e)))
    }

    fn process_table(&self) -> Result<String, CollectError> {
        Self::run("ps", &["aux"])
            .map_err(|e| CollectError::Metadata(format!("ps aux: {}", e)))
    }
}

/// Parses the enumeration output into VM names, dropping blank lines.
pub fn parse_domain_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extracts the configured vCPU count from `virsh dominfo` output.
///
/// Locates the line naming the CPU-count attribute and parses its second
/// whitespace token. An absent attribute or empty output yields 0, which
/// callers treat as "not ready yet", not as an error.
pub fn parse_vcpu_count(output: &str) -> u32 {
    for line in output.lines() {
        if !line.contains(VCPU_ATTRIBUTE) {
            continue;
        }
        if let Some(token) = line.split_whitespace().nth(1) {
            if let Ok(count) = token.parse::<u32>() {
                return count;
            }
        }
    }
    0
}

/// Finds the host PID of the QEMU process executing `vm`.
///
/// Scans the process table for the first record mentioning both the
/// hypervisor runtime marker and the VM name; the PID is the second
/// whitespace token of that record. No match is not an error — the VM is
/// simply skipped this cycle.
pub fn find_qemu_pid(process_table: &str, vm: &str) -> Option<u32> {
    for line in process_table.lines() {
        if !(line.contains(QEMU_MARKER) && line.contains(vm)) {
            continue;
        }
        if let Some(token) = line.split_whitespace().nth(1) {
            match token.parse::<u32>() {
                Ok(pid) => return Some(pid),
                Err(e) => {
                    debug!("unparseable pid token '{}' for vm {}: {}", token, vm, e);
                    continue;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMINFO: &str = "Id:             7\n\
        Name:           web-frontend\n\
        UUID:           2f0c5e4a-9e1d-4b7e-9f3a-6d1a2b3c4d5e\n\
        OS Type:        hvm\n\
        State:          running\n\
        CPU(s):         4\n\
        CPU time:       8462.1s\n\
        Max memory:     8388608 KiB\n";

    const PS_AUX: &str = "USER  PID %CPU %MEM    VSZ   RSS TTY STAT START TIME COMMAND\n\
        root    1  0.0  0.1 171468 12744 ?   Ss   Jan01 0:04 /sbin/init\n\
        libvirt+ 31337 12.4  8.2 9217160 2705164 ? Sl Jan02 412:11 \
        /usr/bin/qemu-system-x86_64 -name guest=web-frontend,debug-threads=on -machine q35\n\
        libvirt+ 31400  3.1  4.0 5210000 1305160 ? Sl Jan02 99:01 \
        /usr/bin/qemu-system-x86_64 -name guest=db-primary -machine q35\n";

    #[test]
    fn test_parse_domain_names_filters_blank_lines() {
        let names = parse_domain_names("web-frontend\ndb-primary\n\n\n");
        assert_eq!(names, vec!["web-frontend", "db-primary"]);
    }

    #[test]
    fn test_parse_domain_names_empty_output() {
        assert!(parse_domain_names("").is_empty());
        assert!(parse_domain_names("\n\n").is_empty());
    }

    #[test]
    fn test_parse_vcpu_count() {
        assert_eq!(parse_vcpu_count(DOMINFO), 4);
    }

    #[test]
    fn test_parse_vcpu_count_absent_attribute_is_zero() {
        assert_eq!(parse_vcpu_count("Name: web-frontend\nState: running\n"), 0);
        assert_eq!(parse_vcpu_count(""), 0);
    }

    #[test]
    fn test_find_qemu_pid_matches_marker_and_name() {
        assert_eq!(find_qemu_pid(PS_AUX, "web-frontend"), Some(31337));
        assert_eq!(find_qemu_pid(PS_AUX, "db-primary"), Some(31400));
    }

    #[test]
    fn test_find_qemu_pid_no_match() {
        assert_eq!(find_qemu_pid(PS_AUX, "no-such-vm"), None);
        // Non-qemu processes mentioning the name must not match.
        assert_eq!(find_qemu_pid("root 99 0.0 0.0 vim web-frontend\n", "web-frontend"), None);
    }
}
