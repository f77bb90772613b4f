//! Device identifier resolution.
//!
//! The identifier is part of every reading's dedupe key, so it has to be
//! stable across reboots: the systemd machine id when there is one, the
//! kernel hostname otherwise.

use std::fs;
use std::path::Path;

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Last-resort identifier when neither source is readable
pub const FALLBACK_DEVICE_ID: &str = "unknown-device";

/// Resolve the device identifier, preferring an explicit override
pub fn resolve_device_id(configured: Option<&str>) -> String {
    configured
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| device_id_from(Path::new(MACHINE_ID_PATH), Path::new(HOSTNAME_PATH)))
}

fn device_id_from(machine_id: &Path, hostname: &Path) -> String {
    read_trimmed(machine_id)
        .or_else(|| read_trimmed(hostname))
        .unwrap_or_else(|| FALLBACK_DEVICE_ID.to_string())
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_configured_id_wins() {
        assert_eq!(resolve_device_id(Some(" bedroom-pi ")), "bedroom-pi");
    }

    #[test]
    fn test_blank_configured_id_falls_through() {
        assert!(!resolve_device_id(Some("  ")).is_empty());
    }

    #[test]
    fn test_machine_id_preferred_over_hostname() {
        let dir = TempDir::new().unwrap();
        let machine_id = dir.path().join("machine-id");
        let hostname = dir.path().join("hostname");
        fs::write(&machine_id, "0123456789abcdef\n").unwrap();
        fs::write(&hostname, "raspberrypi\n").unwrap();

        assert_eq!(device_id_from(&machine_id, &hostname), "0123456789abcdef");
    }

    #[test]
    fn test_hostname_fallback() {
        let dir = TempDir::new().unwrap();
        let machine_id = dir.path().join("machine-id");
        let hostname = dir.path().join("hostname");
        fs::write(&machine_id, "\n").unwrap();
        fs::write(&hostname, "raspberrypi\n").unwrap();

        assert_eq!(device_id_from(&machine_id, &hostname), "raspberrypi");
    }

    #[test]
    fn test_last_resort_fallback() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            device_id_from(&dir.path().join("a"), &dir.path().join("b")),
            FALLBACK_DEVICE_ID
        );
    }
}
