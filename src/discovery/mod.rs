//! Device discovery module
//!
//! Locates the serial device for an attached micro:bit by scanning a
//! device directory for entries with a known name prefix, and enumerates
//! serial ports for the `devices` subcommand.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_serial::{SerialPortInfo, SerialPortType};

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No device found under {dir:?} matching {prefixes:?}, please specify a device")]
    NoDeviceFound {
        dir: PathBuf,
        prefixes: Vec<String>,
    },

    #[error("Port enumeration failed: {0}")]
    Enumeration(#[from] tokio_serial::Error),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Check whether a device file name matches any of the configured prefixes
pub fn matches_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

/// Scan a directory for entries whose file name starts with one of the
/// prefixes. Matches are sorted so selection is deterministic.
pub fn scan_directory(dir: &Path, prefixes: &[String]) -> DiscoveryResult<Vec<PathBuf>> {
    let mut matches = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if matches_prefix(name, prefixes) {
                matches.push(entry.path());
            }
        }
    }

    matches.sort();
    Ok(matches)
}

/// Find the serial device to bridge to: the first matching entry in the
/// device directory
pub fn find_device(dir: &Path, prefixes: &[String]) -> DiscoveryResult<PathBuf> {
    scan_directory(dir, prefixes)?
        .into_iter()
        .next()
        .ok_or_else(|| DiscoveryError::NoDeviceFound {
            dir: dir.to_path_buf(),
            prefixes: prefixes.to_vec(),
        })
}

/// Enumerate all serial ports known to the OS
pub fn list_ports() -> DiscoveryResult<Vec<SerialPortInfo>> {
    Ok(tokio_serial::available_ports()?)
}

/// Human-readable description of an enumerated port
pub fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => {
            let mut desc = format!("USB {:04x}:{:04x}", info.vid, info.pid);
            if let Some(product) = &info.product {
                desc.push(' ');
                desc.push_str(product);
            }
            desc
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn prefixes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_selects_matching_entry() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("cu.usbmodem1411")).unwrap();
        File::create(dir.path().join("unrelated.txt")).unwrap();

        let found = find_device(dir.path(), &prefixes(&["cu.usbmodem"])).unwrap();
        assert_eq!(found, dir.path().join("cu.usbmodem1411"));
    }

    #[test]
    fn test_no_match_is_an_error() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("unrelated.txt")).unwrap();

        let result = find_device(dir.path(), &prefixes(&["cu.usbmodem"]));
        assert!(matches!(
            result,
            Err(DiscoveryError::NoDeviceFound { .. })
        ));
    }

    #[test]
    fn test_first_match_is_deterministic() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("cu.usbmodem1411")).unwrap();
        File::create(dir.path().join("cu.usbmodem1001")).unwrap();

        let found = find_device(dir.path(), &prefixes(&["cu.usbmodem"])).unwrap();
        assert_eq!(found, dir.path().join("cu.usbmodem1001"));
    }

    #[test]
    fn test_scan_respects_all_prefixes() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("ttyACM0")).unwrap();
        File::create(dir.path().join("ttyS0")).unwrap();
        File::create(dir.path().join("cu.usbmodem1411")).unwrap();

        let matches =
            scan_directory(dir.path(), &prefixes(&["cu.usbmodem", "ttyACM"])).unwrap();
        assert_eq!(
            matches,
            vec![
                dir.path().join("cu.usbmodem1411"),
                dir.path().join("ttyACM0"),
            ]
        );
    }

    #[test]
    fn test_matches_prefix() {
        let p = prefixes(&["cu.usbmodem"]);
        assert!(matches_prefix("cu.usbmodem1411", &p));
        assert!(!matches_prefix("cu.Bluetooth-Incoming-Port", &p));
        assert!(!matches_prefix("usbmodem1411", &p));
    }
}
