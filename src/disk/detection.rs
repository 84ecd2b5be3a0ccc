//! Disk and partition detection
//!
//! Builds the [`Disk`]/[`Partition`] objects the task engine and the
//! partition planner operate against. Everything is probed from sysfs;
//! partition labels come from `blkid` when it is available.

use crate::utils::command::run_command_optional;
use crate::utils::error::{RefurbixError, Result};
use std::fs;
use std::path::Path;

/// A single partition on a probed disk.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Partition {
    /// Device path (e.g., /dev/sda3)
    pub device_path: String,
    /// Partition number (1-based)
    pub number: u32,
    /// GPT partition name or filesystem label, if any
    pub label: Option<String>,
    /// Size in bytes
    pub size_bytes: u64,
}

/// A block device and its partitions.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Disk {
    /// Device path (e.g., /dev/sda)
    pub device_path: String,
    /// Device name (e.g., sda)
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Device model (if available)
    pub model: Option<String>,
    /// Device type (hdd, ssd, usb, nvme, etc.)
    pub device_type: String,
    /// Whether device is removable
    pub removable: bool,
    /// Whether device is read-only
    pub read_only: bool,
    /// Partitions currently on the device
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Size in bytes
    pub fn byte_size(&self) -> u64 {
        self.size_bytes
    }

    /// Size in MiB
    pub fn size_mib(&self) -> u64 {
        self.size_bytes / (1024 * 1024)
    }

    /// Get human-readable size
    pub fn size_human(&self) -> String {
        const KIB: u64 = 1024;
        const MIB: u64 = KIB * 1024;
        const GIB: u64 = MIB * 1024;
        const TIB: u64 = GIB * 1024;

        if self.size_bytes >= TIB {
            format!("{:.1}T", self.size_bytes as f64 / TIB as f64)
        } else if self.size_bytes >= GIB {
            format!("{:.1}G", self.size_bytes as f64 / GIB as f64)
        } else if self.size_bytes >= MIB {
            format!("{:.1}M", self.size_bytes as f64 / MIB as f64)
        } else if self.size_bytes >= KIB {
            format!("{:.1}K", self.size_bytes as f64 / KIB as f64)
        } else {
            format!("{}B", self.size_bytes)
        }
    }

    /// Look up a partition by identifier.
    ///
    /// The identifier is matched against the partition label (e.g. "Linux"),
    /// the full device path, or the partition number.
    pub fn find_partition(&self, identifier: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.label.as_deref() == Some(identifier) || p.device_path == identifier)
            .or_else(|| {
                identifier
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| self.partitions.iter().find(|p| p.number == n))
            })
    }
}

impl std::fmt::Display for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.device_path,
            self.size_human(),
            self.model.as_deref().unwrap_or("unknown model")
        )
    }
}

/// Read a sysfs attribute, returning None if not available
fn read_sysfs_attr(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Read a numeric sysfs attribute
fn read_sysfs_u64(path: &str) -> Option<u64> {
    read_sysfs_attr(path).and_then(|s| s.parse().ok())
}

fn device_attr(device: &str, attr: &str) -> Option<String> {
    read_sysfs_attr(&format!("/sys/block/{}/{}", device, attr))
}

fn device_attr_u64(device: &str, attr: &str) -> Option<u64> {
    read_sysfs_u64(&format!("/sys/block/{}/{}", device, attr))
}

/// Determine device type from sysfs
fn determine_device_type(device: &str) -> String {
    if device.starts_with("nvme") {
        return "nvme".to_string();
    }

    if device.starts_with("mmcblk") {
        return "mmc".to_string();
    }

    if device.starts_with("loop") {
        return "loop".to_string();
    }

    let removable = device_attr_u64(device, "removable").unwrap_or(0);
    if removable == 1 {
        return "usb".to_string();
    }

    if let Some(rotation) = device_attr_u64(device, "queue/rotational") {
        if rotation == 0 {
            return "ssd".to_string();
        } else {
            return "hdd".to_string();
        }
    }

    "disk".to_string()
}

/// Check if a device (or one of its partitions) is mounted
fn is_device_mounted(device: &str) -> bool {
    let mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    mounts.lines().any(|line| line.starts_with(device))
}

/// Probe partition label: GPT partition name first, filesystem label second.
fn probe_partition_label(device_path: &str) -> Option<String> {
    run_command_optional("blkid", &["-s", "PARTLABEL", "-o", "value", device_path])
        .or_else(|| run_command_optional("blkid", &["-s", "LABEL", "-o", "value", device_path]))
}

/// Enumerate the partitions of a disk from sysfs.
fn probe_partitions(disk_name: &str, sector_size: u64) -> Vec<Partition> {
    let base = format!("/sys/block/{}", disk_name);
    let mut partitions = Vec::new();

    let entries = match fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(_) => return partitions,
    };

    for entry in entries.flatten() {
        let child = entry.file_name().to_string_lossy().to_string();
        if !child.starts_with(disk_name) {
            continue;
        }

        // Only real partition directories carry a `partition` attribute.
        let number = match read_sysfs_u64(&format!("{}/{}/partition", base, child)) {
            Some(n) => n as u32,
            None => continue,
        };
        let size_sectors = read_sysfs_u64(&format!("{}/{}/size", base, child)).unwrap_or(0);

        let device_path = format!("/dev/{}", child);
        let label = probe_partition_label(&device_path);

        partitions.push(Partition {
            device_path,
            number,
            label,
            size_bytes: size_sectors * sector_size,
        });
    }

    partitions.sort_by_key(|p| p.number);
    partitions
}

/// List available disks
///
/// If `all` is false, filters to only show suitable triage targets
/// (excludes mounted devices, read-only devices, loop devices, etc.)
pub fn list_disks(all: bool) -> Result<Vec<Disk>> {
    let mut disks = Vec::new();

    for entry in fs::read_dir("/sys/block")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        // Skip partitions (they show up in /sys/block for nvme)
        if name.contains('p') && name.starts_with("nvme") && name.len() > 7 {
            continue;
        }

        let device_type = determine_device_type(&name);

        if !all && device_type == "loop" {
            continue;
        }

        let size_sectors = device_attr_u64(&name, "size").unwrap_or(0);
        if size_sectors == 0 {
            continue;
        }

        let sector_size = device_attr_u64(&name, "queue/logical_block_size").unwrap_or(512);
        let size_bytes = size_sectors * sector_size;

        // Skip very small devices (< 1GB) unless showing all
        if !all && size_bytes < 1024 * 1024 * 1024 {
            continue;
        }

        let removable = device_attr_u64(&name, "removable").unwrap_or(0) == 1;
        let read_only = device_attr_u64(&name, "ro").unwrap_or(0) == 1;

        if !all && read_only {
            continue;
        }

        let model =
            device_attr(&name, "device/model").or_else(|| device_attr(&name, "device/name"));

        let path = format!("/dev/{}", name);

        if !all && is_device_mounted(&path) {
            continue;
        }

        disks.push(Disk {
            device_path: path,
            partitions: probe_partitions(&name, sector_size),
            name,
            size_bytes,
            model,
            device_type,
            removable,
            read_only,
        });
    }

    disks.sort_by(|a, b| a.device_path.cmp(&b.device_path));

    Ok(disks)
}

/// Probe a specific device into a [`Disk`]
pub fn probe_disk(device_path: &str) -> Result<Disk> {
    let name = Path::new(device_path)
        .file_name()
        .ok_or_else(|| RefurbixError::DeviceNotFound(device_path.to_string()))?
        .to_string_lossy()
        .to_string();

    let size_sectors = device_attr_u64(&name, "size")
        .ok_or_else(|| RefurbixError::DeviceNotFound(device_path.to_string()))?;
    let sector_size = device_attr_u64(&name, "queue/logical_block_size").unwrap_or(512);

    let device_type = determine_device_type(&name);
    let removable = device_attr_u64(&name, "removable").unwrap_or(0) == 1;
    let read_only = device_attr_u64(&name, "ro").unwrap_or(0) == 1;
    let model = device_attr(&name, "device/model").or_else(|| device_attr(&name, "device/name"));

    Ok(Disk {
        device_path: device_path.to_string(),
        partitions: probe_partitions(&name, sector_size),
        name,
        size_bytes: size_sectors * sector_size,
        model,
        device_type,
        removable,
        read_only,
    })
}

/// Get the partition naming prefix for a device
/// e.g., /dev/sda -> /dev/sda, /dev/nvme0n1 -> /dev/nvme0n1p
#[allow(dead_code)]
pub fn partition_prefix(device: &str) -> String {
    if device.contains("nvme") || device.contains("mmcblk") || device.contains("loop") {
        format!("{}p", device)
    } else {
        device.to_string()
    }
}

/// Get partition path for a device and partition number
#[allow(dead_code)]
pub fn partition_path(device: &str, partition_num: u32) -> String {
    format!("{}{}", partition_prefix(device), partition_num)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_disk() -> Disk {
        Disk {
            device_path: "/dev/sda".to_string(),
            name: "sda".to_string(),
            size_bytes: 32000 * 1024 * 1024,
            model: Some("TestDisk".to_string()),
            device_type: "ssd".to_string(),
            removable: false,
            read_only: false,
            partitions: vec![
                Partition {
                    device_path: "/dev/sda1".to_string(),
                    number: 1,
                    label: None,
                    size_bytes: 32 * 1024 * 1024,
                },
                Partition {
                    device_path: "/dev/sda2".to_string(),
                    number: 2,
                    label: Some("Linux".to_string()),
                    size_bytes: 29917 * 1024 * 1024,
                },
            ],
        }
    }

    #[test]
    fn find_partition_by_label() {
        let disk = sample_disk();
        let part = disk.find_partition("Linux").unwrap();
        assert_eq!(part.device_path, "/dev/sda2");
    }

    #[test]
    fn find_partition_by_number() {
        let disk = sample_disk();
        let part = disk.find_partition("1").unwrap();
        assert_eq!(part.device_path, "/dev/sda1");
    }

    #[test]
    fn find_partition_by_device_path() {
        let disk = sample_disk();
        let part = disk.find_partition("/dev/sda2").unwrap();
        assert_eq!(part.number, 2);
    }

    #[test]
    fn find_partition_missing() {
        let disk = sample_disk();
        assert!(disk.find_partition("Windows").is_none());
        assert!(disk.find_partition("7").is_none());
    }

    #[test]
    fn partition_paths() {
        assert_eq!(partition_path("/dev/sda", 3), "/dev/sda3");
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_path("/dev/mmcblk0", 2), "/dev/mmcblk0p2");
    }
}
