//! Partition plan synthesis
//!
//! Computes the ordered partition layout a formatting step consumes when a
//! disk is prepared for a restore or turned into bootable USB media. The
//! planner only does geometry arithmetic; it never touches the disk.

use crate::disk::detection::Disk;

/// GPT name given to the EFI system partition.
pub const EFI_PART_NAME: &str = "EFI_System_Partition";

/// Partition flags marking the active EFI system partition.
const EFI_PART_FLAGS: &str = "boot,esp";

/// Reserved space at the front of the disk for the protective MBR.
const RESERVED_MBR_MIB: u64 = 2;

/// BIOS/GRUB boot partition size.
const BOOT_MIB: u64 = 32;

/// EFI system partition size for installed systems.
const EFI_MIB: u64 = 512;

/// EFI system partition size on USB sticks. The stick's ESP is only used
/// during installation, so 32 MiB is plenty.
const USB_EFI_MIB: u64 = 32;

/// Swap limits
const SWAP_MIN_MIB: u64 = 2048;
const SWAP_MAX_MIB: u64 = 8192;

/// Rounding slack left unallocated at the end of the disk.
const SLACK_MIB: u64 = 1;

/// Partition role within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// Reserved protective-MBR area
    ReservedMbr,
    /// BIOS boot partition (GRUB core image on GPT)
    BiosBoot,
    /// EFI system partition
    EfiSystem,
    /// Linux swap
    Swap,
    /// ext4 data partition
    Ext4,
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReservedMbr => write!(f, "mbr"),
            Self::BiosBoot => write!(f, "bios-boot"),
            Self::EfiSystem => write!(f, "efi"),
            Self::Swap => write!(f, "swap"),
            Self::Ext4 => write!(f, "ext4"),
        }
    }
}

/// One row of a computed disk layout. Immutable once the plan is built.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Ordinal index within the plan (0-based)
    pub index: u32,
    /// Partition name/label
    pub name: Option<String>,
    /// Filesystem tag for the formatting step (e.g. "ext4", "fat32")
    pub filesystem: Option<String>,
    /// Start offset in MiB
    pub start_mib: u64,
    /// Size in MiB
    pub size_mib: u64,
    /// Partition role
    pub kind: PartitionKind,
    /// Partition flags (e.g. "boot", "boot,esp")
    pub flags: Option<String>,
    /// Extra options for filesystem creation
    pub mkfs_opts: Option<Vec<String>>,
}

/// Clamp value between min and max
fn clamp(value: u64, min: u64, max: u64) -> u64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Swap gets up to 5% of the disk, held between 2 and 8 GiB.
fn swap_size_mib(disk_mib: u64) -> u64 {
    clamp(disk_mib * 5 / 100, SWAP_MIN_MIB, SWAP_MAX_MIB)
}

/// ext4 tool 1.42 has no metadata_csum
fn ext4_mkfs_opts(ext4_version: Option<&str>) -> Option<Vec<String>> {
    if ext4_version == Some("1.42") {
        Some(vec!["-O".to_string(), "^metadata_csum".to_string()])
    } else {
        None
    }
}

/// Assign ordinals and start offsets by forward accumulation.
///
/// An entry with size 0 is a sentinel meaning "take all remaining
/// capacity"; it is resolved (remainder minus the slack MiB) before the
/// next entry's start is computed.
fn finalize_plan(mut entries: Vec<PlanEntry>, disk_mib: u64) -> Vec<PlanEntry> {
    let mut start = 0u64;
    let mut remaining = disk_mib;

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.index = i as u32;
        entry.start_mib = start;
        if entry.size_mib == 0 {
            remaining = remaining.saturating_sub(SLACK_MIB);
            entry.size_mib = remaining;
        }
        start += entry.size_mib;
        remaining = remaining.saturating_sub(entry.size_mib);
    }

    entries
}

/// Compute the partition plan for an installed system disk.
///
/// Works for EFI and legacy boot. Legacy plans mark the 32 MiB boot
/// partition bootable; EFI plans insert a 512 MiB EFI system partition
/// instead. The ext4 root takes everything that is left.
pub fn make_efi_partition_plan(
    disk: &Disk,
    ext4_version: Option<&str>,
    efi_boot: bool,
) -> Vec<PlanEntry> {
    let disk_mib = disk.size_mib();
    let mkfs_opts = ext4_mkfs_opts(ext4_version);

    let bios_part_flags = if efi_boot {
        None
    } else {
        Some("boot".to_string())
    };

    let mut entries = vec![
        PlanEntry {
            index: 0,
            name: None,
            filesystem: None,
            start_mib: 0,
            size_mib: RESERVED_MBR_MIB,
            kind: PartitionKind::ReservedMbr,
            flags: None,
            mkfs_opts: None,
        },
        PlanEntry {
            index: 0,
            name: Some("BOOT".to_string()),
            filesystem: None,
            start_mib: 0,
            size_mib: BOOT_MIB,
            kind: PartitionKind::BiosBoot,
            flags: bios_part_flags,
            mkfs_opts: None,
        },
    ];

    if efi_boot {
        entries.push(PlanEntry {
            index: 0,
            name: Some(EFI_PART_NAME.to_string()),
            filesystem: Some("fat32".to_string()),
            start_mib: 0,
            size_mib: EFI_MIB,
            kind: PartitionKind::EfiSystem,
            flags: Some(EFI_PART_FLAGS.to_string()),
            mkfs_opts: None,
        });
    }

    entries.push(PlanEntry {
        index: 0,
        name: Some("SWAP".to_string()),
        filesystem: Some("linux-swap".to_string()),
        start_mib: 0,
        size_mib: swap_size_mib(disk_mib),
        kind: PartitionKind::Swap,
        flags: None,
        mkfs_opts: None,
    });
    entries.push(PlanEntry {
        index: 0,
        name: Some("Linux".to_string()),
        filesystem: Some("ext4".to_string()),
        start_mib: 0,
        size_mib: 0,
        kind: PartitionKind::Ext4,
        flags: None,
        mkfs_opts,
    });

    finalize_plan(entries, disk_mib)
}

/// Compute the partition plan for a bootable USB stick.
///
/// The EFI branch sets aside a small ESP so the same stick can boot EFI
/// firmware; the legacy branch marks the single data partition bootable.
pub fn make_usb_stick_partition_plan(
    disk: &Disk,
    partition_label: Option<&str>,
    ext4_version: Option<&str>,
    efi_boot: bool,
) -> Vec<PlanEntry> {
    let disk_mib = disk.size_mib();
    let mkfs_opts = ext4_mkfs_opts(ext4_version);
    let label = partition_label.map(str::to_string);

    let mut entries = vec![PlanEntry {
        index: 0,
        name: None,
        filesystem: None,
        start_mib: 0,
        size_mib: RESERVED_MBR_MIB,
        kind: PartitionKind::ReservedMbr,
        flags: None,
        mkfs_opts: None,
    }];

    if efi_boot {
        entries.push(PlanEntry {
            index: 0,
            name: Some(EFI_PART_NAME.to_string()),
            filesystem: Some("fat32".to_string()),
            start_mib: 0,
            size_mib: USB_EFI_MIB,
            kind: PartitionKind::EfiSystem,
            flags: Some(EFI_PART_FLAGS.to_string()),
            mkfs_opts: None,
        });
        entries.push(PlanEntry {
            index: 0,
            name: label,
            filesystem: Some("ext4".to_string()),
            start_mib: 0,
            size_mib: 0,
            kind: PartitionKind::Ext4,
            flags: None,
            mkfs_opts,
        });
    } else {
        entries.push(PlanEntry {
            index: 0,
            name: label,
            filesystem: Some("ext4".to_string()),
            start_mib: 0,
            size_mib: 0,
            kind: PartitionKind::Ext4,
            flags: Some("boot".to_string()),
            mkfs_opts,
        });
    }

    finalize_plan(entries, disk_mib)
}

/// Print plan summary
pub fn print_plan_summary(entries: &[PlanEntry], disk_mib: u64) {
    println!("\nPartition plan (disk: {} MiB):", disk_mib);
    println!(
        "{:<4} {:<22} {:<10} {:>10} {:>10} {:<10} {}",
        "NUM", "NAME", "FS", "START", "SIZE", "TYPE", "FLAGS"
    );
    println!("{}", "-".repeat(80));

    for entry in entries {
        println!(
            "{:<4} {:<22} {:<10} {:>10} {:>10} {:<10} {}",
            entry.index,
            entry.name.as_deref().unwrap_or("-"),
            entry.filesystem.as_deref().unwrap_or("-"),
            entry.start_mib,
            entry.size_mib,
            entry.kind,
            entry.flags.as_deref().unwrap_or("-")
        );
    }
    println!();
}
