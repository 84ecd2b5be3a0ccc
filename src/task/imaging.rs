//! Disk imaging and restore tasks
//!
//! The heavy lifting is done by the external image/restore workers; these
//! tasks resolve the target partition, build the worker invocation, and
//! wire a [`ProcessTask`] to a [`PartcloneProgressParser`].

use crate::disk::detection::Disk;
use crate::task::process::ProcessTask;
use crate::task::progress::PartcloneProgressParser;
use crate::task::{Task, TaskState};
use crate::utils::error::{RefurbixError, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Throughput heuristic for compressed imaging, bytes per second. Seeds
/// the estimate until the worker starts reporting real numbers.
const IMAGING_BYTES_PER_SEC: f64 = 500_000_000.0;

/// Restore is I/O-bound decompression; effective throughput is far lower.
const RESTORE_BYTES_PER_SEC: f64 = 10_000_000.0;

/// Compress one partition of a disk into an image file.
pub struct ImagingTask {
    inner: ProcessTask,
    disk: Disk,
    partition_id: String,
    image_path: PathBuf,
    worker: PathBuf,
}

impl ImagingTask {
    pub fn new(
        disk: Disk,
        partition_id: impl Into<String>,
        image_path: impl Into<PathBuf>,
        worker: impl Into<PathBuf>,
    ) -> Self {
        let partition_id = partition_id.into();
        let image_path = image_path.into();
        let description = format!(
            "Create disk image of {} partition {}",
            disk.device_path, partition_id
        );
        let estimate = disk.byte_size() as f64 / IMAGING_BYTES_PER_SEC;
        Self {
            inner: ProcessTask::new(description, Box::new(PartcloneProgressParser::new()))
                .with_time_estimate(estimate),
            disk,
            partition_id,
            image_path,
            worker: worker.into(),
        }
    }
}

impl Task for ImagingTask {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn state(&self) -> TaskState {
        self.inner.state()
    }

    fn percent(&self) -> f64 {
        self.inner.percent()
    }

    fn message(&self) -> &str {
        self.inner.message()
    }

    fn time_estimate_secs(&self) -> f64 {
        self.inner.time_estimate_secs()
    }

    fn setup(&mut self) -> Result<()> {
        let device_path = resolve_partition(&self.disk, &self.partition_id, &mut self.inner)?;
        let argv = vec![
            self.worker.display().to_string(),
            device_path,
            self.image_path.display().to_string(),
        ];
        self.inner.setup(&argv)
    }

    fn poll(&mut self) {
        self.inner.poll();
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Decompress an image file back onto a partition of a disk.
pub struct RestoreTask {
    inner: ProcessTask,
    disk: Disk,
    partition_id: String,
    source: PathBuf,
    worker: PathBuf,
}

impl std::fmt::Debug for RestoreTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreTask")
            .field("disk", &self.disk)
            .field("partition_id", &self.partition_id)
            .field("source", &self.source)
            .field("worker", &self.worker)
            .finish()
    }
}

impl RestoreTask {
    /// A restore without a source image is a configuration error, caught
    /// here before any task lifecycle begins.
    pub fn new(
        disk: Disk,
        partition_id: impl Into<String>,
        source: Option<&Path>,
        source_byte_size: u64,
        worker: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source = source.ok_or_else(|| {
            RefurbixError::Configuration("restore requires a source image".to_string())
        })?;
        let partition_id = partition_id.into();
        let description = format!(
            "Restore disk image from {} to {} partition {}",
            source.display(),
            disk.device_path,
            partition_id
        );
        let estimate = source_byte_size as f64 / RESTORE_BYTES_PER_SEC;
        Ok(Self {
            inner: ProcessTask::new(description, Box::new(PartcloneProgressParser::new()))
                .with_time_estimate(estimate),
            disk,
            partition_id,
            source: source.to_path_buf(),
            worker: worker.into(),
        })
    }
}

impl Task for RestoreTask {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn state(&self) -> TaskState {
        self.inner.state()
    }

    fn percent(&self) -> f64 {
        self.inner.percent()
    }

    fn message(&self) -> &str {
        self.inner.message()
    }

    fn time_estimate_secs(&self) -> f64 {
        self.inner.time_estimate_secs()
    }

    fn setup(&mut self) -> Result<()> {
        let device_path = resolve_partition(&self.disk, &self.partition_id, &mut self.inner)?;
        let argv = vec![
            self.worker.display().to_string(),
            self.source.display().to_string(),
            device_path,
        ];
        self.inner.setup(&argv)
    }

    fn poll(&mut self) {
        self.inner.poll();
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Resolve the target partition's device path, failing the task before
/// anything is spawned when the partition does not exist.
fn resolve_partition(disk: &Disk, partition_id: &str, inner: &mut ProcessTask) -> Result<String> {
    match disk.find_partition(partition_id) {
        Some(part) => Ok(part.device_path.clone()),
        None => {
            let message = format!("No partition {}", partition_id);
            inner.fail_early(&message);
            Err(RefurbixError::Configuration(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::detection::Partition;

    fn disk_with_linux_partition() -> Disk {
        Disk {
            device_path: "/dev/sdz".to_string(),
            name: "sdz".to_string(),
            size_bytes: 250_000_000_000,
            model: None,
            device_type: "hdd".to_string(),
            removable: false,
            read_only: false,
            partitions: vec![Partition {
                device_path: "/dev/sdz2".to_string(),
                number: 2,
                label: Some("Linux".to_string()),
                size_bytes: 240_000_000_000,
            }],
        }
    }

    #[test]
    fn imaging_estimate_seeded_from_disk_size() {
        let task = ImagingTask::new(
            disk_with_linux_partition(),
            "Linux",
            "/images/sdz.img",
            "image-volume",
        );
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.time_estimate_secs(), 500.0);
    }

    #[test]
    fn imaging_missing_partition_fails_before_spawn() {
        let mut task = ImagingTask::new(
            disk_with_linux_partition(),
            "Windows",
            "/images/sdz.img",
            "image-volume",
        );
        let err = task.setup().unwrap_err();
        assert!(matches!(err, RefurbixError::Configuration(_)));
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.message(), "No partition Windows");
    }

    #[test]
    fn restore_estimate_seeded_from_source_size() {
        let task = RestoreTask::new(
            disk_with_linux_partition(),
            "Linux",
            Some(Path::new("/images/base.img")),
            2_000_000_000,
            "restore-volume",
        )
        .unwrap();
        assert_eq!(task.time_estimate_secs(), 200.0);
    }

    #[test]
    fn restore_without_source_is_rejected_at_construction() {
        let err = RestoreTask::new(
            disk_with_linux_partition(),
            "Linux",
            None,
            0,
            "restore-volume",
        )
        .unwrap_err();
        assert!(matches!(err, RefurbixError::Configuration(_)));
    }

    #[test]
    fn restore_missing_partition_fails_before_spawn() {
        let mut task = RestoreTask::new(
            disk_with_linux_partition(),
            "5",
            Some(Path::new("/images/base.img")),
            1_000_000,
            "restore-volume",
        )
        .unwrap();
        let err = task.setup().unwrap_err();
        assert!(matches!(err, RefurbixError::Configuration(_)));
        assert_eq!(task.state(), TaskState::Failed);
    }
}
