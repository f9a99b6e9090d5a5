use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::trace;

use super::{DriveEnumerator, unescape_mount_path};
use crate::core::models::{Volume, volume_label};

/// Filesystems that never back a removable card or stick.
const VIRTUAL_FILESYSTEMS: &[&str] = &[
    "proc", "sysfs", "tmpfs", "devtmpfs", "cgroup", "cgroup2", "overlay", "squashfs", "autofs",
    "devpts", "mqueue", "debugfs", "tracefs", "securityfs", "pstore", "bpf", "fusectl",
    "configfs", "hugetlbfs", "ramfs", "nsfs",
];

/// Mount roots desktop automounters use for removable media.
const AUTOMOUNT_ROOTS: &[&str] = &["/media", "/run/media"];

#[derive(Debug, Clone)]
pub struct LinuxEnumeratorConfig {
    /// Mount table to read, normally `/proc/self/mounts`
    pub mounts_path: PathBuf,
    /// Block device class directory, normally `/sys/class/block`
    pub sys_block: PathBuf,
}

impl Default for LinuxEnumeratorConfig {
    fn default() -> Self {
        Self {
            mounts_path: PathBuf::from("/proc/self/mounts"),
            sys_block: PathBuf::from("/sys/class/block"),
        }
    }
}

/// Finds removable volumes from the kernel mount table and sysfs.
///
/// A mount counts as removable when its block device (or the disk it is a
/// partition of) has `removable = 1`, or when it sits under an automount root
/// such as `/media`. USB SSDs often report `removable = 0`, hence the second rule.
pub struct LinuxEnumerator {
    config: LinuxEnumeratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    device: String,
    mount_point: PathBuf,
    filesystem: String,
}

impl LinuxEnumerator {
    pub fn new(config: LinuxEnumeratorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(LinuxEnumeratorConfig::default())
    }

    fn is_removable_device(&self, device: &str) -> bool {
        let Some(name) = device.strip_prefix("/dev/") else {
            return false;
        };

        let class_entry = self.config.sys_block.join(name);
        let Ok(resolved) = fs::canonicalize(&class_entry) else {
            return false;
        };

        // Partitions carry no `removable` attribute; their parent disk does.
        [Some(resolved.as_path()), resolved.parent()]
            .into_iter()
            .flatten()
            .any(|dir| read_flag(&dir.join("removable")))
    }
}

fn read_flag(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let filesystem = fields.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: unescape_mount_path(mount_point),
                filesystem: filesystem.to_string(),
            })
        })
        .collect()
}

fn under_automount_root(path: &Path) -> bool {
    AUTOMOUNT_ROOTS
        .iter()
        .any(|root| path.starts_with(root) && path != Path::new(root))
}

impl DriveEnumerator for LinuxEnumerator {
    fn removable_volumes(&self) -> anyhow::Result<Vec<Volume>> {
        let content = fs::read_to_string(&self.config.mounts_path).with_context(|| {
            format!(
                "Failed to read mount table {}",
                self.config.mounts_path.display()
            )
        })?;

        let mut volumes: Vec<Volume> = Vec::new();
        for entry in parse_mounts(&content) {
            if VIRTUAL_FILESYSTEMS.contains(&entry.filesystem.as_str()) {
                continue;
            }

            let removable = self.is_removable_device(&entry.device)
                || under_automount_root(&entry.mount_point);
            if !removable || volumes.iter().any(|v| v.root == entry.mount_point) {
                continue;
            }

            trace!(device = %entry.device, mount = %entry.mount_point.display(), "Removable volume");
            volumes.push(Volume {
                label: volume_label(&entry.mount_point),
                root: entry.mount_point,
                device: entry.device,
            });
        }

        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/sdb1 /mnt/card vfat rw,nosuid 0 0
/dev/sdc1 /media/user/EOS\\040DIGITAL exfat rw 0 0
tmpfs /media/user/ram tmpfs rw 0 0
";

    /// Lay out a fake sysfs: sdb is removable, nvme0n1 is not.
    fn fake_sysfs(root: &Path) -> PathBuf {
        let devices = root.join("devices");
        let class = root.join("class/block");
        fs::create_dir_all(&class).unwrap();

        for (disk, part, removable) in [("sdb", "sdb1", "1"), ("nvme0n1", "nvme0n1p2", "0"), ("sdc", "sdc1", "0")] {
            let part_dir = devices.join(disk).join(part);
            fs::create_dir_all(&part_dir).unwrap();
            fs::write(devices.join(disk).join("removable"), removable).unwrap();
            std::os::unix::fs::symlink(&part_dir, class.join(part)).unwrap();
        }

        class
    }

    #[test]
    fn parses_mount_table() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3].mount_point, PathBuf::from("/media/user/EOS DIGITAL"));
        assert_eq!(entries[3].filesystem, "exfat");
    }

    #[test]
    fn lists_removable_and_automounted_volumes() {
        let temp = tempdir().unwrap();
        let sys_block = fake_sysfs(temp.path());
        let mounts_path = temp.path().join("mounts");
        fs::write(&mounts_path, MOUNTS).unwrap();

        let enumerator = LinuxEnumerator::new(LinuxEnumeratorConfig {
            mounts_path,
            sys_block,
        });
        let volumes = enumerator.removable_volumes().unwrap();
        let roots: Vec<_> = volumes.iter().map(|v| v.root.clone()).collect();

        assert_eq!(
            roots,
            vec![PathBuf::from("/mnt/card"), PathBuf::from("/media/user/EOS DIGITAL")]
        );
        assert_eq!(volumes[1].label, "EOS_DIGITAL");
        assert_eq!(volumes[0].device, "/dev/sdb1");
    }

    #[test]
    fn missing_mount_table_is_an_error() {
        let temp = tempdir().unwrap();
        let enumerator = LinuxEnumerator::new(LinuxEnumeratorConfig {
            mounts_path: temp.path().join("nope"),
            sys_block: temp.path().to_path_buf(),
        });
        assert!(enumerator.removable_volumes().is_err());
    }

    #[test]
    fn real_system_does_not_error() {
        let result = LinuxEnumerator::with_defaults().removable_volumes();
        assert!(result.is_ok(), "enumeration failed: {:?}", result.err());
    }
}
