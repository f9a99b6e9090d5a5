use std::path::{Path, PathBuf};

use crate::core::models::Volume;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{LinuxEnumerator, LinuxEnumeratorConfig};
pub use simulated::{SimulatedEnumerator, Simulator};

/// OS-level view of the removable volumes currently mounted.
pub trait DriveEnumerator: Send + Sync {
    /// List all currently mounted removable volumes.
    fn removable_volumes(&self) -> anyhow::Result<Vec<Volume>>;
}

pub fn get_enumerator(simulation: bool) -> Box<dyn DriveEnumerator> {
    if simulation {
        let (enumerator, controller) = SimulatedEnumerator::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines().map_while(Result::ok) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                match (parts.first().copied(), parts.get(1)) {
                    (Some("add"), Some(path)) => controller.add_device(path),
                    (Some("rm"), Some(path)) => controller.remove_device(path),
                    _ => println!("(Simulator) Use: 'add <path>' or 'rm <path>'"),
                }
            }
        });

        return Box::new(enumerator);
    }

    platform_enumerator()
}

#[cfg(target_os = "linux")]
fn platform_enumerator() -> Box<dyn DriveEnumerator> {
    Box::new(LinuxEnumerator::with_defaults())
}

#[cfg(not(target_os = "linux"))]
fn platform_enumerator() -> Box<dyn DriveEnumerator> {
    struct Unsupported;

    impl DriveEnumerator for Unsupported {
        fn removable_volumes(&self) -> anyhow::Result<Vec<Volume>> {
            anyhow::bail!("removable drive detection is only implemented for Linux; use --simulation")
        }
    }

    Box::new(Unsupported)
}

/// Capacity figures for the filesystem holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

/// Query the filesystem containing `path`.
pub fn disk_space(path: &Path) -> anyhow::Result<DiskSpace> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let block = stat.fragment_size() as u64;
    let total_bytes = stat.blocks() as u64 * block;
    let free_bytes = stat.blocks_free() as u64 * block;

    Ok(DiskSpace {
        total_bytes,
        used_bytes: total_bytes.saturating_sub(free_bytes),
        available_bytes: stat.blocks_available() as u64 * block,
    })
}

/// Decode the octal escapes (`\040` for space) used in mount tables.
pub(crate) fn unescape_mount_path(raw: &str) -> PathBuf {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    PathBuf::from(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_paths_are_unescaped() {
        assert_eq!(
            unescape_mount_path(r"/media/user/EOS\040DIGITAL"),
            PathBuf::from("/media/user/EOS DIGITAL")
        );
        assert_eq!(unescape_mount_path("/mnt/plain"), PathBuf::from("/mnt/plain"));
        assert_eq!(unescape_mount_path(r"/mnt/trailing\\"), PathBuf::from(r"/mnt/trailing\\"));
    }

    #[test]
    fn disk_space_reports_current_directory() {
        let space = disk_space(Path::new(".")).unwrap();
        assert!(space.total_bytes > 0);
        assert!(space.available_bytes <= space.total_bytes);
    }
}
