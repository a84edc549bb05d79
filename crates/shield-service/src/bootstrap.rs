//! Environment preparation: state directories and the memory-backed
//! scratch check.
//!
//! The scratch directory holds decrypted store contents while a session is
//! open, so it must never touch persistent media. On Linux that means a
//! tmpfs (or ramfs) mount; anything else is refused for the system layout
//! and loudly warned about for a `--root` override (used by tests and dev
//! setups where a plain directory is acceptable).

use anyhow::{anyhow, Result};
use shield_core::paths::{StorePaths, SYSTEM_SCRATCH_DIR};
use std::fs;
use std::path::Path;
use tracing::warn;

pub fn prepare(paths: &StorePaths) -> Result<()> {
    if let Some(parent) = paths.salt_file.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = paths.encrypted_store.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(&paths.scratch_dir)?;

    match scratch_is_memory_backed(&paths.scratch_dir) {
        Ok(true) => {}
        Ok(false) => {
            if paths.scratch_dir == Path::new(SYSTEM_SCRATCH_DIR) {
                return Err(anyhow!(
                    "{} is not on a memory-backed filesystem; refusing to decrypt onto disk",
                    paths.scratch_dir.display()
                ));
            }
            warn!(
                scratch = %paths.scratch_dir.display(),
                "scratch directory is not memory-backed; decrypted data will touch disk"
            );
        }
        Err(e) => {
            // No /proc/mounts (non-Linux, containers with masked proc).
            warn!("cannot verify scratch filesystem type: {e}");
        }
    }
    Ok(())
}

fn scratch_is_memory_backed(dir: &Path) -> Result<bool> {
    let mounts = fs::read_to_string("/proc/mounts")?;
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    Ok(is_memory_backed(&mounts, &dir))
}

/// Resolve `dir` against a `/proc/mounts` listing: the longest mount point
/// that prefixes the path wins, and it must be tmpfs or ramfs.
fn is_memory_backed(mounts: &str, dir: &Path) -> bool {
    let mut best: Option<(&str, &str)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mount_point), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if dir.starts_with(mount_point)
            && best.map_or(true, |(current, _)| mount_point.len() > current.len())
        {
            best = Some((mount_point, fstype));
        }
    }
    matches!(best, Some((_, "tmpfs" | "ramfs")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw 0 0
tmpfs /dev/shm tmpfs rw,nosuid,nodev 0 0
tmpfs /run tmpfs rw,nosuid 0 0
/dev/sdb1 /var ext4 rw 0 0
";

    #[test]
    fn dev_shm_is_memory_backed() {
        assert!(is_memory_backed(MOUNTS, Path::new("/dev/shm/replayshield")));
        assert!(is_memory_backed(MOUNTS, Path::new("/run/lock")));
    }

    #[test]
    fn disk_paths_are_not() {
        assert!(!is_memory_backed(MOUNTS, Path::new("/var/lib/replayshield")));
        assert!(!is_memory_backed(MOUNTS, Path::new("/home/user/scratch")));
    }

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = "\
tmpfs / tmpfs rw 0 0
/dev/sda1 /data ext4 rw 0 0
";
        // /data is on disk even though / is tmpfs.
        assert!(!is_memory_backed(mounts, Path::new("/data/scratch")));
        assert!(is_memory_backed(mounts, Path::new("/tmp")));
    }

    #[test]
    fn prepare_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::under(&dir.path().join("deep/nested"));
        prepare(&paths).unwrap();
        assert!(paths.scratch_dir.is_dir());
        assert!(paths.salt_file.parent().unwrap().is_dir());
    }
}
