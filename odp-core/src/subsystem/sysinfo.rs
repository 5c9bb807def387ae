//! Host system-information probe.
//!
//! Fills the lifecycle record with the CPU count and the default huge page
//! size and mount point. The huge page directory matters to the controller:
//! once it is known, stale `odp-<pid>-*` files are reclaimed from it too.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::Subsystem;
use crate::lifecycle::GlobalRecord;

/// System information discovered during global init.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub huge_page_size_kb: Option<u64>,
    pub huge_page_dir: Option<PathBuf>,
}

/// [`Subsystem`] reading `/proc/meminfo` and `/proc/mounts`.
#[derive(Debug, Clone)]
pub struct HostSystemInfo {
    meminfo: PathBuf,
    mounts: PathBuf,
}

impl HostSystemInfo {
    pub fn new() -> Self {
        Self::with_sources("/proc/meminfo", "/proc/mounts")
    }

    /// Read from alternate files instead of procfs.
    pub fn with_sources(meminfo: impl Into<PathBuf>, mounts: impl Into<PathBuf>) -> Self {
        Self {
            meminfo: meminfo.into(),
            mounts: mounts.into(),
        }
    }

    /// Probe without touching any record.
    pub fn probe(&self) -> Result<SystemInfo> {
        let cpu_count = std::thread::available_parallelism()
            .context("Failed to determine CPU count")?
            .get();

        let huge_page_size_kb = read_optional(&self.meminfo)
            .as_deref()
            .and_then(default_huge_page_kb);
        let huge_page_dir = read_optional(&self.mounts)
            .as_deref()
            .and_then(|mounts| huge_page_dir(mounts, huge_page_size_kb));

        Ok(SystemInfo {
            cpu_count,
            huge_page_size_kb,
            huge_page_dir,
        })
    }
}

impl Default for HostSystemInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsystem for HostSystemInfo {
    fn init_global(&self, record: &mut GlobalRecord) -> Result<()> {
        let info = self.probe()?;
        info!(
            cpus = info.cpu_count,
            huge_page_kb = ?info.huge_page_size_kb,
            huge_page_dir = ?info.huge_page_dir,
            "System information collected"
        );
        *record.system_info_mut() = info;
        Ok(())
    }

    fn term_global(&self, _record: &GlobalRecord) -> Result<()> {
        Ok(())
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Some(raw),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "System info source unavailable");
            None
        }
    }
}

/// `Hugepagesize:` from meminfo, in kB.
pub fn default_huge_page_kb(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("Hugepagesize:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Parse a `pagesize=` mount option value (`2M`, `1G`, `2048k`) into kB.
fn page_size_kb(value: &str) -> Option<u64> {
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match suffix {
        "" => Some(n / 1024),
        "k" | "K" => Some(n),
        "m" | "M" => n.checked_mul(1024),
        "g" | "G" => n.checked_mul(1024 * 1024),
        _ => None,
    }
}

/// Mount point of the hugetlbfs serving the default page size.
///
/// A mount without a `pagesize=` option serves the default size. Falls back
/// to the first hugetlbfs mount when none matches.
pub fn huge_page_dir(mounts: &str, default_kb: Option<u64>) -> Option<PathBuf> {
    let mut first = None;
    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_, mount_point, fs_type, options, ..] = fields.as_slice() else {
            continue;
        };
        if *fs_type != "hugetlbfs" {
            continue;
        }

        let size = options
            .split(',')
            .find_map(|opt| opt.strip_prefix("pagesize="))
            .and_then(page_size_kb)
            .or(default_kb);
        if default_kb.is_some() && size == default_kb {
            return Some(PathBuf::from(mount_point));
        }
        first.get_or_insert_with(|| PathBuf::from(mount_point));
    }
    first
}
