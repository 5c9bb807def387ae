//! End-to-end lifecycle tests through the public API.
//!
//! Every test here creates a live platform, so all of them run serially.
//! The timing test is ignored by default:
//!
//! ```sh
//! cargo test -p odp-core --test lifecycle -- --ignored --nocapture
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use odp_core::engine::affinity;
use odp_core::lifecycle::instance_claimed;
use odp_core::{
    CpuMask, Error, GlobalRecord, HostSystemInfo, InitOptions, InitStage, NativeRuntime, Platform,
    PlatformParams, Subsystem, SubsystemSet, ThreadRole,
};
use serial_test::serial;

/// Shared journal of everything the collaborators saw.
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
    argv: Mutex<Vec<String>>,
    affinity_during_init: Mutex<Option<CpuMask>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Subsystem that checks it is started right after its predecessor.
struct Ordered {
    stage: InitStage,
    journal: Arc<Journal>,
}

impl Subsystem for Ordered {
    fn init_global(&self, record: &mut GlobalRecord) -> anyhow::Result<()> {
        let expected_prev = InitStage::SUBSYSTEMS
            .iter()
            .position(|s| *s == self.stage)
            .and_then(|i| i.checked_sub(1))
            .map_or(InitStage::None, |i| InitStage::SUBSYSTEMS[i]);
        anyhow::ensure!(
            record.stage() == expected_prev,
            "{} started at stage {}",
            self.stage,
            record.stage()
        );
        self.journal.push(format!("+{}", self.stage));
        Ok(())
    }

    fn term_global(&self, _record: &GlobalRecord) -> anyhow::Result<()> {
        self.journal.push(format!("-{}", self.stage));
        Ok(())
    }

    fn init_local(&self, _record: &GlobalRecord, role: ThreadRole) -> anyhow::Result<()> {
        self.journal.push(format!("+{}@{}", self.stage, role));
        Ok(())
    }

    fn term_local(&self, _record: &GlobalRecord) -> anyhow::Result<()> {
        self.journal.push(format!("-{}@local", self.stage));
        Ok(())
    }
}

/// Native runtime that records its arguments and the thread affinity it ran with.
struct FakeEal {
    journal: Arc<Journal>,
    refuse: bool,
}

impl NativeRuntime for FakeEal {
    fn name(&self) -> &str {
        "fake-eal"
    }

    fn init(&self, argv: &[String]) -> anyhow::Result<usize> {
        *self.journal.argv.lock().unwrap() = argv.to_vec();
        *self.journal.affinity_during_init.lock().unwrap() = Some(affinity::current()?);
        if self.refuse {
            anyhow::bail!("Cannot init the DPDK EAL");
        }
        self.journal.push("+eal");
        Ok(argv.len())
    }

    fn cleanup(&self) -> anyhow::Result<()> {
        self.journal.push("-eal");
        Ok(())
    }
}

fn options(journal: &Arc<Journal>, tmp: &std::path::Path, refuse: bool) -> InitOptions {
    let subsystems = SubsystemSet::from_fn(|stage| {
        Arc::new(Ordered {
            stage,
            journal: journal.clone(),
        })
    });
    InitOptions::default()
        .with_tmp_dir(tmp)
        .with_subsystems(subsystems)
        .with_native_runtime(Arc::new(FakeEal {
            journal: journal.clone(),
            refuse,
        }))
}

fn global_entries(journal: &Journal) -> Vec<String> {
    journal
        .entries()
        .into_iter()
        .filter(|e| !e.contains('@'))
        .collect()
}

#[test]
#[serial]
fn test_native_runtime_runs_between_cpumask_and_time() {
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let (platform, instance) =
        Platform::init_global(options(&journal, tmp.path(), false), Some(PlatformParams::new("")))
            .unwrap();
    platform.term_global(instance).unwrap();

    let entries = global_entries(&journal);
    assert_eq!(&entries[..3], &["+cpumask", "+eal", "+time"]);
    let tail = &entries[entries.len() - 3..];
    assert_eq!(tail, &["-time", "-eal", "-cpumask"]);
    assert_eq!(entries.len(), 2 * (InitStage::SUBSYSTEMS.len() + 1));
}

#[test]
#[serial]
fn test_bootstrap_argv_and_affinity() {
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let before = affinity::current().unwrap();

    let params = PlatformParams::new("-n 4   --no-huge").with_memory(512);
    let (platform, instance) =
        Platform::init_global(options(&journal, tmp.path(), false), Some(params)).unwrap();

    let first = before.first().unwrap();
    let pinned = CpuMask::single(first).unwrap();
    let argv = journal.argv.lock().unwrap().clone();
    assert_eq!(
        argv,
        vec![
            "odpdpdk".to_string(),
            "-c".to_string(),
            pinned.to_hex().unwrap(),
            "-m".to_string(),
            "512".to_string(),
            "-n".to_string(),
            "4".to_string(),
            "--no-huge".to_string(),
        ]
    );
    assert_eq!(journal.affinity_during_init.lock().unwrap().clone(), Some(pinned));
    assert_eq!(affinity::current().unwrap(), before);

    platform.term_global(instance).unwrap();
}

#[test]
#[serial]
fn test_refused_bootstrap_leaves_nothing_behind() {
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let before = affinity::current().unwrap();

    let err = Platform::init_global(
        options(&journal, tmp.path(), true),
        Some(PlatformParams::new("-n 4")),
    )
    .unwrap_err();

    assert!(matches!(err, Error::NativeRuntime(_)));
    assert!(err.report().contains("Cannot init the DPDK EAL"));
    assert_eq!(global_entries(&journal), vec!["+cpumask", "-cpumask"]);
    assert_eq!(affinity::current().unwrap(), before);
    assert!(!instance_claimed());
}

#[test]
#[serial]
fn test_params_override_environment() {
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();

    // Empty params still win over whatever the environment holds.
    let (platform, instance) =
        Platform::init_global(options(&journal, tmp.path(), false), Some(PlatformParams::default()))
            .unwrap();
    assert_eq!(journal.argv.lock().unwrap().len(), 3);
    platform.term_global(instance).unwrap();
}

#[test]
#[serial]
fn test_threads_share_one_instance() {
    const WORKERS: usize = 4;
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let (platform, instance) =
        Platform::init_global(options(&journal, tmp.path(), false), Some(PlatformParams::new("")))
            .unwrap();
    let platform = Arc::new(platform);

    let handles: Vec<_> = (0..=WORKERS)
        .map(|i| {
            let platform = platform.clone();
            std::thread::spawn(move || {
                let role = if i == 0 { ThreadRole::Control } else { ThreadRole::Worker };
                platform.init_local(instance, role).unwrap();
                platform.term_local().unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = journal.entries();
    let control_inits = entries.iter().filter(|e| e.ends_with("@control")).count();
    let worker_inits = entries.iter().filter(|e| e.ends_with("@worker")).count();
    let local_terms = entries.iter().filter(|e| e.ends_with("@local")).count();
    assert_eq!(control_inits, 5);
    assert_eq!(worker_inits, 5 * WORKERS);
    assert_eq!(local_terms, 5 * (WORKERS + 1));
    assert_eq!(platform.status().local_threads, 0);

    platform.term_global(instance).unwrap();
}

#[test]
#[serial]
fn test_term_with_registered_threads_still_succeeds() {
    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let (platform, instance) =
        Platform::init_global(options(&journal, tmp.path(), false), Some(PlatformParams::new("")))
            .unwrap();

    platform.init_local(instance, ThreadRole::Worker).unwrap();
    assert_eq!(platform.status().local_threads, 1);
    platform.term_global(instance).unwrap();

    // The instance is gone; this thread can no longer leave cleanly.
    assert!(matches!(platform.term_local(), Err(Error::NotInitialized)));
    assert!(!instance_claimed());
}

#[test]
#[serial]
fn test_host_system_info_feeds_status() {
    let sources = tempfile::tempdir().unwrap();
    let meminfo = sources.path().join("meminfo");
    let mounts = sources.path().join("mounts");
    std::fs::write(&meminfo, "MemTotal: 1024 kB\nHugepagesize:    2048 kB\n").unwrap();
    std::fs::write(
        &mounts,
        format!(
            "proc /proc proc rw 0 0\nnodev {} hugetlbfs rw,relatime 0 0\n",
            sources.path().display()
        ),
    )
    .unwrap();

    let journal = Arc::new(Journal::default());
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = options(&journal, tmp.path(), false);
    opts.subsystems = opts.subsystems.with(
        InitStage::SystemInfo,
        Arc::new(HostSystemInfo::with_sources(&meminfo, &mounts)),
    );

    let (platform, instance) = Platform::init_global(opts, Some(PlatformParams::new(""))).unwrap();
    let status = platform.status();
    assert_eq!(status.system_info.huge_page_size_kb, Some(2048));
    assert_eq!(status.system_info.huge_page_dir.as_deref(), Some(sources.path()));
    assert!(status.system_info.cpu_count >= 1);
    platform.term_global(instance).unwrap();
}

#[test]
#[ignore]
#[serial]
fn bench_global_cycle() {
    const ITERATIONS: usize = 200;
    let tmp = tempfile::tempdir().unwrap();

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let journal = Arc::new(Journal::default());
        let (platform, instance) = Platform::init_global(
            options(&journal, tmp.path(), false),
            Some(PlatformParams::new("--no-huge")),
        )
        .unwrap();
        platform.term_global(instance).unwrap();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / ITERATIONS as u32;

    eprintln!("[bench_global_cycle] {ITERATIONS} iterations in {elapsed:?} ({per_iter:?}/iter)");
    assert!(
        per_iter.as_millis() < 5,
        "init_global + term_global should complete in < 5 ms, got {per_iter:?}"
    );
}
