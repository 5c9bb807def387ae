//! odp - bring an ODP platform up, run idle worker threads, tear it down
//!
//! Exercises the full lifecycle against the installed DPDK EAL:
//! global init, one control thread plus N workers through local init,
//! then an orderly shutdown on Ctrl-C (or right away with `--once`).

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use odp_core::{init_tracing, DynamicEal, InitOptions, Instance, Platform, PlatformParams, ThreadRole};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const IDLE_POLL: Duration = Duration::from_millis(50);

fn print_help() {
    println!("odp - ODP platform lifecycle v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  odp [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help          Print this help message");
    println!("  -v, --version       Print version information");
    println!("  -w, --workers <N>   Worker threads to start (default: 2)");
    println!("  -c, --config <FILE> Platform params as JSON (memory, cmdline, eal_library)");
    println!("      --once          Tear down right after bring-up");
    println!();
    println!("ENVIRONMENT:");
    println!("  ODP_PLATFORM_PARAMS  DPDK arguments used when no config file is given");
    println!("  ODP_DPDK_EAL_LIB     Path to librte_eal.so");
    println!("  RUST_LOG             Log filter (default: info)");
}

#[derive(Debug)]
struct Args {
    workers: usize,
    config: Option<PathBuf>,
    once: bool,
}

/// `Ok(None)` means help or version was printed.
fn parse_args() -> Result<Option<Args>> {
    let mut args = Args {
        workers: 2,
        config: None,
        once: false,
    };
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("odp {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "-w" | "--workers" => {
                let value = iter.next().context("--workers needs a value")?;
                args.workers = value
                    .parse()
                    .with_context(|| format!("invalid worker count '{}'", value))?;
            }
            "-c" | "--config" => {
                args.config = Some(iter.next().context("--config needs a file")?.into());
            }
            "--once" => args.once = true,
            other => bail!("unrecognized argument '{}'. Run 'odp --help' for usage.", other),
        }
    }
    Ok(Some(args))
}

fn spawn_thread(
    platform: Arc<Platform>,
    instance: Instance,
    role: ThreadRole,
    index: usize,
    token: CancellationToken,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("odp-{}-{}", role, index))
        .spawn(move || {
            if let Err(e) = platform.init_local(instance, role) {
                error!(role = %role, index, "Local init failed: {}", e.report());
                return;
            }
            while !token.is_cancelled() {
                thread::sleep(IDLE_POLL);
            }
            match platform.term_local() {
                Ok(exit) if exit.is_last() => info!("Last thread out"),
                Ok(_) => {}
                Err(e) => error!(role = %role, index, "Local term failed: {}", e.report()),
            }
        })
        .context("Failed to spawn platform thread")
}

/// Start the control thread, then `workers` worker threads.
///
/// Handles of threads started before a failure stay in `handles` so the
/// caller can still stop them.
fn start_threads<F>(workers: usize, handles: &mut Vec<JoinHandle<()>>, mut spawn: F) -> Result<()>
where
    F: FnMut(ThreadRole, usize) -> Result<JoinHandle<()>>,
{
    handles.push(spawn(ThreadRole::Control, 0)?);
    for index in 0..workers {
        handles.push(spawn(ThreadRole::Worker, index)?);
    }
    Ok(())
}

async fn run(
    platform: &Arc<Platform>,
    instance: Instance,
    args: &Args,
    token: &CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<()> {
    start_threads(args.workers, handles, |role, index| {
        spawn_thread(platform.clone(), instance, role, index, token.clone())
    })?;

    println!("{}", serde_json::to_string_pretty(&platform.status())?);

    if !args.once {
        info!("Running. Press Ctrl-C to shut down");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }
    Ok(())
}

/// Stop every started thread and tear the platform down.
fn shutdown(
    platform: &Platform,
    instance: Instance,
    token: &CancellationToken,
    handles: Vec<JoinHandle<()>>,
) -> Result<()> {
    token.cancel();
    for handle in handles {
        if handle.join().is_err() {
            error!("Platform thread panicked");
        }
    }
    platform
        .term_global(instance)
        .map_err(|e| anyhow::anyhow!(e.report()))
        .context("Global term failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };
    init_tracing();

    let params = args
        .config
        .as_deref()
        .map(PlatformParams::from_json_file)
        .transpose()?;
    let options = InitOptions::default()
        .with_native_runtime(Arc::new(DynamicEal::for_params(params.as_ref())));

    let (platform, instance) = Platform::init_global(options, params)
        .map_err(|e| anyhow::anyhow!(e.report()))
        .context("Global init failed")?;
    let platform = Arc::new(platform);
    info!(instance = %instance, workers = args.workers, "Platform up");

    let token = CancellationToken::new();
    let mut handles = Vec::new();
    let running = run(&platform, instance, &args, &token, &mut handles).await;

    let stopped = tokio::task::spawn_blocking({
        let platform = platform.clone();
        move || shutdown(&platform, instance, &token, handles)
    })
    .await?;

    if let Err(e) = running {
        if let Err(term) = stopped {
            error!("Shutdown after failure incomplete: {:#}", term);
        }
        return Err(e);
    }
    stopped?;
    info!("Platform down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use odp_core::lifecycle::instance_claimed;
    use odp_core::NativeRuntime;
    use serial_test::serial;

    struct Idle;

    impl NativeRuntime for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        fn init(&self, argv: &[String]) -> anyhow::Result<usize> {
            Ok(argv.len())
        }
    }

    #[test]
    #[serial]
    fn test_spawn_failure_still_tears_down() {
        let tmp = tempfile::tempdir().unwrap();
        let options = InitOptions::default()
            .with_tmp_dir(tmp.path())
            .with_native_runtime(Arc::new(Idle));
        let (platform, instance) =
            Platform::init_global(options, Some(PlatformParams::new(""))).unwrap();
        let platform = Arc::new(platform);
        let token = CancellationToken::new();

        let mut handles = Vec::new();
        let started = start_threads(3, &mut handles, |role, index| {
            if role == ThreadRole::Worker && index == 1 {
                bail!("no more threads");
            }
            spawn_thread(platform.clone(), instance, role, index, token.clone())
        });
        assert!(started.is_err());
        assert_eq!(handles.len(), 2);

        shutdown(&platform, instance, &token, handles).unwrap();
        assert!(!platform.is_live());
        assert_eq!(platform.status().local_threads, 0);
        assert!(!instance_claimed());
    }
}
