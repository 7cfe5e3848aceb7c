//! SPEP daemon binary
//!
//! Provides commands to start, stop, and manage the SPEP session daemon.

use anyhow::{anyhow, Context, Result};
use spepd::config::DaemonConfig;
use spepd::identifier::{IdentifierCache, IdentifierCacheDispatcher, IdentifierCacheImpl};
use spepd::ipc::{Engine, MultiplexingDispatcher, ServerSocket};
use spepd::pep::{SessionGroupCache, SessionGroupCacheDispatcher, SessionGroupCacheImpl};
use spepd::sessions::{SessionCache, SessionCacheDispatcher, SessionCacheImpl};
use std::env;
use std::fs;
use std::net::{Ipv4Addr, TcpStream};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = &args[1];

    match command.as_str() {
        "start" => start_daemon(),
        "stop" => stop_daemon(),
        "status" => check_status(),
        "restart" => restart_daemon(),
        "-h" | "--help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Error: Unknown command '{}'", command);
            print_usage();
            process::exit(1);
        }
    }
}

fn runtime_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .ok_or_else(|| anyhow!("Cannot determine home directory"))?
        .join(".spep");
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

fn pid_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("spepd.pid"))
}

fn daemon_running(port: u16) -> bool {
    TcpStream::connect_timeout(
        &(Ipv4Addr::LOCALHOST, port).into(),
        Duration::from_millis(500),
    )
    .is_ok()
}

fn start_daemon() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::load();

    if daemon_running(config.port) {
        eprintln!("Error: Daemon is already running on port {}", config.port);
        eprintln!("Use 'spepd stop' to stop it first, or 'spepd restart' to restart.");
        process::exit(1);
    }

    // The three caches the daemon owns
    let session_cache: Arc<SessionCacheImpl> = Arc::new(SessionCacheImpl::new());
    let group_cache = Arc::new(SessionGroupCacheImpl::new(config.default_policy_decision));
    let identifier_cache: Arc<IdentifierCacheImpl> = Arc::new(IdentifierCacheImpl::new());

    let dispatcher = MultiplexingDispatcher::new()
        .with(Box::new(SessionCacheDispatcher::new(
            Arc::clone(&session_cache) as Arc<dyn SessionCache>,
        )))
        .with(Box::new(SessionGroupCacheDispatcher::new(
            Arc::clone(&group_cache) as Arc<dyn SessionGroupCache>,
        )))
        .with(Box::new(IdentifierCacheDispatcher::new(
            Arc::clone(&identifier_cache) as Arc<dyn IdentifierCache>,
        )));

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGHUP,
    ] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .with_context(|| format!("registering handler for signal {}", signal))?;
    }

    let mut server = ServerSocket::new(Arc::new(dispatcher), config.port, Arc::clone(&shutdown));
    server
        .bind()
        .with_context(|| format!("binding 127.0.0.1:{}", config.port))?;

    let pid_file = pid_path()?;
    fs::write(&pid_file, process::id().to_string())
        .with_context(|| format!("writing {}", pid_file.display()))?;

    info!(
        port = config.port,
        service_id = server.service_id(),
        "starting SPEP daemon"
    );

    // Background sweeper for both time-bounded caches. Sleeps a second at a
    // time so shutdown is honoured promptly.
    let sweeper_shutdown = Arc::clone(&shutdown);
    let sweep_interval = config.session_cache_interval.max(1);
    let session_timeout = config.session_cache_timeout;
    let identifier_timeout = config.identifier_cache_timeout;
    let sweeper_sessions = Arc::clone(&session_cache);
    let sweeper_identifiers = Arc::clone(&identifier_cache);
    let sweeper = thread::spawn(move || {
        let mut elapsed = 0u64;
        while !sweeper_shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_secs(1));
            elapsed += 1;
            if elapsed < sweep_interval {
                continue;
            }
            elapsed = 0;
            if let Err(e) = sweeper_sessions.terminate_expired_sessions(session_timeout) {
                warn!(error = %e, "session sweep failed");
            }
            if let Err(e) = sweeper_identifiers.sweep(identifier_timeout) {
                warn!(error = %e, "identifier sweep failed");
            }
        }
    });

    let result = server.run();

    if sweeper.join().is_err() {
        warn!("sweeper thread panicked");
    }
    fs::remove_file(&pid_file).ok();
    info!("SPEP daemon stopped");

    result.context("daemon listener failed")
}

fn stop_daemon() -> Result<()> {
    let pid_file = pid_path()?;

    if !pid_file.exists() {
        println!("Daemon is not running (PID file not found).");
        return Ok(());
    }

    let pid_str = fs::read_to_string(&pid_file)?;
    let pid: i32 = pid_str
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid PID in {}", pid_file.display()))?;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    println!("Sent shutdown signal to daemon (PID {}).", pid);

    // Wait for the process to exit (up to 5 seconds)
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(100));
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        if !alive {
            println!("Daemon stopped.");
            fs::remove_file(&pid_file).ok();
            return Ok(());
        }
    }

    eprintln!("Warning: Daemon may not have stopped cleanly.");
    Ok(())
}

fn check_status() -> Result<()> {
    let config = DaemonConfig::load();

    if !daemon_running(config.port) {
        println!("Daemon is not running on port {}.", config.port);
        return Ok(());
    }

    println!("Daemon is running on port {}.", config.port);

    // The daemon announces its service ID on every connection
    if let Ok(stream) = TcpStream::connect((Ipv4Addr::LOCALHOST, config.port)) {
        if let Ok(mut engine) = Engine::from_stream(&stream) {
            if let Ok(service_id) = engine.get_object::<String>() {
                println!("Service ID: {}", service_id);
            }
        }
    }

    let pid_file = pid_path()?;
    if pid_file.exists() {
        if let Ok(pid_str) = fs::read_to_string(&pid_file) {
            println!("PID: {}", pid_str.trim());
        }
    }

    Ok(())
}

fn restart_daemon() -> Result<()> {
    println!("Stopping daemon...");
    stop_daemon()?;

    // Brief pause to ensure the port is released
    thread::sleep(Duration::from_millis(500));

    println!("Starting daemon...");
    start_daemon()
}

fn print_usage() {
    println!("SPEP Session Daemon v0.1.0");
    println!();
    println!("Usage: spepd <command>");
    println!();
    println!("Commands:");
    println!("  start      Start the SPEP daemon");
    println!("  stop       Stop the SPEP daemon");
    println!("  status     Check daemon status");
    println!("  restart    Restart the daemon");
    println!("  -h, --help Show this help message");
    println!();
    println!("Configuration is read from ~/.spep/spepd.conf (see SPEP_* keys).");
}
