//! # Skirmish Lobby Server
//!
//! Standalone authoritative lobby and match server.
//!
//! ## Usage
//!
//! ```bash
//! lobby_server --port 7777 --max-clients 16
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use skirmish_netcode::server::{GameServer, ServerHooks};
use skirmish_netcode::settings::NetcodeSettings;

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SKIRMISH LOBBY SERVER                                    ║");
    println!("║         AUTHORITATIVE LOBBY + MATCH STATE                        ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = "skirmish.toml".to_owned();
    let mut port_override: Option<u16> = None;
    let mut max_clients_override: Option<usize> = None;
    let mut duration_secs: Option<u32> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path.clone_from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--max-clients" | "-m" => {
                if i + 1 < args.len() {
                    max_clients_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: lobby_server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>        Settings file (default: skirmish.toml)");
                println!("  -p, --port <PORT>          UDP port to bind (default: 7777)");
                println!("  -m, --max-clients <NUM>    Maximum clients (default: 16)");
                println!("  -d, --duration <SECS>      Run for N seconds then exit");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let settings = NetcodeSettings::load(&config_path);
    let port = port_override.unwrap_or(settings.server.port);
    let max_clients = max_clients_override.unwrap_or(settings.server.max_clients);

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Bind Address:       0.0.0.0:{port}");
    println!("│ Max Clients:        {max_clients}");
    println!("│ Transform Emit:     every {} ms", settings.server.transform_emit_ms);
    if let Some(d) = duration_secs {
        println!("│ Duration:           {d} seconds");
    } else {
        println!("│ Duration:           infinite");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let connected = Arc::new(AtomicUsize::new(0));
    let connected_up = Arc::clone(&connected);
    let connected_down = Arc::clone(&connected);
    let connected_timeout = Arc::clone(&connected);

    let hooks = ServerHooks {
        on_started: Some(Box::new(|addr| {
            println!("Listening on {addr}");
        })),
        on_connect: Some(Box::new(move |id, addr| {
            let total = connected_up.fetch_add(1, Ordering::Relaxed) + 1;
            println!("+ peer {id} connected from {addr} ({total} online)");
        })),
        on_disconnect: Some(Box::new(move |id| {
            let total = connected_down.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
            println!("- peer {id} disconnected ({total} online)");
        })),
        on_timeout: Some(Box::new(move |id| {
            let total = connected_timeout
                .fetch_sub(1, Ordering::Relaxed)
                .saturating_sub(1);
            println!("- peer {id} timed out ({total} online)");
        })),
        on_leave: Some(Box::new(|id| {
            println!("  peer {id} left the lobby");
        })),
        on_stopped: Some(Box::new(|| {
            println!("Server stopped");
        })),
    };

    let server = GameServer::new(hooks).with_emit_interval(settings.server.emit_interval());

    println!("Starting server...");
    println!();
    server.start(port, max_clients);

    let start = Instant::now();
    loop {
        if let Some(duration) = duration_secs {
            if start.elapsed().as_secs() >= u64::from(duration) {
                break;
            }
        }
        if !server.is_running() && start.elapsed() > Duration::from_secs(1) {
            // Bind failure or external stop; nothing left to wait for.
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    println!();
    println!("Shutting down...");
    server.stop_and_wait();
}
