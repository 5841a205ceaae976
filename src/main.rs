// ===================== main.rs =====================
// Heartbeat recorder
//  • record N seconds from the stethoscope mic into heartbeat.wav
//  • POST it to the collector as multipart/form-data
//  • wait, purge, start over
// On the ESP32 the cycle runs in its own thread with a larger stack; on a
// desktop it runs on the main thread against a local folder and a synthetic
// heartbeat.

use anyhow::Result;
use heartbeat_recorder::Config;

#[cfg(target_os = "espidf")]
mod board;

#[cfg(target_os = "espidf")]
fn app(cfg: Config) -> Result<()> {
    use heartbeat_recorder::{clock::MonotonicClock, net::TcpTransport, storage::DirStorage, CycleController};
    use std::{thread, time::Duration};

    let (board, sd) = board::init(&cfg)?;

    // no medium, no recorder: halt here instead of cycling on errors
    if let Err(e) = board::mount_sdcard(sd, &cfg.storage_root) {
        log::error!("SD init failed: {e:?} – halting");
        loop {
            thread::sleep(Duration::from_secs(1));
        }
    }

    let storage = DirStorage::new(&cfg.storage_root);
    let transport = TcpTransport::new(cfg.connect_timeout());
    let mut ctrl = CycleController::new(cfg, storage, board.sensor, transport, board.link, MonotonicClock::new());
    ctrl.run_forever()
}

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_svc::{log::EspLogger, sys::link_patches};
    use std::{thread, time::Duration};

    link_patches();
    EspLogger::initialize_default();

    let cfg = Config::default();
    cfg.validate()?;
    log::info!("⚙️  {} Hz × {} s → http://{}", cfg.sample_rate_hz, cfg.record_seconds, cfg.endpoint);

    thread::Builder::new()
        .name("cycle-task".into())
        .stack_size(16 * 1024)
        .spawn(move || {
            if let Err(e) = app(cfg) {
                log::error!("app err: {e:?}");
            }
        })?;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use anyhow::Context;
    use heartbeat_recorder::{
        clock::MonotonicClock,
        net::{HostLink, TcpTransport},
        sensor::SyntheticHeartbeat,
        storage::DirStorage,
        CycleController,
    };
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Config::from_json(&text)?
        }
        None => {
            let cfg = Config { storage_root: "recordings".into(), ..Config::default() };
            cfg.validate()?;
            cfg
        }
    };
    std::fs::create_dir_all(&cfg.storage_root).with_context(|| format!("storage root {}", cfg.storage_root))?;
    log::info!("⚙️  {} Hz × {} s → http://{}", cfg.sample_rate_hz, cfg.record_seconds, cfg.endpoint);

    let storage = DirStorage::new(&cfg.storage_root);
    let sensor = SyntheticHeartbeat::new(cfg.sample_rate_hz, 72.0, cfg.adc_midpoint);
    let transport = TcpTransport::new(cfg.connect_timeout());
    let mut ctrl = CycleController::new(cfg, storage, sensor, transport, HostLink, MonotonicClock::new());
    ctrl.run_forever()
}
