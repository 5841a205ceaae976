// ===================== cycle.rs =====================
//! purge → record → upload → wait, forever, one cycle at a time.

use std::io;

use log::{debug, error, info, warn};

use crate::{
    clock::{sample_deadline, Clock, SamplingClock},
    config::Config,
    error::{Error, Result},
    http,
    net::{NetworkLink, Transport},
    sensor::Sensor,
    storage::StorageSink,
    wav::{ContainerWriter, SampleScale},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Purging,
    Recording,
    Uploading,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    StorageFailed,
    UploadFailed,
}

pub struct CycleController<S, N, T, L, C> {
    config: Config,
    storage: S,
    sensor: N,
    transport: T,
    link: L,
    sampler: SamplingClock<C>,
    state: CycleState,
    cycles: u32,
    last_error: Option<Error>,
}

impl<S, N, T, L, C> CycleController<S, N, T, L, C>
where
    S: StorageSink,
    N: Sensor,
    T: Transport,
    L: NetworkLink,
    C: Clock,
{
    pub fn new(config: Config, storage: S, sensor: N, transport: T, link: L, clock: C) -> Self {
        Self {
            config,
            storage,
            sensor,
            transport,
            link,
            sampler: SamplingClock::new(clock),
            state: CycleState::Idle,
            cycles: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Error that ended the most recent cycle early, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn run_forever(&mut self) -> ! {
        loop {
            self.run_cycle();
        }
    }

    /// One full cycle, including the inter-cycle wait.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        self.last_error = None;
        info!("── cycle {} ──", self.cycles);

        let outcome = match self.purge_and_record() {
            Ok(()) => self.upload(),
            Err(e) => {
                error!("recording failed: {e}");
                self.last_error = Some(e);
                CycleOutcome::StorageFailed
            }
        };

        self.enter(CycleState::Waiting);
        info!("cycle {} → {outcome:?}; next in {:?}", self.cycles, self.config.cycle_delay());
        self.sampler.clock().delay(self.config.cycle_delay());
        self.enter(CycleState::Idle);
        outcome
    }

    fn enter(&mut self, next: CycleState) {
        debug!("{:?} → {next:?}", self.state);
        self.state = next;
    }

    fn purge_and_record(&mut self) -> Result<()> {
        self.enter(CycleState::Purging);
        let name = self.config.recording_name.as_str();
        if self.storage.exists(name) {
            debug!("🗑  removing previous {name}");
        }
        self.storage.delete(name)?;

        self.enter(CycleState::Recording);
        let cfg = &self.config;
        let num_samples = cfg.num_samples();
        let period = cfg.sample_period();
        let scale = SampleScale { midpoint: cfg.adc_midpoint, gain: cfg.sample_gain };
        info!("🎙  recording {num_samples} samples @ {} Hz → {}", cfg.sample_rate_hz, cfg.recording_name);

        let mut writer =
            ContainerWriter::begin(&mut self.storage, &cfg.recording_name, cfg.sample_rate_hz, num_samples, scale)?;
        let start = self.sampler.start();
        for i in 0..num_samples {
            self.sampler.wait_until(sample_deadline(start, i, cfg.sample_rate_hz), period);
            writer.append_sample(self.sensor.read_raw())?;
        }
        let declared = writer.declared();
        let written = writer.finish()?;

        if written != declared {
            warn!("header declares {declared} samples, wrote {written}");
        }
        let late = self.sampler.late_ticks();
        if late > 0 {
            warn!("{late} of {written} samples taken late");
        }
        info!("💾 sealed {} ({written} samples)", cfg.recording_name);
        Ok(())
    }

    fn upload(&mut self) -> CycleOutcome {
        self.enter(CycleState::Uploading);
        let endpoint = &self.config.endpoint;

        if !self.link.is_connected() {
            warn!("network down – reconnecting…");
            if let Err(e) = self.link.connect() {
                error!("network connect failed: {e:?}");
                self.last_error = Some(Error::connection(
                    endpoint,
                    io::Error::new(io::ErrorKind::NotConnected, e.to_string()),
                ));
                return CycleOutcome::UploadFailed;
            }
        }

        let boundary = format!("----------------ESP32BOUNDARY{:08x}", self.cycles);
        let sent = http::upload(
            &self.storage,
            &self.config.recording_name,
            endpoint,
            &mut self.transport,
            &boundary,
            self.config.response_timeout(),
        );

        match sent {
            Ok(report) => {
                if let Some(reply) = &report.reply {
                    match (&reply.session_id, reply.bpm, &reply.error) {
                        (Some(id), Some(bpm), _) => info!("✅ session {id}: {bpm:.1} BPM"),
                        (_, _, Some(msg)) => warn!("collector: {msg}"),
                        _ => info!("collector reply: {reply:?}"),
                    }
                }
                if report.is_rejected() {
                    warn!("collector answered {:?}: {}", report.status, report.response.trim_end());
                    CycleOutcome::UploadFailed
                } else {
                    // no readable status line: the bytes were delivered, nothing to hold against it
                    CycleOutcome::Success
                }
            }
            Err(e) => {
                error!("upload failed: {e}");
                self.last_error = Some(e);
                CycleOutcome::UploadFailed
            }
        }
    }
}
