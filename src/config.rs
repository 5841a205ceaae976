// ===================== config.rs =====================
// Everything the device needs is fixed here or at init time; the controller
// only ever sees an immutable `Config`.

use std::{fmt, time::Duration};

use anyhow::{ensure, Context, Result};
use heapless::String as HString;
use serde::Deserialize;

// ==== parameters ====
pub const SAMPLE_RATE_HZ: u32       = 16_000;
pub const RECORD_SECONDS: u32       = 10;
pub const ADC_PIN: u8               = 34;      // GPIO34, ADC1 channel 6
pub const SD_CS_PIN: u8             = 5;
pub const ADC_MIDPOINT: u16         = 2_048;   // 12-bit ADC
pub const SAMPLE_GAIN: i32          = 16;      // 12-bit → full 16-bit swing
pub const RECORDING_NAME: &str      = "heartbeat.wav";
pub const STORAGE_ROOT: &str        = "/sdcard";
pub const SERVER_HOST: &str         = "192.168.1.50";
pub const SERVER_PORT: u16          = 8_000;
pub const SERVER_PATH: &str         = "/upload";
pub const CYCLE_DELAY_SECS: u64     = 30;
pub const RESPONSE_TIMEOUT_SECS: u64 = 5;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

// ====== Wi-Fi credentials – injected at build ======
const WIFI_SSID: &str = match option_env!("WIFI_SSID") { Some(s) => s, None => "" };
const WIFI_PASS: &str = match option_env!("WIFI_PASS") { Some(s) => s, None => "" };

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self { host: SERVER_HOST.into(), port: SERVER_PORT, path: SERVER_PATH.into() }
    }
}

impl Endpoint {
    /// Value for the `Host:` header (port omitted when it is 80).
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate_hz: u32,
    pub record_seconds: u32,
    pub adc_pin: u8,
    pub sd_cs_pin: u8,
    pub adc_midpoint: u16,
    pub sample_gain: i32,
    pub recording_name: String,
    pub storage_root: String,
    pub endpoint: Endpoint,
    pub cycle_delay_secs: u64,
    pub response_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub wifi_ssid: HString<32>,
    pub wifi_pass: HString<64>,
}

impl Default for Config {
    fn default() -> Self {
        // credentials longer than the buffers are left empty
        let mut wifi_ssid: HString<32> = HString::new();
        let _ = wifi_ssid.push_str(WIFI_SSID);
        let mut wifi_pass: HString<64> = HString::new();
        let _ = wifi_pass.push_str(WIFI_PASS);

        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            record_seconds: RECORD_SECONDS,
            adc_pin: ADC_PIN,
            sd_cs_pin: SD_CS_PIN,
            adc_midpoint: ADC_MIDPOINT,
            sample_gain: SAMPLE_GAIN,
            recording_name: RECORDING_NAME.into(),
            storage_root: STORAGE_ROOT.into(),
            endpoint: Endpoint::default(),
            cycle_delay_secs: CYCLE_DELAY_SECS,
            response_timeout_secs: RESPONSE_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            wifi_ssid,
            wifi_pass,
        }
    }
}

impl Config {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(text).context("bad config json")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.sample_rate_hz > 0, "sample rate must be > 0");
        ensure!(self.record_seconds > 0, "recording duration must be > 0");
        ensure!(self.sample_gain != 0, "sample gain must be non-zero");
        ensure!(
            self.recording_name.to_ascii_lowercase().ends_with(".wav"),
            "recording name {:?} must end in .wav (collector rejects anything else)",
            self.recording_name
        );
        ensure!(!self.endpoint.host.is_empty(), "server host is empty");
        ensure!(
            self.endpoint.path.starts_with('/'),
            "server path {:?} must start with '/'",
            self.endpoint.path
        );
        // header fields are u32
        ensure!(
            self.data_bytes() <= u64::from(u32::MAX - 36),
            "recording too long for a WAV header"
        );
        Ok(())
    }

    pub fn num_samples(&self) -> u32 {
        self.sample_rate_hz.saturating_mul(self.record_seconds)
    }

    fn data_bytes(&self) -> u64 {
        u64::from(self.sample_rate_hz) * u64::from(self.record_seconds) * 2
    }

    /// Nominal (rounded) period; deadlines themselves come from `clock::sample_deadline`.
    pub fn sample_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.sample_rate_hz.max(1)))
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
