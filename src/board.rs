// ===================== board.rs =====================
// ESP32 bring-up: Wi-Fi station, microphone ADC channel, SD card over SPI.
//  • Wi-Fi STA, blocking until DHCP is done
//  • ADC1 one-shot on GPIO34, 11 dB attenuation (full 0–3.3 V swing)
//  • SD card on SPI3 (SCK 18, MOSI 23, MISO 19, CS 5), FAT at /sdcard

use anyhow::{ensure, Context, Result};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{AnyIOPin, Gpio34},
    peripherals::Peripherals,
    spi::{config::DriverConfig, Dma, SpiDriver, SPI3},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    fs::fatfs::Fatfs,
    io::vfs::MountedFatfs,
    nvs::EspDefaultNvsPartition,
    sd::{spi::SdSpiHostDriver, SdCardConfiguration, SdCardDriver},
    wifi::{BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use log::{info, warn};

use heartbeat_recorder::{config::Config, net::NetworkLink, sensor::Sensor};

pub struct WifiLink {
    wifi: &'static mut BlockingWifi<EspWifi<'static>>,
}

impl NetworkLink for WifiLink {
    fn is_connected(&mut self) -> bool {
        self.wifi.is_started().unwrap_or(false) && self.wifi.is_connected().unwrap_or(false)
    }

    fn connect(&mut self) -> Result<()> {
        // stop/start clears a half-dead association
        let _ = self.wifi.stop();
        self.wifi.start()?;
        self.wifi.connect()?;
        self.wifi.wait_netif_up()?;
        info!("Wi-Fi back, IP: {}", self.wifi.wifi().sta_netif().get_ip_info()?.ip);
        Ok(())
    }
}

pub struct AdcSensor {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
    fallback: u16,
}

impl Sensor for AdcSensor {
    fn read_raw(&mut self) -> u16 {
        // a failed conversion becomes silence rather than a broken recording
        match self.channel.read_raw() {
            Ok(v) => v,
            Err(e) => {
                warn!("ADC read: {e}");
                self.fallback
            }
        }
    }
}

pub struct Board {
    pub link: WifiLink,
    pub sensor: AdcSensor,
}

/// Wi-Fi and ADC. The SD card is mounted separately so its failure can halt.
pub fn init(cfg: &Config) -> Result<(Board, SdPins)> {
    ensure!(cfg.adc_pin == 34, "board wires the microphone to GPIO34, config says {}", cfg.adc_pin);
    ensure!(cfg.sd_cs_pin == 5, "board wires SD chip-select to GPIO5, config says {}", cfg.sd_cs_pin);
    ensure!(!cfg.wifi_ssid.is_empty(), "WIFI_SSID was not set at build time");

    let per = Peripherals::take()?;
    let sys = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let wifi_drv = EspWifi::new(per.modem, sys.clone(), Some(nvs))?;
    let mut wifi = BlockingWifi::wrap(wifi_drv, sys)?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: cfg.wifi_ssid.clone(),
        password: cfg.wifi_pass.clone(),
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.connect().context("Wi-Fi connect")?;
    wifi.wait_netif_up()?;
    info!("IP: {:?}", wifi.wifi().sta_netif().get_ip_info()?);
    let wifi: &'static mut BlockingWifi<_> = Box::leak(Box::new(wifi));

    let adc = AdcDriver::new(per.adc1)?;
    let adc_cfg = AdcChannelConfig { attenuation: DB_11, ..Default::default() };
    let channel = AdcChannelDriver::new(adc, per.pins.gpio34, &adc_cfg)?;

    let board = Board {
        link: WifiLink { wifi },
        sensor: AdcSensor { channel, fallback: cfg.adc_midpoint },
    };
    let sd = SdPins {
        spi: per.spi3,
        sck: per.pins.gpio18.into(),
        mosi: per.pins.gpio23.into(),
        miso: per.pins.gpio19.into(),
        cs: per.pins.gpio5.into(),
    };
    Ok((board, sd))
}

pub struct SdPins {
    spi: SPI3,
    sck: AnyIOPin,
    mosi: AnyIOPin,
    miso: AnyIOPin,
    cs: AnyIOPin,
}

/// Mounts the card's FAT volume at `root`; stays mounted for the device's life.
pub fn mount_sdcard(pins: SdPins, root: &str) -> Result<()> {
    let spi = SpiDriver::new(
        pins.spi,
        pins.sck,
        pins.mosi,
        Some(pins.miso),
        &DriverConfig::default().dma(Dma::Auto(4096)),
    )?;
    let host = SdSpiHostDriver::new(spi, Some(pins.cs), AnyIOPin::none(), AnyIOPin::none(), AnyIOPin::none(), None)?;
    let card = SdCardDriver::new_spi(host, &SdCardConfiguration::new()).context("SD card not answering")?;
    let mounted = MountedFatfs::mount(Fatfs::new_sdcard(0, card)?, root, 4).context("FAT mount")?;
    Box::leak(Box::new(mounted));
    info!("SD card mounted at {root}");
    Ok(())
}
