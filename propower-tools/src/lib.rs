use getopts::Options;
use propower::Config;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to enumerate available serial ports")]
    EnumerationFailed(#[from] serialport::Error),

    #[error("Could not automatically find an instrument")]
    AutoDetectionFailed,

    #[error("Found {0} possible instruments; please specify one explicitly")]
    MultipleInstrumentsFound(usize),

    #[error("Cannot read config file: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

// The serialport crate only exposes USB VID/PID, so likely instrument ports
// are guessed from the usual USB-serial bridges on microcontroller boards.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortInterface {
    STLink,
    CH340,
    CP210x,
    FTDI,
    Unknown(u16, u16),
}

#[derive(Debug)]
pub struct SerialDevice {
    pub url: String,
    pub ifc: PortInterface,
}

pub fn enum_ports(all: bool) -> Result<Vec<SerialDevice>, ToolError> {
    let mut ports: Vec<SerialDevice> = Vec::new();

    for p in serialport::available_ports()? {
        if let serialport::SerialPortType::UsbPort(info) = &p.port_type {
            let interface = match (info.vid, info.pid) {
                (0x0483, 0x374B) | (0x0483, 0x3752) => PortInterface::STLink,
                (0x1A86, 0x7523) => PortInterface::CH340,
                (0x10C4, 0xEA60) => PortInterface::CP210x,
                (0x0403, 0x6001) | (0x0403, 0x6015) => PortInterface::FTDI,
                (vid, pid) => {
                    if !all {
                        continue;
                    };
                    PortInterface::Unknown(vid, pid)
                }
            };
            #[cfg(target_os = "macos")]
            if p.port_name.starts_with("/dev/tty.") && !all {
                continue;
            }
            log::debug!("serial port {} is {:?}", p.port_name, interface);
            ports.push(SerialDevice {
                url: format!("serial://{}", p.port_name),
                ifc: interface,
            });
        } // else ignore other types: bluetooth, pci, unknown
    }

    Ok(ports)
}

pub fn auto_detect_port() -> Result<String, ToolError> {
    let urls: Vec<String> = enum_ports(false)?
        .into_iter()
        .filter(|dev| !matches!(dev.ifc, PortInterface::Unknown(..)))
        .map(|dev| dev.url)
        .collect();

    match urls.len() {
        0 => Err(ToolError::AutoDetectionFailed),
        1 => Ok(urls[0].clone()),
        n => Err(ToolError::MultipleInstrumentsFound(n)),
    }
}

/// Prints likely instrument ports, then any other serial ports.
pub fn print_ports() -> Result<(), ToolError> {
    let mut unknown = vec![];
    let mut found_any = false;
    for dev in enum_ports(true)? {
        if let PortInterface::Unknown(vid, pid) = dev.ifc {
            unknown.push(format!("{} (vid: {:04x} pid: {:04x})", dev.url, vid, pid));
        } else {
            if !found_any {
                println!("Possible instrument ports:");
                found_any = true;
            }
            println!(" * {} ({:?})", dev.url, dev.ifc);
        }
    }
    if !found_any {
        println!("No likely ports found")
    }
    if !unknown.is_empty() {
        println!("Also found these serial ports");
        for dev in unknown {
            println!(" * {}", dev);
        }
    }
    Ok(())
}

/// Settings read from a YAML file given with `-c`. Absent keys keep the
/// engine defaults.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub port: Option<String>,
    pub buffer_capacity: Option<usize>,
    pub buffer_margin: Option<usize>,
    pub queue_limit: Option<usize>,
    pub status_prefixes: Option<Vec<String>>,
    pub window_secs: Option<f64>,
    pub fps: Option<u64>,
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<ToolConfig, ToolError> {
        ToolConfig::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<ToolConfig, ToolError> {
        if text.trim().is_empty() {
            return Ok(ToolConfig::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply(&self, config: Config) -> Config {
        Config {
            buffer_capacity: self.buffer_capacity.unwrap_or(config.buffer_capacity),
            buffer_margin: self.buffer_margin.unwrap_or(config.buffer_margin),
            queue_limit: self.queue_limit.unwrap_or(config.queue_limit),
            status_prefixes: self
                .status_prefixes
                .clone()
                .unwrap_or(config.status_prefixes),
            ..config
        }
    }
}

pub fn pp_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt(
        "r",
        "",
        "instrument url, e.g. serial:///dev/ttyACM0:115200 or tcp://host:port (default: auto-detect)",
        "url",
    );
    opts.optopt("c", "", "YAML config file", "path");
    opts.optflag("l", "", "list serial ports, then quit");
    opts.optflag("h", "help", "show help");
    opts
}

/// Parsed common options: matches, instrument url (if given) and config.
pub struct PpArgs {
    pub matches: getopts::Matches,
    pub url: Option<String>,
    pub config: ToolConfig,
}

pub fn pp_parseopts(opts: &Options, args: &[String]) -> Result<PpArgs, String> {
    let matches = opts.parse(&args[1.min(args.len())..]).map_err(|f| f.to_string())?;
    let config = match matches.opt_str("c") {
        Some(path) => ToolConfig::load(Path::new(&path)).map_err(|e| e.to_string())?,
        None => ToolConfig::default(),
    };
    let url = matches
        .opt_str("r")
        .or_else(|| matches.free.first().cloned())
        .or_else(|| config.port.clone());
    Ok(PpArgs {
        matches,
        url,
        config,
    })
}

/// Statistics window from a number of seconds. Rejects values that are not
/// positive or do not fit a `Duration`.
pub fn window_duration(secs: f64) -> Result<Duration, String> {
    match Duration::try_from_secs_f64(secs) {
        Ok(window) if !window.is_zero() => Ok(window),
        _ => Err(format!("Invalid window: {}", secs)),
    }
}

/// Engine configuration: defaults, then environment, then the config file.
pub fn engine_config(config: &ToolConfig) -> Config {
    config.apply(Config::from_env())
}
