//! Types and functions for the command-line interface
//!
//! No stability guaranties apply

use std::path::Path;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use miette::{Result, WrapErr};

use self::config::Config;
use crate::{
    connection::Port,
    error::Error,
    image::{load_file, Mat},
    progress::ProgressCallbacks,
    protocol::{ConnectParams, Endian, Frequency},
    Flasher,
};

pub mod config;

/// Serial port used when neither the command line nor the config names one
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

/// Establish a connection with a target device
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct ConnectArgs {
    /// Serial port, `usb` or `usb:VVVV:PPPP` the target is attached to
    #[arg(short = 'p', long, env = "H8FLASH_PORT")]
    pub port: Option<String>,
    /// Input clock frequency in MHz, e.g. `12.5`
    #[arg(short = 'f', long)]
    pub freq: Option<String>,
    /// Byte order of the image on v2 targets, `l` or `b`
    #[arg(short = 'e', long)]
    pub endian: Option<String>,
    /// Index of the device to select on v1 targets
    #[arg(long, default_value_t = 0)]
    pub device: usize,
    /// Index of the clock mode to select on v1 targets
    #[arg(long, default_value_t = 0)]
    pub clock_mode: usize,
}

/// Options controlling how the image is written
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct FlashArgs {
    /// Write to the user boot area instead of the user area
    #[arg(long)]
    pub userboot: bool,
    /// Treat the image as raw binary, skipping format detection
    #[arg(short = 'b', long)]
    pub binary: bool,
}

impl FlashArgs {
    pub fn mat(&self) -> Mat {
        if self.userboot {
            Mat::UserBoot
        } else {
            Mat::User
        }
    }
}

impl ConnectArgs {
    /// Port from the command line, the config, or the default
    pub fn port(&self, config: &Config) -> Result<Port, Error> {
        self.port
            .as_deref()
            .or(config.port.as_deref())
            .unwrap_or(DEFAULT_PORT)
            .parse()
    }

    /// Connection parameters, command line values overriding the config
    pub fn params(&self, config: &Config) -> Result<ConnectParams, Error> {
        let input_freq: Frequency = self
            .freq
            .as_deref()
            .or(config.frequency.as_deref())
            .ok_or(Error::NoFrequency)?
            .parse()?;
        let endian = match self.endian.as_deref().or(config.endian.as_deref()) {
            Some(endian) => endian.parse()?,
            None => Endian::default(),
        };

        Ok(ConnectParams {
            input_freq,
            endian,
            device: self.device,
            clock_mode: self.clock_mode,
        })
    }
}

/// Open the port and run the boot mode handshake
pub fn connect(args: &ConnectArgs, config: &Config) -> Result<Flasher> {
    let port = args.port(config)?;
    info!("Using port {:?}", port);

    Flasher::connect(&port).wrap_err("Failed to connect to the target")
}

/// Print what the target reports about itself
pub fn list_target(args: &ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(args, config)?;

    let target = flasher.target_info()?;
    println!("{}", target);

    flasher.close()?;
    Ok(())
}

/// Connect, negotiate and write `image` to the target
pub fn flash(args: &ConnectArgs, flash_args: &FlashArgs, config: &Config, image: &Path) -> Result<()> {
    let params = args.params(config)?;
    let mat = flash_args.mat();

    let mut flasher = connect(args, config)?;
    flasher.setup(&params)?;
    println!("Connected to target ({} protocol)", flasher.version());

    let mut areas = flasher.area_list(mat)?;
    println!("{} area map", mat);
    for area in &areas {
        println!("  {}", area);
    }

    // Fill the areas already queried for the map, the target is asked once
    let format = load_file(image, flash_args.binary, &mut areas)
        .wrap_err_with(|| format!("Failed to load {}", image.display()))?;

    let mut progress = H8flashProgress::default();
    let written = flasher
        .write_areas(&areas, mat, &mut Some(&mut progress))
        .wrap_err_with(|| format!("Failed to write {}", image.display()))?;
    println!("Wrote {} bytes from {} image", written, format);

    flasher.close()?;
    Ok(())
}

/// Progress bar for the flash write
#[derive(Default)]
pub struct H8flashProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for H8flashProgress {
    fn init(&mut self, addr: u32, total: usize) {
        let pb = ProgressBar::new(total as u64)
            .with_message(format!("{:#010x}", addr))
            .with_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );

        self.pb = Some(pb);
    }

    fn update(&mut self, current: usize) {
        if let Some(ref pb) = self.pb {
            pb.set_position(current as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(ref pb) = self.pb {
            pb.finish_with_message("done");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConnectArgs {
        ConnectArgs {
            port: None,
            freq: None,
            endian: None,
            device: 0,
            clock_mode: 1,
        }
    }

    #[test]
    fn command_line_overrides_config() {
        let config = Config {
            port: Some("/dev/ttyUSB3".into()),
            frequency: Some("20".into()),
            endian: Some("b".into()),
        };
        let args = ConnectArgs {
            freq: Some("12.5".into()),
            ..args()
        };

        let params = args.params(&config).unwrap();

        assert_eq!(params.input_freq.hundredths(), 1250);
        assert_eq!(params.endian, Endian::Big);
        assert_eq!(params.clock_mode, 1);
        assert_eq!(
            args.port(&config).unwrap(),
            Port::Serial("/dev/ttyUSB3".into())
        );
    }

    #[test]
    fn defaults_without_config() {
        let config = Config::default();

        assert_eq!(
            args().port(&config).unwrap(),
            Port::Serial(DEFAULT_PORT.into())
        );
        assert!(matches!(args().params(&config), Err(Error::NoFrequency)));

        let params = ConnectArgs {
            freq: Some("9.83".into()),
            ..args()
        }
        .params(&config)
        .unwrap();
        assert_eq!(params.endian, Endian::Little);
    }

    #[test]
    fn invalid_endian_is_rejected() {
        let args = ConnectArgs {
            freq: Some("10".into()),
            endian: Some("x".into()),
            ..args()
        };

        assert!(matches!(
            args.params(&Config::default()),
            Err(Error::InvalidEndian('x'))
        ));
    }
}
