//! On-chip flash writer for Renesas H8, SH and RX microcontrollers
//!
//! The target is strapped into boot mode and reached over a serial line or
//! the USB boot function. After the handshake the boot ROM reveals which of
//! the two protocol generations it speaks; [Flasher] drives the matching
//! engine through clock and bitrate negotiation and writes an image, loaded
//! from a raw binary, S-record or ELF file, into the user or user boot area.
//!
//! ```no_run
//! use h8flash::{connection::Port, image::Mat, protocol::ConnectParams, Flasher};
//!
//! # fn main() -> Result<(), h8flash::Error> {
//! let port: Port = "/dev/ttyUSB0".parse()?;
//! let mut flasher = Flasher::connect(&port)?;
//! flasher.setup(&ConnectParams::new("12.5".parse()?))?;
//! flasher.load_file_to_flash("app.mot".as_ref(), Mat::User, false, &mut None)?;
//! flasher.close()?;
//! # Ok(())
//! # }
//! ```

pub use self::{error::Error, flasher::Flasher};

#[cfg(feature = "cli")]
pub mod cli;
pub mod connection;
pub mod error;
pub mod flasher;
pub mod image;
pub mod progress;
pub mod protocol;

/// Logging utilities
#[cfg(feature = "cli")]
pub mod logging {
    use env_logger::{Builder, Env};
    use log::LevelFilter;

    /// Initialize the logger with the given [LevelFilter], unless `RUST_LOG`
    /// says otherwise
    pub fn initialize_logger(filter: LevelFilter) {
        Builder::from_env(Env::default().default_filter_or(filter.as_str()))
            .format_target(false)
            .init();
    }
}
