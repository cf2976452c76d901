//! Write images to a target's flash memory
//!
//! The [Flasher] owns the connection to a target in boot mode together with
//! the protocol engine matching the target's answer to the handshake.

use std::path::Path;

use log::{debug, info};

use crate::{
    connection::{Connection, Port, Transport},
    error::Error,
    image::{load_file, load_image, ImageFormat, Mat, MemoryArea},
    progress::ProgressCallbacks,
    protocol::{for_version, ConnectParams, FlashProtocol, ProtocolVersion, TargetInfo},
};

/// Connect to, configure and write a target device
pub struct Flasher {
    connection: Connection,
    protocol: Box<dyn FlashProtocol>,
}

impl Flasher {
    /// Open `port` and run the boot mode handshake
    pub fn connect(port: &Port) -> Result<Self, Error> {
        info!("Connecting to {:?}", port);
        Self::with_transport(port.open()?)
    }

    /// Run the boot mode handshake over an already opened transport
    pub fn with_transport(transport: Box<dyn Transport>) -> Result<Self, Error> {
        let mut connection = Connection::new(transport);
        let version = connection.begin()?;
        info!("Target speaks the {} boot mode protocol", version);

        Ok(Flasher {
            connection,
            protocol: for_version(version),
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    /// Query the target configuration, as printed in list mode
    pub fn target_info(&mut self) -> Result<TargetInfo, Error> {
        self.protocol.target_info(&mut self.connection)
    }

    /// Negotiate clocks and bitrate until the target accepts programming
    /// commands
    pub fn setup(&mut self, params: &ConnectParams) -> Result<(), Error> {
        self.protocol.setup_connection(&mut self.connection, params)
    }

    /// Writable areas of `mat`, each with a blank image
    pub fn area_list(&mut self, mat: Mat) -> Result<Vec<MemoryArea>, Error> {
        let areas = self.protocol.area_list(&mut self.connection, mat)?;
        if areas.is_empty() {
            return Err(Error::NoAreas(mat));
        }

        for area in &areas {
            debug!("{} area {}", mat, area);
        }

        Ok(areas)
    }

    /// Write the non-blank parts of `areas`, returning the number of image
    /// bytes sent
    pub fn write_areas(
        &mut self,
        areas: &[MemoryArea],
        mat: Mat,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        let written = self
            .protocol
            .write_rom(&mut self.connection, areas, mat, progress)?;
        info!("Wrote {} bytes to the {} area", written, mat);

        Ok(written)
    }

    /// Load `data` into the areas of `mat` and write it
    pub fn load_image_to_flash(
        &mut self,
        data: &[u8],
        mat: Mat,
        force_binary: bool,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        let mut areas = self.area_list(mat)?;
        let format = load_image(data, force_binary, &mut areas)?;
        info!("Loaded {} image", format);

        self.write_areas(&areas, mat, progress)
    }

    /// Load the file at `path` into the areas of `mat` and write it
    pub fn load_file_to_flash(
        &mut self,
        path: &Path,
        mat: Mat,
        force_binary: bool,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(ImageFormat, usize), Error> {
        let mut areas = self.area_list(mat)?;
        let format = load_file(path, force_binary, &mut areas)?;
        info!("Loaded {} image from {}", format, path.display());

        let written = self.write_areas(&areas, mat, progress)?;
        Ok((format, written))
    }

    /// End the session, releasing the port
    pub fn close(self) -> Result<(), Error> {
        self.connection.close()
    }
}
