//! Legacy boot mode protocol, as spoken by H8/300H, H8S and early SH boot ROMs
//!
//! After the handshake the target answers inquiries about its devices, clock
//! modes, multipliers and operating frequencies. The host selects a device
//! and clock mode, negotiates a faster bitrate and finally programs the flash
//! page by page in ascending address order.

use log::{debug, info};
use strum::Display;

use self::command::{inquire, transact_ack, Command};
pub use self::info::{Device, FrequencyRange, TargetInfo};
use super::{
    bitrate::{select_bitrate, select_multiplier, ClockChoice},
    ConnectParams, FlashProtocol, ProtocolVersion, TargetInfo as AnyTargetInfo,
};
use crate::{
    connection::Connection,
    error::{Error, ResultExt},
    image::{is_blank, Mat, MemoryArea, BLANK},
    progress::ProgressCallbacks,
};

pub mod command;
pub mod info;

/// Steps of the v1 connection setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    Connected,
    DeviceQueried,
    ClockQueried,
    DeviceSelected,
    ClockSelected,
    RateQueried,
    FreqQueried,
    BitrateSwitched,
    Ready,
    Error,
}

/// Values settled on during the connection setup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub device: Option<Device>,
    pub clock_mode: u8,
    /// Core clock in hundredths of a MHz
    pub core_freq: u32,
    /// Peripheral clock in hundredths of a MHz
    pub peripheral_freq: u32,
    pub bitrate: u32,
}

#[derive(Debug)]
pub struct V1Protocol {
    state: State,
    session: Session,
    write_size: Option<u16>,
}

impl Default for V1Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl V1Protocol {
    /// Engine for a target that has just answered the handshake
    pub fn new() -> Self {
        V1Protocol {
            state: State::Connected,
            session: Session::default(),
            write_size: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    fn advance(&mut self, state: State) {
        debug!("v1: {} -> {}", self.state, state);
        self.state = state;
    }

    fn require(&self, state: State) -> Result<(), Error> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::NotReady {
                version: ProtocolVersion::V1,
                state: self.state.to_string(),
            })
        }
    }

    /// Run `f`, moving to the error state if it fails
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let result = f(self);
        if result.is_err() {
            self.advance(State::Error);
        }
        result
    }

    fn query_write_size(&mut self, connection: &mut Connection) -> Result<u16, Error> {
        match self.write_size {
            Some(size) => Ok(size),
            None => {
                let size = info::parse_write_size(&inquire(connection, Command::QueryWriteSize)?)?;
                self.write_size = Some(size);
                Ok(size)
            }
        }
    }

    fn negotiate(&mut self, connection: &mut Connection, params: &ConnectParams) -> Result<(), Error> {
        let devices = info::parse_devices(&inquire(connection, Command::QueryDevice)?)?;
        self.advance(State::DeviceQueried);

        let modes = info::parse_clock_modes(&inquire(connection, Command::QueryClockMode)?)?;
        self.advance(State::ClockQueried);

        let device = devices
            .get(params.device)
            .cloned()
            .ok_or(Error::DeviceUnsupported {
                kind: "device",
                index: params.device,
                available: devices.len(),
            })?;
        info!("Selecting device {}", device);
        transact_ack(connection, Command::SelectDevice { code: device.code })?;
        self.session.device = Some(device);
        self.advance(State::DeviceSelected);

        // A device without a clock mode list has a single implicit mode 0
        let mode = if modes.is_empty() {
            0
        } else {
            *modes
                .get(params.clock_mode)
                .ok_or(Error::DeviceUnsupported {
                    kind: "clock mode",
                    index: params.clock_mode,
                    available: modes.len(),
                })?
        };
        transact_ack(connection, Command::SetClockMode { mode })?;
        self.session.clock_mode = mode;
        self.advance(State::ClockSelected);

        let multipliers = info::parse_multipliers(&inquire(connection, Command::QueryMultiplier)?)?;
        self.advance(State::RateQueried);

        let frequencies = info::parse_frequencies(&inquire(connection, Command::QueryFrequency)?)?;
        self.advance(State::FreqQueried);

        let input = params.input_freq.hundredths();
        let core = choose_clock("core", input, &multipliers, &frequencies, 0)?;
        let peripheral = if multipliers.len() > 1 {
            Some(choose_clock("peripheral", input, &multipliers, &frequencies, 1)?)
        } else {
            None
        };
        let peripheral_freq = peripheral.map_or(core.frequency, |clock| clock.frequency);
        info!(
            "Core clock {}.{:02} MHz, peripheral clock {}.{:02} MHz",
            core.frequency / 100,
            core.frequency % 100,
            peripheral_freq / 100,
            peripheral_freq % 100
        );

        let bitrate = select_bitrate(peripheral_freq.saturating_mul(10_000))?;
        info!("Switching to {} bps", bitrate.bps);
        let input_freq = u16::try_from(input)
            .map_err(|_| Error::InvalidFrequency(params.input_freq.to_string()))?;
        transact_ack(
            connection,
            Command::SetBitrate {
                bitrate: bitrate.wire_v1(),
                input_freq,
                core_multiplier: core.multiplier,
                peripheral_multiplier: peripheral.map(|clock| clock.multiplier),
            },
        )?;
        connection.change_baud(bitrate.bps)?;
        transact_ack(connection, Command::Ack)?;
        self.advance(State::BitrateSwitched);

        self.session.core_freq = core.frequency;
        self.session.peripheral_freq = peripheral_freq;
        self.session.bitrate = bitrate.bps;
        debug!("v1 session: {:?}", self.session());
        self.advance(State::Ready);

        Ok(())
    }

    fn program(
        &mut self,
        connection: &mut Connection,
        areas: &[MemoryArea],
        mat: Mat,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        let page_size = self.query_write_size(connection)? as usize;

        transact_ack(connection, Command::EnterProgramming)?;
        transact_ack(connection, Command::SelectMat(mat))?;

        let total = areas.iter().map(MemoryArea::size).sum();
        let first = areas.first().map_or(0, MemoryArea::start);
        if let Some(cb) = progress.as_mut() {
            cb.init(first, total)
        }

        let mut page = vec![BLANK; page_size];
        let mut processed = 0;
        let mut written = 0;

        for area in areas {
            for (index, chunk) in area.image().chunks(page_size).enumerate() {
                let address = area.start() + (index * page_size) as u32;
                processed += chunk.len();

                if is_blank(chunk) {
                    debug!("skip - {:08x}", address);
                } else {
                    page[..chunk.len()].copy_from_slice(chunk);
                    page[chunk.len()..].fill(BLANK);

                    transact_ack(
                        connection,
                        Command::Program {
                            address,
                            data: &page,
                        },
                    )
                    .flashing()?;
                    debug!("write - {:08x}", address);
                    written += chunk.len();
                }

                if let Some(cb) = progress.as_mut() {
                    cb.update(processed)
                }
            }
        }

        transact_ack(
            connection,
            Command::Program {
                address: command::PROGRAM_END,
                data: &[],
            },
        )
        .flashing()?;

        if let Some(cb) = progress.as_mut() {
            cb.finish()
        }

        Ok(written)
    }
}

fn choose_clock(
    slot: &'static str,
    input: u32,
    multipliers: &[Vec<i8>],
    frequencies: &[FrequencyRange],
    index: usize,
) -> Result<ClockChoice, Error> {
    let rates = multipliers
        .get(index)
        .ok_or(Error::MalformedResponse("multiplier list"))?;
    let range = frequencies
        .get(index)
        .or_else(|| frequencies.first())
        .ok_or(Error::MalformedResponse("frequency list"))?;

    select_multiplier(input, rates, &range.range()).ok_or(Error::FrequencyOutOfRange {
        slot,
        input,
        min: range.min,
        max: range.max,
    })
}

impl FlashProtocol for V1Protocol {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn target_info(&mut self, connection: &mut Connection) -> Result<AnyTargetInfo, Error> {
        self.guarded(|engine| {
            let info = TargetInfo {
                devices: info::parse_devices(&inquire(connection, Command::QueryDevice)?)?,
                clock_modes: info::parse_clock_modes(&inquire(
                    connection,
                    Command::QueryClockMode,
                )?)?,
                multipliers: info::parse_multipliers(&inquire(
                    connection,
                    Command::QueryMultiplier,
                )?)?,
                frequencies: info::parse_frequencies(&inquire(
                    connection,
                    Command::QueryFrequency,
                )?)?,
                user_boot_areas: info::parse_areas(&inquire(
                    connection,
                    Command::QueryArea(Mat::UserBoot),
                )?)?,
                user_areas: info::parse_areas(&inquire(
                    connection,
                    Command::QueryArea(Mat::User),
                )?)?,
                write_size: engine.query_write_size(connection)?,
            };

            Ok(AnyTargetInfo::V1(info))
        })
    }

    fn setup_connection(
        &mut self,
        connection: &mut Connection,
        params: &ConnectParams,
    ) -> Result<(), Error> {
        self.require(State::Connected)?;
        self.guarded(|engine| engine.negotiate(connection, params))
    }

    fn area_list(
        &mut self,
        connection: &mut Connection,
        mat: Mat,
    ) -> Result<Vec<MemoryArea>, Error> {
        self.require(State::Ready)?;
        self.guarded(|engine| {
            let bounds = info::parse_areas(&inquire(connection, Command::QueryArea(mat))?)?;
            let areas = bounds
                .into_iter()
                .map(|(start, end)| MemoryArea::new(start, end))
                .collect::<Result<Vec<_>, _>>()?;

            engine.query_write_size(connection)?;
            Ok(areas)
        })
    }

    fn write_rom(
        &mut self,
        connection: &mut Connection,
        areas: &[MemoryArea],
        mat: Mat,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        self.require(State::Ready)?;
        self.guarded(|engine| engine.program(connection, areas, mat, progress))
    }
}
