//! Boot mode protocol of RX and later SH parts
//!
//! The host reads the device type, sets the byte order and clocks, switches
//! to a faster bitrate and synchronises. Flash is then written area by area:
//! each non-blank area is erased and streamed to the target in 256 byte data
//! frames.

use log::{debug, info};
use strum::Display;

use self::command::{exchange, query, transact, Command, CommandType, ETB, ETX, SOD};
pub use self::info::{Bank, DeviceType, Signature};
use super::{
    bitrate::select_bitrate,
    cursor::Cursor,
    ConnectParams, FlashProtocol, ProtocolVersion, TargetInfo,
};
use crate::{
    connection::Connection,
    error::{Error, ResultExt},
    image::{Mat, MemoryArea},
    progress::ProgressCallbacks,
};

pub mod command;
pub mod info;

/// Payload bytes per data frame
pub const CHUNK_SIZE: usize = 256;

/// Steps of the v2 connection setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    Connected,
    DeviceTypeQueried,
    EndianSet,
    FrequencySet,
    BitrateSwitched,
    Synced,
    Ready,
    Error,
}

/// Values settled on during the connection setup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub device_type: Option<DeviceType>,
    /// Core clock in Hz
    pub core_freq: u32,
    /// Peripheral clock in Hz
    pub peripheral_freq: u32,
    pub bitrate: u32,
}

#[derive(Debug)]
pub struct V2Protocol {
    state: State,
    session: Session,
}

impl Default for V2Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl V2Protocol {
    /// Engine for a target that has just answered the handshake
    pub fn new() -> Self {
        V2Protocol {
            state: State::Connected,
            session: Session::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    fn advance(&mut self, state: State) {
        debug!("v2: {} -> {}", self.state, state);
        self.state = state;
    }

    fn require(&self, state: State) -> Result<(), Error> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::NotReady {
                version: ProtocolVersion::V2,
                state: self.state.to_string(),
            })
        }
    }

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

    fn negotiate(&mut self, connection: &mut Connection, params: &ConnectParams) -> Result<(), Error> {
        let device = DeviceType::parse(&query(connection, Command::DeviceType)?)?;
        debug!("Device type {:016x}", device.type_code);
        self.session.device_type = Some(device);
        self.advance(State::DeviceTypeQueried);

        transact(connection, Command::SetEndian(params.endian))?;
        self.advance(State::EndianSet);

        let clocks = query(
            connection,
            Command::SetFrequency {
                input_hz: params.input_freq.hz(),
                system_hz: device.system_max,
            },
        )?;
        let mut cursor = Cursor::new(&clocks, "frequency");
        let core = cursor.u32()?;
        let peripheral = cursor.u32()?;
        info!("Core clock {} Hz, peripheral clock {} Hz", core, peripheral);
        self.session.core_freq = core;
        self.session.peripheral_freq = peripheral;
        self.advance(State::FrequencySet);

        let bitrate = select_bitrate(peripheral)?;
        info!("Switching to {} bps", bitrate.bps);
        transact(connection, Command::SetBitrate { bps: bitrate.bps })?
            .require_code(CommandType::SetBitrate)?;
        connection.change_baud(bitrate.bps)?;
        self.session.bitrate = bitrate.bps;
        self.advance(State::BitrateSwitched);

        transact(connection, Command::Sync)?.require_code(CommandType::Sync)?;
        self.advance(State::Synced);
        debug!("v2 session: {:?}", self.session());
        self.advance(State::Ready);

        Ok(())
    }

    fn program(
        &mut self,
        connection: &mut Connection,
        areas: &[MemoryArea],
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        let total = areas.iter().map(MemoryArea::size).sum();
        let first = areas.first().map_or(0, MemoryArea::start);
        if let Some(cb) = progress.as_mut() {
            cb.init(first, total)
        }

        let mut processed = 0;
        let mut written = 0;

        for area in areas {
            if area.is_blank() {
                debug!("skip - {:08x}", area.start());
                processed += area.size();
                if let Some(cb) = progress.as_mut() {
                    cb.update(processed)
                }
                continue;
            }

            transact(
                connection,
                Command::Erase {
                    address: area.start(),
                },
            )
            .flashing()?;
            transact(
                connection,
                Command::WriteRange {
                    start: area.start(),
                    end: area.end(),
                },
            )
            .flashing()?;

            let chunks = area.image().chunks(CHUNK_SIZE);
            let last = chunks.len().saturating_sub(1);
            for (index, data) in chunks.enumerate() {
                let tail = if index == last { ETX } else { ETB };
                exchange(connection, Command::WriteData { data }, SOD, tail).flashing()?;

                processed += data.len();
                written += data.len();
                if let Some(cb) = progress.as_mut() {
                    cb.update(processed)
                }
            }
            debug!("write - {:08x}", area.start());
        }

        if let Some(cb) = progress.as_mut() {
            cb.finish()
        }

        Ok(written)
    }
}

impl FlashProtocol for V2Protocol {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn target_info(&mut self, connection: &mut Connection) -> Result<TargetInfo, Error> {
        self.guarded(|_| {
            let device = DeviceType::parse(&query(connection, Command::DeviceType)?)?;
            Ok(TargetInfo::V2(device))
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
        self.guarded(|_| {
            let signature = Signature::parse(&query(connection, Command::Signature)?)?;
            debug!("Signature of {}: {:?}", signature.device, signature.banks);
            signature.areas(mat)
        })
    }

    fn write_rom(
        &mut self,
        connection: &mut Connection,
        areas: &[MemoryArea],
        _mat: Mat,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        self.require(State::Ready)?;
        self.guarded(|engine| engine.program(connection, areas, progress))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::{
        command::{ETB, ETX, SOH},
        *,
    };
    use crate::{
        connection::mock::{Log, MockTransport},
        protocol::{checksum, Endian},
    };

    fn reply(code: u8, body: &[u8]) -> Vec<u8> {
        let len = (body.len() as u16 + 1).to_be_bytes();
        let mut frame = vec![SOD, len[0], len[1], code];
        frame.extend_from_slice(body);
        frame.push(checksum(&frame[1..]));
        frame.push(ETX);
        frame
    }

    fn device_type() -> Vec<u8> {
        let mut body = 0x0123_4567_89ab_cdefu64.to_be_bytes().to_vec();
        for value in [20_000_000u32, 8_000_000, 100_000_000, 8_000_000] {
            body.extend_from_slice(&value.to_be_bytes());
        }
        body
    }

    fn signature() -> Vec<u8> {
        let mut body = b"R5F56218\0\0\0\0\0\0\0\0".to_vec();
        for (kind, size, count) in [(0x00u8, 600u32, 1u16), (0x02, 0x100, 1)] {
            body.push(kind);
            body.extend_from_slice(&size.to_be_bytes());
            body.extend_from_slice(&count.to_be_bytes());
        }
        body.resize(16 + 6 * 7, 0xff);
        body
    }

    /// An RX boot ROM answering every command, 96 MHz core and 48 MHz
    /// peripheral clock
    fn target() -> impl FnMut(&[u8]) -> Vec<u8> {
        |frame: &[u8]| {
            let (head, opcode) = (frame[0], frame[3]);
            match (head, opcode) {
                (SOD, 0x38) => reply(0x38, &device_type()),
                (SOD, 0x32) => reply(0x32, &[0x05, 0xb8, 0xd8, 0x00, 0x02, 0xdc, 0x6c, 0x00]),
                (SOD, 0x3a) => reply(0x3a, &signature()),
                (_, code) => reply(code, &[]),
            }
        }
    }

    fn connect() -> (V2Protocol, Connection, Rc<RefCell<Log>>) {
        let (transport, log) = MockTransport::new(0xc1, target());
        let mut connection = transport.into_connection();
        let mut engine = V2Protocol::new();

        let params = ConnectParams {
            endian: Endian::Big,
            ..ConnectParams::new("12.5".parse().unwrap())
        };
        engine.setup_connection(&mut connection, &params).unwrap();

        (engine, connection, log)
    }

    #[test]
    fn negotiation_sequence() {
        let (engine, _, log) = connect();
        let log = log.borrow();

        assert_eq!(engine.state(), State::Ready);
        let frames = log
            .sent
            .iter()
            .map(|frame| (frame[0], frame[3]))
            .collect::<Vec<_>>();
        assert_eq!(
            frames,
            vec![
                (SOH, 0x38),
                (SOD, 0x38),
                (SOH, 0x36),
                (SOH, 0x32),
                (SOD, 0x32),
                (SOH, 0x34),
                (SOH, 0x00),
            ]
        );

        // Endian big
        assert_eq!(log.sent[2][4], 0x00);
        // 12.5 MHz input, system clock limit from the device type
        assert_eq!(
            &log.sent[3][4..12],
            &[0x00, 0xbe, 0xbc, 0x20, 0x05, 0xf5, 0xe1, 0x00]
        );
        assert_eq!(engine.session().core_freq, 96_000_000);
        assert_eq!(engine.session().peripheral_freq, 48_000_000);
        assert_eq!(engine.session().bitrate, 115_200);
        assert_eq!(log.bauds, vec![115_200]);
    }

    #[test]
    fn bitrate_must_be_echoed() {
        let mut inner = target();
        let (transport, log) = MockTransport::new(0xc1, move |frame: &[u8]| match frame[3] {
            0x34 => reply(0x35, &[]),
            _ => inner(frame),
        });
        let mut connection = transport.into_connection();
        let mut engine = V2Protocol::new();

        let result = engine.setup_connection(&mut connection, &ConnectParams::new("12.5".parse().unwrap()));

        assert!(matches!(
            result,
            Err(Error::UnexpectedResponse {
                expected: 0x34,
                actual: 0x35,
                ..
            })
        ));
        assert!(log.borrow().bauds.is_empty());
        assert_eq!(engine.state(), State::Error);
    }

    #[test]
    fn signature_areas() {
        let (mut engine, mut connection, _) = connect();

        let user = engine.area_list(&mut connection, Mat::User).unwrap();
        let boot = engine.area_list(&mut connection, Mat::UserBoot).unwrap();

        assert_eq!(user.len(), 1);
        assert_eq!((user[0].start(), user[0].end()), (0xffff_fda8, 0xffff_ffff));
        assert_eq!(boot.len(), 1);
        assert_eq!((boot[0].start(), boot[0].end()), (0xffff_ff00, 0xffff_ffff));
    }

    #[test]
    fn area_is_streamed_in_chunks() {
        let (mut engine, mut connection, log) = connect();
        let mut areas = vec![MemoryArea::new(0x1000, 0x1000 + 599).unwrap()];
        areas[0].image_mut().fill(0x00);
        log.borrow_mut().sent.clear();

        let written = engine
            .write_rom(&mut connection, &areas, Mat::User, &mut None)
            .unwrap();

        assert_eq!(written, 600);
        let log = log.borrow();
        assert_eq!(log.sent.len(), 5);
        assert_eq!(
            log.sent[0],
            vec![0x01, 0x00, 0x05, 0x12, 0x00, 0x00, 0x10, 0x00, 0xd9, 0x03]
        );
        assert_eq!(
            &log.sent[1][3..12],
            &[0x13, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x12, 0x57]
        );

        let chunks = log.sent[2..]
            .iter()
            .map(|frame| (frame[0], frame.len() - 5, frame[frame.len() - 1]))
            .collect::<Vec<_>>();
        assert_eq!(
            chunks,
            vec![(SOD, 1 + 256, ETB), (SOD, 1 + 256, ETB), (SOD, 1 + 88, ETX)]
        );
    }

    #[test]
    fn blank_areas_are_skipped() {
        let (mut engine, mut connection, log) = connect();
        let mut areas = vec![
            MemoryArea::new(0, 99).unwrap(),
            MemoryArea::new(100, 199).unwrap(),
        ];
        areas[1].image_mut()[0] = 0x5a;
        log.borrow_mut().sent.clear();

        let written = engine
            .write_rom(&mut connection, &areas, Mat::User, &mut None)
            .unwrap();

        assert_eq!(written, 100);
        let log = log.borrow();
        let erases = log
            .sent
            .iter()
            .filter(|frame| frame[3] == 0x12)
            .collect::<Vec<_>>();
        assert_eq!(erases.len(), 1);
        assert_eq!(&erases[0][4..8], &[0x00, 0x00, 0x00, 100]);
        assert_eq!(log.sent.len(), 3);
    }

    #[test]
    fn error_code_aborts_write() {
        let mut inner = target();
        let (transport, log) = MockTransport::new(0xc1, move |frame: &[u8]| match frame[3] {
            0x12 => reply(0x92, &[0x51]),
            _ => inner(frame),
        });
        let mut connection = transport.into_connection();
        let mut engine = V2Protocol::new();
        engine
            .setup_connection(&mut connection, &ConnectParams::new("12.5".parse().unwrap()))
            .unwrap();
        let mut areas = vec![MemoryArea::new(0, 0xff).unwrap()];
        areas[0].image_mut()[0] = 0x00;
        log.borrow_mut().sent.clear();

        let result = engine.write_rom(&mut connection, &areas, Mat::User, &mut None);

        match result {
            Err(Error::RomError(err)) => {
                assert_eq!((err.command, err.response, err.code), ("Erase", 0x92, 0x51))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(log.borrow().sent.len(), 1);
        assert_eq!(engine.state(), State::Error);
    }

    #[test]
    fn device_type_listing() {
        let (transport, _) = MockTransport::new(0xc1, target());
        let mut connection = transport.into_connection();
        let mut engine = V2Protocol::new();

        let info = engine.target_info(&mut connection).unwrap();

        assert_eq!(
            info.to_string(),
            "Type code: 0123456789abcdef\n\
             Input max: 20000000 Hz\n\
             Input min: 8000000 Hz\n\
             System max: 100000000 Hz\n\
             System min: 8000000 Hz"
        );
    }
}
