use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use h8flash::{
    connection::Transport,
    error::{ConnectionError, Error},
    image::{load_image, ImageFormat, Mat, MemoryArea},
    progress::ProgressCallbacks,
    protocol::{ConnectParams, Endian, ProtocolVersion},
    Flasher,
};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct Log {
    sent: Vec<Vec<u8>>,
    bauds: Vec<u32>,
}

/// A boot ROM answering each frame through `respond`
struct SimulatedTarget<F> {
    signature: u8,
    respond: F,
    rx: VecDeque<u8>,
    log: Rc<RefCell<Log>>,
}

impl<F> SimulatedTarget<F>
where
    F: FnMut(&[u8]) -> Vec<u8> + 'static,
{
    fn connect(signature: u8, respond: F) -> (Flasher, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let target = SimulatedTarget {
            signature,
            respond,
            rx: VecDeque::new(),
            log: log.clone(),
        };

        (Flasher::with_transport(Box::new(target)).unwrap(), log)
    }
}

impl<F> Transport for SimulatedTarget<F>
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.log.borrow_mut().sent.push(data.to_vec());
        let reply = (self.respond)(data);
        self.rx.extend(reply);
        Ok(data.len())
    }

    fn receive_byte(&mut self) -> Result<u8, Error> {
        self.rx
            .pop_front()
            .ok_or(Error::Connection(ConnectionError::ConnectionFailed))
    }

    fn connect_target(&mut self) -> Result<u8, Error> {
        Ok(self.signature)
    }

    fn set_baud(&mut self, bitrate: u32) -> Result<(), Error> {
        self.log.borrow_mut().bauds.push(bitrate);
        Ok(())
    }
}

fn sum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// `[code, len, payload.., sum]`
fn v1_data(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![code, payload.len() as u8];
    frame.extend_from_slice(payload);
    frame.push(sum(&frame));
    frame
}

/// An H8S boot ROM: one device, no clock modes, a single 10..20 MHz clock
/// slot, 256 byte user area and 64 byte pages
fn h8s(frame: &[u8]) -> Vec<u8> {
    match frame[0] {
        0x20 => v1_data(0x30, &[1, 8, b'0', b'4', b'2', b'0', b'H', b'8', b'S', b'X']),
        0x21 => v1_data(0x31, &[0]),
        0x22 => v1_data(0x32, &[1, 1, 1]),
        0x23 => v1_data(0x33, &[1, 0x03, 0xe8, 0x07, 0xd0]),
        0x24 => v1_data(0x34, &[1, 0, 0, 0, 0, 0, 0, 0, 0x3f]),
        0x25 => v1_data(0x35, &[1, 0, 0, 0, 0, 0, 0, 0, 0xff]),
        0x27 => v1_data(0x37, &[0x00, 0x40]),
        _ => vec![0x06],
    }
}

/// `[SOD, len(u16), code, body.., sum, ETX]`
fn v2_reply(code: u8, body: &[u8]) -> Vec<u8> {
    let len = (body.len() as u16 + 1).to_be_bytes();
    let mut frame = vec![0x81, len[0], len[1], code];
    frame.extend_from_slice(body);
    frame.push(sum(&frame[1..]));
    frame.push(0x03);
    frame
}

/// An RX boot ROM acknowledging everything, 48 MHz peripheral clock
fn rx(frame: &[u8]) -> Vec<u8> {
    match (frame[0], frame[3]) {
        (0x81, 0x38) => {
            let mut body = 0x0000_0000_0000_6210u64.to_be_bytes().to_vec();
            for value in [20_000_000u32, 8_000_000, 100_000_000, 8_000_000] {
                body.extend_from_slice(&value.to_be_bytes());
            }
            v2_reply(0x38, &body)
        }
        (0x81, 0x32) => {
            let mut body = 96_000_000u32.to_be_bytes().to_vec();
            body.extend_from_slice(&48_000_000u32.to_be_bytes());
            v2_reply(0x32, &body)
        }
        (_, code) => v2_reply(code, &[]),
    }
}

#[derive(Default)]
struct Recorder {
    total: usize,
    updates: Vec<usize>,
    finished: bool,
}

impl ProgressCallbacks for Recorder {
    fn init(&mut self, _addr: u32, total: usize) {
        self.total = total;
    }

    fn update(&mut self, current: usize) {
        self.updates.push(current);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

#[test]
fn v2_writes_only_non_blank_areas() {
    let (mut flasher, log) = SimulatedTarget::connect(0xc1, rx);
    assert_eq!(flasher.version(), ProtocolVersion::V2);

    let params = ConnectParams {
        endian: Endian::Big,
        ..ConnectParams::new("12.5".parse().unwrap())
    };
    flasher.setup(&params).unwrap();
    assert_eq!(log.borrow().bauds, vec![115_200]);

    let mut areas = [(0, 99), (100, 199), (200, 299)]
        .into_iter()
        .map(|(start, end)| MemoryArea::new(start, end).unwrap())
        .collect::<Vec<_>>();
    areas[2].image_mut().fill(0x00);
    log.borrow_mut().sent.clear();

    let mut progress = Recorder::default();
    let written = flasher
        .write_areas(&areas, Mat::User, &mut Some(&mut progress))
        .unwrap();

    assert_eq!(written, 100);
    let log = log.borrow();
    assert_eq!(log.sent.len(), 3);
    assert_eq!(&log.sent[0][3..8], &[0x12, 0x00, 0x00, 0x00, 200]);
    assert_eq!(
        &log.sent[1][3..12],
        &[0x13, 0x00, 0x00, 0x00, 200, 0x00, 0x00, 0x01, 0x2b]
    );
    let data = &log.sent[2];
    assert_eq!(&data[..4], &[0x81, 0x00, 101, 0x13]);
    assert_eq!(data[data.len() - 1], 0x03);

    assert_eq!(progress.total, 300);
    assert_eq!(progress.updates, vec![100, 200, 300]);
    assert!(progress.finished);
}

#[test]
fn v1_writes_srecord_image() {
    let (mut flasher, log) = SimulatedTarget::connect(0xe6, h8s);
    assert_eq!(flasher.version(), ProtocolVersion::V1);

    flasher
        .setup(&ConnectParams::new("16".parse().unwrap()))
        .unwrap();
    assert_eq!(log.borrow().bauds, vec![57_600]);
    log.borrow_mut().sent.clear();

    let image = b"S00600004844521B\nS1070010AABBCCDDDA\nS9030000FC\n";
    let written = flasher
        .load_image_to_flash(image, Mat::User, false, &mut None)
        .unwrap();

    assert_eq!(written, 64);
    let log = log.borrow();
    let opcodes = log.sent.iter().map(|frame| frame[0]).collect::<Vec<_>>();
    assert_eq!(opcodes, vec![0x25, 0x27, 0x40, 0x43, 0x50, 0x50]);

    let page = &log.sent[4];
    assert_eq!(page.len(), 1 + 4 + 64 + 1);
    assert_eq!(&page[1..5], &[0x00, 0x00, 0x00, 0x00]);
    assert_eq!(&page[5 + 0x10..5 + 0x14], &[0xaa, 0xbb, 0xcc, 0xdd]);
    assert_eq!(log.sent[5], vec![0x50, 0xff, 0xff, 0xff, 0xff, 0xb4]);
}

#[test]
fn area_map_is_queried_once_per_write() {
    let (mut flasher, log) = SimulatedTarget::connect(0xe6, h8s);
    flasher
        .setup(&ConnectParams::new("16".parse().unwrap()))
        .unwrap();
    log.borrow_mut().sent.clear();

    let mut areas = flasher.area_list(Mat::User).unwrap();
    let image = b"S1070010AABBCCDDDA\nS9030000FC\n";
    let format = load_image(image, false, &mut areas).unwrap();
    let written = flasher
        .write_areas(&areas, Mat::User, &mut None)
        .unwrap();

    assert_eq!(format, ImageFormat::Srec);
    assert_eq!(written, 64);
    let log = log.borrow();
    let area_queries = log.sent.iter().filter(|frame| frame[0] == 0x25).count();
    assert_eq!(area_queries, 1);
}

#[test]
fn v1_image_outside_area_is_rejected() {
    let (mut flasher, log) = SimulatedTarget::connect(0xe6, h8s);
    flasher
        .setup(&ConnectParams::new("16".parse().unwrap()))
        .unwrap();
    log.borrow_mut().sent.clear();

    let image = vec![0x00; 0x101];
    let result = flasher.load_image_to_flash(&image, Mat::User, true, &mut None);

    assert!(matches!(
        result,
        Err(Error::AreaOutOfRange { start: 0x100, .. })
    ));
    // Nothing was programmed
    assert!(log.borrow().sent.iter().all(|frame| frame[0] != 0x40));
}

#[test]
fn list_mode_reports_device_type() {
    let (mut flasher, _) = SimulatedTarget::connect(0xc1, rx);

    let info = flasher.target_info().unwrap().to_string();

    assert!(info.starts_with("Type code: 0000000000006210\n"));
    assert!(info.ends_with("System min: 8000000 Hz"));
}

#[test]
fn unknown_handshake_answer() {
    let target = SimulatedTarget {
        signature: 0x42,
        respond: |_: &[u8]| Vec::<u8>::new(),
        rx: VecDeque::new(),
        log: Rc::default(),
    };

    assert!(matches!(
        Flasher::with_transport(Box::new(target)),
        Err(Error::UnknownTarget(0x42))
    ));
}

#[test]
fn writing_requires_setup() {
    let (mut flasher, _) = SimulatedTarget::connect(0xc1, rx);

    assert!(matches!(
        flasher.area_list(Mat::User),
        Err(Error::NotReady {
            version: ProtocolVersion::V2,
            ..
        })
    ));
}
