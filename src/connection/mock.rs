//! Scripted in-memory transport for unit tests

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use super::{Connection, Transport};
use crate::error::{ConnectionError, Error, TimedOutCommand};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// What the mock saw, shared with the test body
#[derive(Default)]
pub(crate) struct Log {
    pub sent: Vec<Vec<u8>>,
    pub bauds: Vec<u32>,
}

pub(crate) struct MockTransport {
    signature: u8,
    rx: VecDeque<u8>,
    responder: Responder,
    log: Rc<RefCell<Log>>,
}

impl MockTransport {
    /// Each buffer sent is passed to `responder`, whose output becomes
    /// readable afterwards
    pub fn new(
        signature: u8,
        responder: impl FnMut(&[u8]) -> Vec<u8> + 'static,
    ) -> (Self, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let transport = MockTransport {
            signature,
            rx: VecDeque::new(),
            responder: Box::new(responder),
            log: log.clone(),
        };

        (transport, log)
    }

    /// Connection over a mock that answers from a fixed byte script
    pub fn scripted(script: &[u8]) -> (Connection, Rc<RefCell<Log>>) {
        let (mut transport, log) = Self::new(0x00, |_| Vec::new());
        transport.rx.extend(script);

        (Connection::new(Box::new(transport)), log)
    }

    pub fn into_connection(self) -> Connection {
        Connection::new(Box::new(self))
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.log.borrow_mut().sent.push(data.to_vec());
        let reply = (self.responder)(data);
        self.rx.extend(reply);

        Ok(data.len())
    }

    fn receive_byte(&mut self) -> Result<u8, Error> {
        self.rx.pop_front().ok_or(Error::Connection(ConnectionError::Timeout(
            TimedOutCommand::default(),
        )))
    }

    fn connect_target(&mut self) -> Result<u8, Error> {
        Ok(self.signature)
    }

    fn set_baud(&mut self, bitrate: u32) -> Result<(), Error> {
        self.log.borrow_mut().bauds.push(bitrate);

        Ok(())
    }
}
