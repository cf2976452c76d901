//! USB bulk transport for targets exposing the boot mode USB function

use std::{collections::VecDeque, thread::sleep, time::Duration};

use log::debug;
use rusb::{Context, Device, DeviceHandle, UsbContext};

use super::{Transport, BOOT_MODE_INQUIRY};
use crate::error::{ConnectionError, Error};

const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x82;
const PACKET_SIZE: usize = 64;
const USB_TIMEOUT: Duration = Duration::from_secs(100);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    rx: VecDeque<u8>,
}

impl UsbTransport {
    /// Open the first device matching `vid:pid` and claim its first interface
    pub fn open(vid: u16, pid: u16) -> Result<Self, Error> {
        let ctx = Context::new()?;
        let device = ctx
            .devices()?
            .iter()
            .find(|device| matches_ids(device, vid, pid))
            .ok_or(Error::Connection(ConnectionError::UsbDeviceNotFound {
                vid,
                pid,
            }))?;

        let interface = first_interface(&device);
        let mut handle = device.open()?;
        handle.claim_interface(interface)?;
        debug!(
            "Claimed interface {} of USB device {:04x}:{:04x}",
            interface, vid, pid
        );

        Ok(UsbTransport {
            handle,
            interface,
            rx: VecDeque::with_capacity(PACKET_SIZE),
        })
    }

    fn fill(&mut self) -> Result<usize, Error> {
        let mut packet = [0u8; PACKET_SIZE];
        let count = self.handle.read_bulk(EP_IN, &mut packet, USB_TIMEOUT)?;
        self.rx.extend(&packet[..count]);

        Ok(count)
    }
}

impl Transport for UsbTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        let written = self.handle.write_bulk(EP_OUT, data, USB_TIMEOUT)?;

        Ok(written)
    }

    fn receive_byte(&mut self) -> Result<u8, Error> {
        while self.rx.is_empty() {
            self.fill()?;
        }

        self.rx
            .pop_front()
            .ok_or(Error::Connection(ConnectionError::ConnectionFailed))
    }

    fn connect_target(&mut self) -> Result<u8, Error> {
        self.send(&[BOOT_MODE_INQUIRY])?;

        while self.fill()? == 0 {
            sleep(POLL_INTERVAL);
        }

        self.receive_byte()
    }

    fn set_baud(&mut self, _bitrate: u32) -> Result<(), Error> {
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

fn matches_ids<U: UsbContext>(device: &Device<U>, vid: u16, pid: u16) -> bool {
    device
        .device_descriptor()
        .map_or(false, |descr| {
            descr.vendor_id() == vid && descr.product_id() == pid
        })
}

fn first_interface<U: UsbContext>(device: &Device<U>) -> u8 {
    device
        .config_descriptor(0)
        .ok()
        .and_then(|config| {
            config
                .interfaces()
                .next()
                .and_then(|interface| interface.descriptors().next())
                .map(|descr| descr.interface_number())
        })
        .unwrap_or(0)
}
