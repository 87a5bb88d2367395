//! The transport capability the transaction engine drives: a command
//! channel that can be written to and read from, plus an optional event
//! channel. Concrete variants cover USB bulk, PTP/IP TCP, and the
//! PTP/IP-over-USB hybrid transport.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::Error;

/// Which container framing a transport's command channel speaks. The engine
/// dispatches `receive_bulk` on this rather than on the transport's own
/// type, since the hybrid transport is TCP-backed but frames like USB (see
/// `hybrid_spill_check`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Usb,
    PtpIp,
}

/// Capability interface the transaction engine needs from a transport.
/// `event_write`/`event_read` default to "unsupported" for transports with
/// no separate event channel.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error>;
    fn read(&mut self, into: &mut [u8]) -> Result<usize, Error>;

    /// Unit size for bulk reads; also the threshold `receive_bulk` uses to
    /// detect a short (terminating) read.
    fn max_packet_size(&self) -> usize;

    fn framing(&self) -> Framing;

    /// Whether the USB-framed receive path should check the first 32-bit
    /// word of each read for a spilled PTP/IP event (only true for the
    /// USB/PTP-IP hybrid).
    fn hybrid_spill_check(&self) -> bool {
        false
    }

    fn event_write(&mut self, _bytes: &[u8]) -> Result<usize, Error> {
        Err(Error::Malformed(
            "transport has no event channel".to_owned(),
        ))
    }

    fn event_read(&mut self, _into: &mut [u8]) -> Result<usize, Error> {
        Err(Error::Malformed(
            "transport has no event channel".to_owned(),
        ))
    }
}

/// Matches the teacher's `Device<C>` endpoint discovery and bulk/interrupt
/// transfer usage, generalized behind the `Transport` trait.
pub struct UsbTransport<C: rusb::UsbContext> {
    handle: Arc<rusb::DeviceHandle<C>>,
    ep_in: u8,
    ep_out: u8,
    ep_int: u8,
    timeout: Duration,
}

impl<C: rusb::UsbContext> UsbTransport<C> {
    pub fn new(handle: Arc<rusb::DeviceHandle<C>>, timeout: Duration) -> Result<Self, Error> {
        let config_desc = handle.device().active_config_descriptor()?;

        let interface_desc = config_desc
            .interfaces()
            .flat_map(|i| i.descriptors())
            .find(|x| x.class_code() == 6)
            .ok_or(rusb::Error::NotFound)?;

        debug!("found interface {}", interface_desc.interface_number());

        handle.claim_interface(interface_desc.interface_number())?;
        handle.set_alternate_setting(
            interface_desc.interface_number(),
            interface_desc.setting_number(),
        )?;

        let find_endpoint = |direction, transfer_type| {
            interface_desc
                .endpoint_descriptors()
                .find(|ep| ep.direction() == direction && ep.transfer_type() == transfer_type)
                .map(|x| x.address())
                .ok_or(rusb::Error::NotFound)
        };

        Ok(UsbTransport {
            ep_in: find_endpoint(rusb::Direction::In, rusb::TransferType::Bulk)?,
            ep_out: find_endpoint(rusb::Direction::Out, rusb::TransferType::Bulk)?,
            ep_int: find_endpoint(rusb::Direction::In, rusb::TransferType::Interrupt)?,
            handle,
            timeout,
        })
    }
}

impl<C: rusb::UsbContext> Transport for UsbTransport<C> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        Ok(self.handle.write_bulk(self.ep_out, bytes, self.timeout)?)
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        Ok(self.handle.read_bulk(self.ep_in, into, self.timeout)?)
    }

    fn max_packet_size(&self) -> usize {
        // matches the teacher's stack-allocated read buffer in
        // `read_txn_phase_bulk`.
        8192
    }

    fn framing(&self) -> Framing {
        Framing::Usb
    }

    fn event_read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        Ok(self.handle.read_interrupt(self.ep_int, into, self.timeout)?)
    }
}

/// PTP/IP command + event sockets, per §4.4's table.
pub struct PtpIpTransport {
    command: TcpStream,
    event: Option<TcpStream>,
}

impl PtpIpTransport {
    pub fn new(command: TcpStream, event: Option<TcpStream>) -> Self {
        PtpIpTransport { command, event }
    }
}

impl Transport for PtpIpTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.command.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        Ok(self.command.read(into)?)
    }

    fn max_packet_size(&self) -> usize {
        8192
    }

    fn framing(&self) -> Framing {
        Framing::PtpIp
    }

    fn event_write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let event = self
            .event
            .as_mut()
            .ok_or_else(|| Error::Malformed("no event channel configured".to_owned()))?;
        event.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn event_read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        let event = self
            .event
            .as_mut()
            .ok_or_else(|| Error::Malformed("no event channel configured".to_owned()))?;
        Ok(event.read(into)?)
    }
}

/// PTP/IP-over-USB hybrid: its command channel is a TCP socket (not a real
/// USB bulk endpoint), but it is framed and drained exactly like the USB
/// transport, including the spurious-event spill check the real USB driver
/// needs when the event channel is folded into the command pipe.
pub struct HybridTransport {
    command: TcpStream,
}

impl HybridTransport {
    pub fn new(command: TcpStream) -> Self {
        HybridTransport { command }
    }
}

impl Transport for HybridTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.command.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        Ok(self.command.read(into)?)
    }

    fn max_packet_size(&self) -> usize {
        8192
    }

    fn framing(&self) -> Framing {
        Framing::Usb
    }

    fn hybrid_spill_check(&self) -> bool {
        true
    }
}
