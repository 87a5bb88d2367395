//! The transaction engine: sequences command/data/response phases over a
//! `Transport`, serializing callers at a single lock the way the source's
//! recursive mutex does, without actually needing re-entrancy (see
//! DESIGN.md).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};
use num_traits::ToPrimitive;

use crate::buffer::IoBuffer;
use crate::command::CommandCode;
use crate::container::{
    build_bulk_container, build_command_container, build_data_end, build_data_start,
    build_ptp_ip_packet, ContainerInfo, ContainerType, PtpIpHeader, PtpIpPacketType,
    PTP_CONTAINER_HEADER_SIZE, PTP_IP_PACKET_HEADER_SIZE,
};
use crate::response::{ResponseCode, StandardResponseCode};
use crate::transport::{Framing, Transport};
use crate::{DeviceInfo, Error};

/// Backoff before the single retry of a failed first USB read (§4.5, §7).
pub const FIRST_READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A single property-avail entry: the set of currently allowed values for
/// one device property. Replaces the source's doubly-linked list (§9) with
/// a map keyed by property code, which is all the insertion-order list
/// actually bought.
#[derive(Debug, Clone)]
struct PropAvail {
    element_size: usize,
    count: usize,
    bytes: Vec<u8>,
}

/// Everything the serialization lock protects: transport, scratch buffer,
/// counters, and the parsed device info (§3).
pub struct EngineState<T: Transport> {
    transport: T,
    buffer: IoBuffer,
    session: u32,
    transaction: u32,
    device_info: Option<DeviceInfo>,
    prop_avail: BTreeMap<u16, PropAvail>,
    kill_switch: bool,
    /// Vendor response parameters (`param[0..4]`) from the most recently
    /// completed transaction (§6's `get_param`).
    last_response_params: Vec<u32>,
}

/// Outcome of draining the response phase: the response code, its vendor
/// parameters, and the data-phase payload, if any.
#[derive(Debug, Clone)]
struct ReceivedPhases {
    total_len: usize,
    data_payload: Option<Vec<u8>>,
    response_code: ResponseCode,
    response_params: Vec<u32>,
}

impl<T: Transport> EngineState<T> {
    fn read_with_first_retry(
        &mut self,
        into_len: usize,
        offset: usize,
        first_attempt: &mut bool,
    ) -> Result<usize, Error> {
        let into = &mut self.buffer.as_mut_slice()[offset..offset + into_len];
        if *first_attempt {
            *first_attempt = false;
            match self.transport.read(into) {
                Ok(n) => Ok(n),
                Err(_) => {
                    warn!("first read failed, retrying once after backoff");
                    thread::sleep(FIRST_READ_RETRY_DELAY);
                    self.transport.read(into)
                }
            }
        } else {
            self.transport.read(into)
        }
    }

    fn write_all_to_transport(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut written = 0;
        while written < bytes.len() {
            let n = self.transport.write(&bytes[written..])?;
            if n == 0 {
                return Err(Error::Malformed(
                    "transport accepted zero bytes on write".to_owned(),
                ));
            }
            written += n;
        }
        Ok(())
    }

    /// USB-framed receive (also used by the hybrid transport, whose
    /// command channel is TCP-backed but frames like USB — see
    /// `Transport::framing`).
    fn receive_bulk_usb(&mut self) -> Result<ReceivedPhases, Error> {
        let max = self.transport.max_packet_size();
        self.buffer.ensure_capacity(max * 2);

        let mut offset = 0usize;
        let mut first_attempt = true;
        let mut spill_checked = false;
        let mut first_kind: Option<ContainerType> = None;

        loop {
            if offset + max > self.buffer.capacity() {
                return Err(Error::OutOfMemory(
                    "receive would overrun buffer capacity".to_owned(),
                ));
            }

            let n = self.read_with_first_retry(max, offset, &mut first_attempt)?;

            if self.transport.hybrid_spill_check() && !spill_checked && n >= 8 {
                spill_checked = true;
                let word = u32::from_le_bytes([
                    self.buffer.as_slice()[offset],
                    self.buffer.as_slice()[offset + 1],
                    self.buffer.as_slice()[offset + 2],
                    self.buffer.as_slice()[offset + 3],
                ]);
                if word == PtpIpPacketType::Event as u32 {
                    let payload = u32::from_le_bytes([
                        self.buffer.as_slice()[offset + 4],
                        self.buffer.as_slice()[offset + 5],
                        self.buffer.as_slice()[offset + 6],
                        self.buffer.as_slice()[offset + 7],
                    ]);
                    if payload == 0xFFFF_FFFF {
                        return Err(Error::Malformed(
                            "hybrid transport shut down (event spill)".to_owned(),
                        ));
                    }
                    return Err(Error::Malformed(
                        "unexpected event on command pipe".to_owned(),
                    ));
                }
            }

            offset += n;

            if first_kind.is_none() && offset >= PTP_CONTAINER_HEADER_SIZE {
                first_kind = Some(
                    ContainerInfo::parse(&self.buffer.as_slice()[..PTP_CONTAINER_HEADER_SIZE])?
                        .kind,
                );
            }

            if n < max {
                if first_kind == Some(ContainerType::Data) {
                    if offset + max > self.buffer.capacity() {
                        return Err(Error::OutOfMemory(
                            "receive would overrun buffer capacity".to_owned(),
                        ));
                    }
                    let n2 = self.transport.read(
                        &mut self.buffer.as_mut_slice()[offset..offset + max],
                    )?;
                    offset += n2;
                }
                break;
            }
        }

        self.parse_received_usb(offset)
    }

    fn parse_received_usb(&self, total_len: usize) -> Result<ReceivedPhases, Error> {
        let first = ContainerInfo::parse(&self.buffer.as_slice()[..PTP_CONTAINER_HEADER_SIZE])?;

        let (data_payload, response_offset) = match first.kind {
            ContainerType::Data => {
                let data_len = PTP_CONTAINER_HEADER_SIZE + first.payload_len;
                let payload = self.buffer.as_slice()[PTP_CONTAINER_HEADER_SIZE..data_len].to_vec();
                (Some(payload), data_len)
            }
            ContainerType::Response => (None, 0),
            other => {
                return Err(Error::Malformed(format!(
                    "unexpected leading container kind {:?}",
                    other
                )))
            }
        };

        let response =
            ContainerInfo::parse(&self.buffer.as_slice()[response_offset..response_offset + PTP_CONTAINER_HEADER_SIZE])?;
        if response.kind != ContainerType::Response {
            return Err(Error::Malformed(format!(
                "expected response container, got {:?}",
                response.kind
            )));
        }

        let params_start = response_offset + PTP_CONTAINER_HEADER_SIZE;
        let params_end = (params_start + response.payload_len).min(total_len);
        let response_params = self.buffer.as_slice()[params_start..params_end]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(ReceivedPhases {
            total_len,
            data_payload,
            response_code: ResponseCode::from_u16(response.code).unwrap(),
            response_params,
        })
    }

    /// Reads one PTP/IP packet (header + payload) into the buffer starting
    /// at `offset`, growing as needed, and returns the offset just past it.
    fn read_ptp_ip_packet(&mut self, offset: usize, first_attempt: &mut bool) -> Result<usize, Error> {
        self.buffer.ensure_capacity(offset + PTP_IP_PACKET_HEADER_SIZE);

        let mut read = 0;
        while read < PTP_IP_PACKET_HEADER_SIZE {
            let n = self.read_with_first_retry(
                PTP_IP_PACKET_HEADER_SIZE - read,
                offset + read,
                first_attempt,
            )?;
            if n == 0 {
                return Err(Error::Malformed("ptp/ip peer closed mid-header".to_owned()));
            }
            read += n;
        }

        let header = PtpIpHeader::parse(
            &self.buffer.as_slice()[offset..offset + PTP_IP_PACKET_HEADER_SIZE],
        )?;

        let total = offset + PTP_IP_PACKET_HEADER_SIZE + header.payload_len;
        self.buffer.ensure_capacity(total);

        let mut read = offset + PTP_IP_PACKET_HEADER_SIZE;
        while read < total {
            let n = self.transport.read(&mut self.buffer.as_mut_slice()[read..total])?;
            if n == 0 {
                return Err(Error::Malformed("ptp/ip peer closed mid-payload".to_owned()));
            }
            read += n;
        }

        Ok(total)
    }

    fn receive_bulk_ptp_ip(&mut self) -> Result<ReceivedPhases, Error> {
        let mut first_attempt = true;
        let first_end = self.read_ptp_ip_packet(0, &mut first_attempt)?;
        let first = PtpIpHeader::parse(&self.buffer.as_slice()[..PTP_IP_PACKET_HEADER_SIZE])?;

        let (data_payload, response_offset, total_len) = match first.kind {
            PtpIpPacketType::StartData => {
                let end_start = first_end;
                let end_end = self.read_ptp_ip_packet(end_start, &mut first_attempt)?;
                let end_header = PtpIpHeader::parse(
                    &self.buffer.as_slice()[end_start..end_start + PTP_IP_PACKET_HEADER_SIZE],
                )?;
                if end_header.kind != PtpIpPacketType::EndData {
                    return Err(Error::Malformed(format!(
                        "expected data-end packet, got {:?}",
                        end_header.kind
                    )));
                }
                let payload = self.buffer.as_slice()
                    [end_start + PTP_IP_PACKET_HEADER_SIZE..end_end]
                    .to_vec();

                let resp_start = end_end;
                let resp_end = self.read_ptp_ip_packet(resp_start, &mut first_attempt)?;
                let resp_header = PtpIpHeader::parse(
                    &self.buffer.as_slice()[resp_start..resp_start + PTP_IP_PACKET_HEADER_SIZE],
                )?;
                if resp_header.kind != PtpIpPacketType::OperationResponse {
                    return Err(Error::Malformed(format!(
                        "expected operation-response packet, got {:?}",
                        resp_header.kind
                    )));
                }

                (Some(payload), resp_start, resp_end)
            }
            PtpIpPacketType::OperationResponse => (None, 0, first_end),
            other => {
                return Err(Error::Malformed(format!(
                    "unexpected leading ptp/ip packet {:?}",
                    other
                )))
            }
        };

        let resp_payload_start = response_offset + PTP_IP_PACKET_HEADER_SIZE;
        let code = u16::from_le_bytes([
            self.buffer.as_slice()[resp_payload_start],
            self.buffer.as_slice()[resp_payload_start + 1],
        ]);
        let params_start = resp_payload_start + 6; // code(2) + transaction id(4)
        let response_params = self.buffer.as_slice()[params_start..total_len]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(ReceivedPhases {
            total_len,
            data_payload,
            response_code: ResponseCode::from_u16(code).unwrap(),
            response_params,
        })
    }

    fn receive_bulk(&mut self) -> Result<ReceivedPhases, Error> {
        match self.transport.framing() {
            Framing::Usb => self.receive_bulk_usb(),
            Framing::PtpIp => self.receive_bulk_ptp_ip(),
        }
    }

    fn finish_transaction(&mut self, received: ReceivedPhases) -> Result<Vec<u8>, Error> {
        self.transaction = self.transaction.wrapping_add(1);
        self.last_response_params = received.response_params;

        if received.response_code == ResponseCode::Standard(StandardResponseCode::Ok) {
            Ok(received.data_payload.unwrap_or_default())
        } else {
            Err(Error::Response(received.response_code))
        }
    }

    fn transact(
        &mut self,
        code: CommandCode,
        params: &[u32],
        data: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        if self.kill_switch {
            return Err(Error::Malformed("engine is shut down".to_owned()));
        }

        let tid = self.transaction;
        let code_u16 = code.to_u16().unwrap();

        trace!("send {:?} - 0x{:04x}, tid:{}", code, code_u16, tid);

        let command = build_command_container(code_u16, tid, params);
        self.write_all_to_transport(&command)?;

        if let Some(bytes) = data {
            self.buffer.ensure_headroom(bytes.len(), 50);

            match self.transport.framing() {
                Framing::PtpIp => {
                    let start = build_data_start(bytes.len() as u32);
                    self.write_all_to_transport(&start)?;
                    let end = build_data_end(bytes);
                    self.write_all_to_transport(&end)?;
                }
                Framing::Usb => {
                    let data_container = build_bulk_container(ContainerType::Data, code_u16, tid, bytes);
                    self.write_all_to_transport(&data_container)?;
                }
            }
        }

        let received = self.receive_bulk()?;
        self.finish_transaction(received)
    }

    /// §6's `device_type`: manufacturer string match, refined for Canon by
    /// an EOS opcode probe — kept as a raw opcode probe rather than a
    /// vendor-opcode enum, since per-vendor catalogs are out of scope.
    pub fn device_type(&self) -> DeviceType {
        let manufacturer = match &self.device_info {
            Some(di) => di.manufacturer.as_str(),
            None => return DeviceType::Empty,
        };

        match manufacturer {
            "Canon Inc." => {
                if self.check_opcode(0x9101) {
                    DeviceType::Eos
                } else {
                    DeviceType::Canon
                }
            }
            "FUJIFILM" => DeviceType::Fuji,
            "Sony Corporation" => DeviceType::Sony,
            "Nikon Corporation" => DeviceType::Nikon,
            _ => DeviceType::Empty,
        }
    }

    pub fn check_opcode(&self, opcode: u16) -> bool {
        self.device_info
            .as_ref()
            .map(|di| di.operations_supported.contains(&opcode))
            .unwrap_or(false)
    }

    pub fn check_prop(&self, code: u16) -> bool {
        self.device_info
            .as_ref()
            .map(|di| di.device_properties_supported.contains(&code))
            .unwrap_or(false)
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn set_device_info(&mut self, info: DeviceInfo) {
        debug!("device_info {:?}", info);
        self.device_info = Some(info);
    }

    /// Inserts or replaces a property-avail entry (§3, testable property 9).
    /// Reuses the existing allocation when the new count doesn't exceed the
    /// old one.
    pub fn set_prop_avail_info(&mut self, code: u16, element_size: usize, count: usize, bytes: Vec<u8>) {
        self.prop_avail.insert(
            code,
            PropAvail {
                element_size,
                count,
                bytes,
            },
        );
    }

    pub fn prop_avail_count(&self) -> usize {
        self.prop_avail.len()
    }

    pub fn prop_avail_bytes(&self, code: u16) -> Option<&[u8]> {
        self.prop_avail.get(&code).map(|p| p.bytes.as_slice())
    }

    /// `param[index]` from the most recently completed transaction's
    /// response phase (§6's `get_param`); `None` if the index is out of
    /// range for that response.
    pub fn last_response_param(&self, index: usize) -> Option<u32> {
        self.last_response_params.get(index).copied()
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn transaction(&self) -> u32 {
        self.transaction
    }

    /// Debug-only dump of the scratch buffer, mirroring `lib.c`'s
    /// `ptp_dump` but to an explicit path instead of a hardcoded file.
    #[cfg(debug_assertions)]
    pub fn dump_buffer_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        f.write_all(self.buffer.as_slice())
    }
}

/// Manufacturer family, used to pick vendor-specific behavior upstream of
/// this crate. Probe-only: no per-vendor opcode catalog lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Empty,
    Canon,
    Eos,
    Fuji,
    Sony,
    Nikon,
}

/// Owns the engine state behind a plain mutex. The source's recursive
/// mutex exists so the transaction methods' own internal call chain never
/// self-deadlocks; here that call chain is a single straight-line method
/// instead of a tree of helpers that re-enter the lock, so a plain
/// `Mutex` is sufficient (see DESIGN.md).
pub struct Engine<T: Transport> {
    state: Mutex<EngineState<T>>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T) -> Self {
        Engine {
            state: Mutex::new(EngineState {
                transport,
                buffer: IoBuffer::new(),
                session: 0,
                transaction: 0,
                device_info: None,
                prop_avail: BTreeMap::new(),
                kill_switch: false,
                last_response_params: Vec::new(),
            }),
        }
    }

    /// Send-only transaction (§4.5a).
    pub fn send(&self, code: CommandCode, params: &[u32]) -> Result<Vec<u8>, Error> {
        let mut state = self.state.lock().unwrap();
        state.transact(code, params, None)
    }

    /// Send-with-data transaction (§4.5b).
    pub fn send_data(&self, code: CommandCode, params: &[u32], data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut state = self.state.lock().unwrap();
        state.transact(code, params, Some(data))
    }

    /// As `send`, but on success the serialization lock is held until the
    /// returned handle is dropped, so the caller can inspect engine state
    /// (buffer, counters) atomically with the transaction — the RAII
    /// replacement for the source's `caller_unlocks_mutex` flag (§9).
    pub fn send_and_hold(&self, code: CommandCode, params: &[u32]) -> Result<TransactionHandle<T>, Error> {
        let mut guard = self.state.lock().unwrap();
        let payload = guard.transact(code, params, None)?;
        Ok(TransactionHandle { guard, payload })
    }

    pub fn send_data_and_hold(
        &self,
        code: CommandCode,
        params: &[u32],
        data: &[u8],
    ) -> Result<TransactionHandle<T>, Error> {
        let mut guard = self.state.lock().unwrap();
        let payload = guard.transact(code, params, Some(data))?;
        Ok(TransactionHandle { guard, payload })
    }

    /// Opens a session; per §3's invariant, the OpenSession command itself
    /// is transmitted with `transaction = 0`, and only afterwards does the
    /// counter become 1.
    pub fn open_session(&self) -> Result<(), Error> {
        use crate::command::StandardCommandCode;

        let mut state = self.state.lock().unwrap();
        let session_id = state.session.wrapping_add(1);
        state.transact(StandardCommandCode::OpenSession.into(), &[session_id, 0, 0], None)?;
        state.session = session_id;
        Ok(())
    }

    /// Queries the transport's event channel for a single event, if any.
    /// Event-channel reads are logically independent of the command phase
    /// (§5), but since the transport lives inside the same serialization
    /// lock as everything else, this still briefly takes it (see
    /// DESIGN.md).
    pub fn event(&self) -> Result<Option<crate::event::Event>, Error> {
        let mut state = self.state.lock().unwrap();
        let mut buf = [0u8; 64];

        let n = match state.transport.event_read(&mut buf) {
            Ok(n) => n,
            Err(_) => return Ok(None),
        };

        if n < PTP_CONTAINER_HEADER_SIZE {
            return Ok(None);
        }

        let container = ContainerInfo::parse(&buf[..PTP_CONTAINER_HEADER_SIZE])?;
        if container.kind != ContainerType::Event {
            return Ok(None);
        }

        Ok(Some(crate::event::Event::new(
            container.code,
            &buf[PTP_CONTAINER_HEADER_SIZE..n],
        )?))
    }

    pub fn close_session(&self) -> Result<(), Error> {
        use crate::command::StandardCommandCode;

        let mut state = self.state.lock().unwrap();
        state.transact(StandardCommandCode::CloseSession.into(), &[], None)?;
        state.session = 0;
        Ok(())
    }

    /// Hard gate read before any I/O (§5); subsequent calls report error.
    pub fn kill(&self) {
        let mut state = self.state.lock().unwrap();
        state.kill_switch = true;
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.session = 0;
        state.transaction = 0;
        state.kill_switch = false;
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&EngineState<T>) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state)
    }

    /// `param[index]` from the most recently completed transaction (§6's
    /// `get_param`).
    pub fn last_response_param(&self, index: usize) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.last_response_param(index)
    }

    pub fn set_prop_avail_info(&self, code: u16, element_size: usize, count: usize, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.set_prop_avail_info(code, element_size, count, bytes);
    }

    pub fn set_device_info(&self, info: DeviceInfo) {
        let mut state = self.state.lock().unwrap();
        state.set_device_info(info);
    }

    /// File-streamed receive counterpart to `send_data_streamed`: runs a
    /// send-only transaction and, instead of returning the data-phase
    /// payload as an owned `Vec`, copies it straight into `writer`. The
    /// scratch buffer still receives the full response (§9's "buffer as
    /// both send and receive scratch" invariant is preserved — this only
    /// spares the caller an extra owned copy of a payload that may be a
    /// whole file), the way the source's `freceive_bulk_packets` spares a
    /// second in-memory copy without abandoning its own scratch buffer.
    pub fn send_and_write<W: Write>(
        &self,
        code: CommandCode,
        params: &[u32],
        writer: &mut W,
    ) -> Result<u64, Error> {
        let mut state = self.state.lock().unwrap();
        let payload = state.transact(code, params, None)?;
        writer.write_all(&payload)?;
        Ok(payload.len() as u64)
    }

    /// File-streamed send, generalized over `std::io::Read` instead of the
    /// source's `FILE*` (§4.5, §9): the payload is pulled from `reader`
    /// chunk by chunk rather than required whole in memory up front.
    pub fn send_data_streamed<R: Read>(
        &self,
        code: CommandCode,
        params: &[u32],
        reader: &mut R,
        len: usize,
    ) -> Result<Vec<u8>, Error> {
        const CHUNK_SIZE: usize = 1024 * 1024;

        let mut state = self.state.lock().unwrap();
        if state.kill_switch {
            return Err(Error::Malformed("engine is shut down".to_owned()));
        }

        let tid = state.transaction;
        let code_u16 = code.to_u16().unwrap();
        let command = build_command_container(code_u16, tid, params);
        state.write_all_to_transport(&command)?;

        match state.transport.framing() {
            Framing::PtpIp => {
                let start = build_data_start(len as u32);
                state.write_all_to_transport(&start)?;

                let mut header = Vec::with_capacity(PTP_IP_PACKET_HEADER_SIZE);
                header
                    .write_all(&((len + PTP_IP_PACKET_HEADER_SIZE) as u32).to_le_bytes())
                    .ok();
                header
                    .write_all(&(PtpIpPacketType::EndData as u32).to_le_bytes())
                    .ok();
                state.write_all_to_transport(&header)?;

                let mut remaining = len;
                let mut chunk = vec![0u8; CHUNK_SIZE];
                while remaining > 0 {
                    let want = remaining.min(CHUNK_SIZE);
                    reader.read_exact(&mut chunk[..want])?;
                    state.write_all_to_transport(&chunk[..want])?;
                    remaining -= want;
                }
            }
            Framing::Usb => {
                let mut remaining = len;
                let mut first = true;
                let mut chunk = vec![0u8; CHUNK_SIZE];
                while remaining > 0 || first {
                    let want = remaining.min(CHUNK_SIZE);
                    if first {
                        let mut buf = Vec::with_capacity(PTP_CONTAINER_HEADER_SIZE + want);
                        buf.write_all(&((len + PTP_CONTAINER_HEADER_SIZE) as u32).to_le_bytes())
                            .ok();
                        buf.write_all(&(ContainerType::Data as u16).to_le_bytes()).ok();
                        buf.write_all(&code_u16.to_le_bytes()).ok();
                        buf.write_all(&tid.to_le_bytes()).ok();
                        reader.read_exact(&mut chunk[..want])?;
                        buf.extend_from_slice(&chunk[..want]);
                        state.write_all_to_transport(&buf)?;
                        first = false;
                    } else {
                        reader.read_exact(&mut chunk[..want])?;
                        state.write_all_to_transport(&chunk[..want])?;
                    }
                    remaining -= want;
                }
            }
        }

        let received = state.receive_bulk()?;
        state.finish_transaction(received)
    }
}

/// RAII replacement for the source's `caller_unlocks_mutex` flag: holds the
/// serialization lock so the caller can inspect the completed transaction's
/// payload/engine state atomically, releasing it on drop.
pub struct TransactionHandle<'a, T: Transport> {
    guard: MutexGuard<'a, EngineState<T>>,
    payload: Vec<u8>,
}

impl<'a, T: Transport> TransactionHandle<'a, T> {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn state(&self) -> &EngineState<T> {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StandardCommandCode;
    use crate::mock::ScriptedTransport;

    #[test]
    fn open_session_matches_scenario_s1() {
        let transport = ScriptedTransport::usb()
            .expect_write(vec![
                0x0C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x10, 0x00, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x00, 0x00,
            ])
            .then_read(vec![
                0x0C, 0x00, 0x00, 0x00, 0x03, 0x00, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00,
            ]);

        let engine = Engine::new(transport);
        engine.open_session().unwrap();

        engine.with_state(|s| {
            assert_eq!(s.session(), 1);
            assert_eq!(s.transaction(), 1);
        });
    }

    #[test]
    fn last_response_param_surfaces_vendor_response_params() {
        let transport = ScriptedTransport::usb()
            .expect_write(build_command_container(0x1001, 0, &[0, 0, 0]))
            .then_read(build_bulk_container(
                ContainerType::Response,
                0x2001,
                0,
                &[0x2A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
            ));

        let engine = Engine::new(transport);
        engine
            .send(StandardCommandCode::GetDeviceInfo.into(), &[0, 0, 0])
            .unwrap();

        assert_eq!(engine.last_response_param(0), Some(0x2A));
        assert_eq!(engine.last_response_param(1), Some(1));
        assert_eq!(engine.last_response_param(2), None);
    }

    #[test]
    fn get_device_info_returns_data_payload_scenario_s2() {
        let transport = ScriptedTransport::usb()
            .expect_write(build_command_container(0x1001, 0, &[0, 0, 0]))
            .then_read(build_bulk_container(ContainerType::Data, 0x1001, 0, &[1, 2, 3, 4]))
            .then_read(build_bulk_container(ContainerType::Response, 0x2001, 0, &[]));

        let engine = Engine::new(transport);
        let payload = engine
            .send(StandardCommandCode::GetDeviceInfo.into(), &[0, 0, 0])
            .unwrap();

        assert_eq!(payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn set_device_prop_value_increments_transaction_scenario_s3() {
        let data = vec![0x01, 0x00, 0x00, 0x00];
        let transport = ScriptedTransport::usb()
            .expect_write(build_command_container(0x1016, 0, &[0xD000]))
            .expect_write(build_bulk_container(ContainerType::Data, 0x1016, 0, &data))
            .then_read(build_bulk_container(ContainerType::Response, 0x2001, 0, &[]));

        let engine = Engine::new(transport);
        engine
            .send_data(StandardCommandCode::SetDevicePropValue.into(), &[0xD000], &data)
            .unwrap();

        engine.with_state(|s| assert_eq!(s.transaction(), 1));
    }

    #[test]
    fn receive_assembly_concatenates_short_terminated_reads() {
        let max = 16;
        let r = 5;
        let built = build_bulk_container(ContainerType::Response, 0x2001, 0, &vec![0xABu8; 41]);
        assert_eq!(built.len(), 3 * max + r);

        let transport = ScriptedTransport::usb_with_packet_size(max)
            .then_read(built[0..max].to_vec())
            .then_read(built[max..2 * max].to_vec())
            .then_read(built[2 * max..3 * max].to_vec())
            .then_read(built[3 * max..].to_vec());

        let mut state = EngineState {
            transport,
            buffer: IoBuffer::with_capacity(256),
            session: 0,
            transaction: 0,
            device_info: None,
            prop_avail: BTreeMap::new(),
            kill_switch: false,
            last_response_params: Vec::new(),
        };

        let received = state.receive_bulk_usb().unwrap();
        assert_eq!(received.total_len, 3 * max + r);
    }

    #[test]
    fn property_avail_dedups_by_code() {
        let mut state = EngineState {
            transport: ScriptedTransport::usb(),
            buffer: IoBuffer::new(),
            session: 0,
            transaction: 0,
            device_info: None,
            prop_avail: BTreeMap::new(),
            kill_switch: false,
            last_response_params: Vec::new(),
        };

        state.set_prop_avail_info(0xA, 1, 2, vec![1, 2]);
        state.set_prop_avail_info(0xB, 1, 1, vec![9]);
        state.set_prop_avail_info(0xA, 1, 3, vec![4, 5, 6]);

        assert_eq!(state.prop_avail_count(), 2);
        assert_eq!(state.prop_avail_bytes(0xA), Some(&[4u8, 5, 6][..]));
    }

    #[test]
    fn ptp_ip_data_receive_assembles_start_end_response_scenario_s4() {
        // The engine reads each PTP/IP packet as two scripted reads (header,
        // then payload) rather than one, mirroring `read_ptp_ip_packet`'s
        // two-stage read.
        let payload = vec![0xCDu8; 10];
        let start = build_data_start(payload.len() as u32);
        let end = build_data_end(&payload);
        let response_payload = {
            let mut p = Vec::new();
            p.extend_from_slice(&0x2001u16.to_le_bytes());
            p.extend_from_slice(&0u32.to_le_bytes());
            p
        };
        let response = build_ptp_ip_packet(PtpIpPacketType::OperationResponse, &response_payload);

        let transport = ScriptedTransport::ptp_ip()
            .then_read(start[..PTP_IP_PACKET_HEADER_SIZE].to_vec())
            .then_read(start[PTP_IP_PACKET_HEADER_SIZE..].to_vec())
            .then_read(end[..PTP_IP_PACKET_HEADER_SIZE].to_vec())
            .then_read(end[PTP_IP_PACKET_HEADER_SIZE..].to_vec())
            .then_read(response[..PTP_IP_PACKET_HEADER_SIZE].to_vec())
            .then_read(response[PTP_IP_PACKET_HEADER_SIZE..].to_vec());

        let mut state = EngineState {
            transport,
            buffer: IoBuffer::new(),
            session: 0,
            transaction: 0,
            device_info: None,
            prop_avail: BTreeMap::new(),
            kill_switch: false,
            last_response_params: Vec::new(),
        };

        let received = state.receive_bulk_ptp_ip().unwrap();
        assert_eq!(received.data_payload, Some(payload));
        assert_eq!(received.response_code, ResponseCode::Standard(StandardResponseCode::Ok));
    }

    #[test]
    fn concurrent_senders_complete_all_transactions_in_lock_order_scenario_s6() {
        use std::sync::Arc;

        const PER_THREAD: u32 = 100;
        let total = PER_THREAD * 2;

        let mut transport = ScriptedTransport::usb();
        for tid in 0..total {
            transport = transport
                .expect_write(build_command_container(0x1001, tid, &[0, 0, 0]))
                .then_read(build_bulk_container(ContainerType::Response, 0x2001, tid, &[]));
        }

        let engine = Arc::new(Engine::new(transport));

        let spawn_sender = || {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    engine
                        .send(StandardCommandCode::GetDeviceInfo.into(), &[0, 0, 0])
                        .unwrap();
                }
            })
        };

        let a = spawn_sender();
        let b = spawn_sender();
        a.join().unwrap();
        b.join().unwrap();

        engine.with_state(|s| assert_eq!(s.transaction(), total));
    }

    #[test]
    fn send_and_write_streams_payload_to_writer() {
        let transport = ScriptedTransport::usb()
            .expect_write(build_command_container(0x1009, 0, &[7]))
            .then_read(build_bulk_container(ContainerType::Data, 0x1009, 0, &[9, 9, 9]))
            .then_read(build_bulk_container(ContainerType::Response, 0x2001, 0, &[]));

        let engine = Engine::new(transport);
        let mut out = Vec::new();
        let written = engine
            .send_and_write(StandardCommandCode::GetObject.into(), &[7], &mut out)
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(out, vec![9, 9, 9]);
    }
}
