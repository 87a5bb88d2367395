//! In-memory `Transport` backed by a queue of canned reads/writes, standing
//! in for real USB/TCP endpoints the way the teacher's `rusb::DeviceHandle`
//! stands in for real hardware. Used by this crate's own tests and, behind
//! the `testing` feature, by downstream integration tests.

use std::collections::VecDeque;

use crate::transport::{Framing, Transport};
use crate::Error;

#[derive(Debug)]
enum Op {
    Write(Vec<u8>),
    Read(Vec<u8>),
    ReadErr,
}

/// Scripted transport: each call to `write`/`read` consumes the next
/// scripted operation, panicking on mismatch. Panics on drop if any
/// scripted operation went unconsumed, unless the test already panicked.
pub struct ScriptedTransport {
    ops: VecDeque<Op>,
    framing: Framing,
    max_packet_size: usize,
    hybrid_spill_check: bool,
}

impl ScriptedTransport {
    pub fn usb() -> Self {
        Self::usb_with_packet_size(8192)
    }

    pub fn usb_with_packet_size(max_packet_size: usize) -> Self {
        ScriptedTransport {
            ops: VecDeque::new(),
            framing: Framing::Usb,
            max_packet_size,
            hybrid_spill_check: false,
        }
    }

    pub fn ptp_ip() -> Self {
        ScriptedTransport {
            ops: VecDeque::new(),
            framing: Framing::PtpIp,
            max_packet_size: 8192,
            hybrid_spill_check: false,
        }
    }

    pub fn hybrid() -> Self {
        ScriptedTransport {
            ops: VecDeque::new(),
            framing: Framing::Usb,
            max_packet_size: 8192,
            hybrid_spill_check: true,
        }
    }

    /// Scripts a write the engine must perform next, asserting its exact
    /// bytes when consumed.
    pub fn expect_write(mut self, bytes: Vec<u8>) -> Self {
        self.ops.push_back(Op::Write(bytes));
        self
    }

    /// Scripts the next read to return `bytes` (truncated to the caller's
    /// buffer, as a real short read would).
    pub fn then_read(mut self, bytes: Vec<u8>) -> Self {
        self.ops.push_back(Op::Read(bytes));
        self
    }

    /// Scripts the next read to fail, for exercising the first-read retry
    /// (testable property 7).
    pub fn then_read_err(mut self) -> Self {
        self.ops.push_back(Op::ReadErr);
        self
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        match self.ops.pop_front() {
            Some(Op::Write(expected)) => {
                assert_eq!(bytes, expected.as_slice(), "unexpected bytes written");
                Ok(bytes.len())
            }
            other => panic!("script did not expect a write, got {:?} bytes; next op was {:?}", bytes.len(), other),
        }
    }

    fn read(&mut self, into: &mut [u8]) -> Result<usize, Error> {
        match self.ops.pop_front() {
            Some(Op::Read(bytes)) => {
                let n = bytes.len().min(into.len());
                into[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Op::ReadErr) => Err(Error::Malformed("scripted read failure".to_owned())),
            other => panic!("script did not expect a read; next op was {:?}", other),
        }
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn hybrid_spill_check(&self) -> bool {
        self.hybrid_spill_check
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.ops.is_empty(),
                "scripted transport had {} unconsumed operation(s)",
                self.ops.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StandardCommandCode;
    use crate::engine::Engine;
    use std::time::Instant;

    #[test]
    fn first_read_retry_succeeds_after_one_failure() {
        let transport = ScriptedTransport::usb()
            .expect_write(crate::container::build_command_container(0x1002, 0, &[1]))
            .then_read_err()
            .then_read(crate::container::build_bulk_container(
                crate::container::ContainerType::Response,
                0x2001,
                0,
                &[],
            ));

        let engine = Engine::new(transport);
        engine
            .send(StandardCommandCode::OpenSession.into(), &[1])
            .unwrap();
    }

    #[test]
    fn second_consecutive_failure_is_terminal() {
        let transport = ScriptedTransport::usb()
            .expect_write(crate::container::build_command_container(0x1002, 0, &[1]))
            .then_read_err()
            .then_read_err();

        let engine = Engine::new(transport);
        let start = Instant::now();
        let result = engine.send(StandardCommandCode::OpenSession.into(), &[1]);

        assert!(result.is_err());
        assert!(start.elapsed() >= std::time::Duration::from_millis(100));
    }

    #[test]
    #[should_panic(expected = "unconsumed operation")]
    fn unconsumed_operations_panic_on_drop() {
        let _transport = ScriptedTransport::usb().expect_write(vec![1, 2, 3]);
    }
}
