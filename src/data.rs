use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::ToPrimitive;

use crate::Error;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Maximum code-unit count (including the terminating 0x0000) a PTP string's
/// one-byte length prefix can express.
const MAX_PTP_STR_UNITS: usize = 0xff;

/// Maximum element count a PTP array's 32-bit count prefix is allowed to
/// carry before the payload is treated as malformed.
const MAX_ARRAY_LEN: u32 = 0xff;

pub trait PtpRead: ReadBytesExt {
    fn read_ptp_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_u8()?)
    }

    fn read_ptp_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_i8()?)
    }

    fn read_ptp_u16(&mut self) -> Result<u16, Error> {
        Ok(self.read_u16::<LittleEndian>()?)
    }

    fn read_ptp_i16(&mut self) -> Result<i16, Error> {
        Ok(self.read_i16::<LittleEndian>()?)
    }

    fn read_ptp_u32(&mut self) -> Result<u32, Error> {
        Ok(self.read_u32::<LittleEndian>()?)
    }

    fn read_ptp_i32(&mut self) -> Result<i32, Error> {
        Ok(self.read_i32::<LittleEndian>()?)
    }

    fn read_ptp_u64(&mut self) -> Result<u64, Error> {
        Ok(self.read_u64::<LittleEndian>()?)
    }

    fn read_ptp_i64(&mut self) -> Result<i64, Error> {
        Ok(self.read_i64::<LittleEndian>()?)
    }

    fn read_ptp_u128(&mut self) -> Result<(u64, u64), Error> {
        let lo = self.read_u64::<LittleEndian>()?;
        let hi = self.read_u64::<LittleEndian>()?;
        Ok((lo, hi))
    }

    fn read_ptp_i128(&mut self) -> Result<(u64, u64), Error> {
        let lo = self.read_u64::<LittleEndian>()?;
        let hi = self.read_u64::<LittleEndian>()?;
        Ok((lo, hi))
    }

    /// Reads a 32-bit count followed by that many elements, rejecting counts
    /// above `MAX_ARRAY_LEN` as malformed (testable property 8 / §4.1).
    #[inline(always)]
    fn read_ptp_vec<T: Sized, U: Fn(&mut Self) -> Result<T, Error>>(
        &mut self,
        func: U,
    ) -> Result<Vec<T>, Error> {
        let len = self.read_u32::<LittleEndian>()?;
        if len > MAX_ARRAY_LEN {
            return Err(Error::Malformed(format!(
                "array count {} exceeds the maximum of {}",
                len, MAX_ARRAY_LEN
            )));
        }
        (0..len).map(|_| func(self)).collect()
    }

    /// Like [`read_ptp_vec`](Self::read_ptp_vec), but caps the retained
    /// elements at `max`: elements past the cap are read off the wire (so the
    /// cursor stays in sync) and discarded, the returned vec is zero-filled
    /// up to `max`, and the true wire count is returned alongside it.
    fn read_ptp_vec_capped<T: Default + Clone, U: Fn(&mut Self) -> Result<T, Error>>(
        &mut self,
        max: usize,
        func: U,
    ) -> Result<(Vec<T>, usize), Error> {
        let len = self.read_u32::<LittleEndian>()?;
        if len > MAX_ARRAY_LEN {
            return Err(Error::Malformed(format!(
                "array count {} exceeds the maximum of {}",
                len, MAX_ARRAY_LEN
            )));
        }
        let len = len as usize;
        let mut out = vec![T::default(); max];
        for i in 0..len {
            let v = func(self)?;
            if i < max {
                out[i] = v;
            }
        }
        Ok((out, len))
    }

    fn read_ptp_u8_vec(&mut self) -> Result<Vec<u8>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_u8())
    }

    fn read_ptp_i8_vec(&mut self) -> Result<Vec<i8>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_i8())
    }

    fn read_ptp_u16_vec(&mut self) -> Result<Vec<u16>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_u16())
    }

    fn read_ptp_i16_vec(&mut self) -> Result<Vec<i16>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_i16())
    }

    fn read_ptp_u32_vec(&mut self) -> Result<Vec<u32>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_u32())
    }

    fn read_ptp_i32_vec(&mut self) -> Result<Vec<i32>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_i32())
    }

    fn read_ptp_u64_vec(&mut self) -> Result<Vec<u64>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_u64())
    }

    fn read_ptp_i64_vec(&mut self) -> Result<Vec<i64>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_i64())
    }

    fn read_ptp_u128_vec(&mut self) -> Result<Vec<(u64, u64)>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_u128())
    }

    fn read_ptp_i128_vec(&mut self) -> Result<Vec<(u64, u64)>, Error> {
        self.read_ptp_vec(|cur| cur.read_ptp_i128())
    }

    /// Reads a one-byte code-unit count (including the trailing 0x0000),
    /// followed by that many UTF-16LE code units, truncating the decoded
    /// string at `max` narrow characters.
    fn read_ptp_str_truncated(&mut self, max: usize) -> Result<String, Error> {
        let len = self.read_u8()?;
        if len == 0 {
            return Ok(String::new());
        }

        let units: Vec<u16> = (0..(len - 1))
            .map(|_| self.read_u16::<LittleEndian>())
            .collect::<Result<Vec<_>, _>>()?;

        // discard the trailing 0x0000 terminator counted in `len` but not
        // part of the decoded string.
        self.read_u16::<LittleEndian>()?;

        let s = String::from_utf16(&units)
            .map_err(|_| Error::Malformed(format!("invalid UTF-16 data: {:?}", units)))?;

        Ok(s.chars().take(max).collect())
    }

    fn read_ptp_str(&mut self) -> Result<String, Error> {
        self.read_ptp_str_truncated(MAX_PTP_STR_UNITS)
    }

    fn expect_end(&mut self) -> Result<(), Error>;
}

impl<T: AsRef<[u8]>> PtpRead for Cursor<T> {
    fn expect_end(&mut self) -> Result<(), Error> {
        let len = self.get_ref().as_ref().len();
        if len as u64 != self.position() {
            Err(Error::Malformed(format!(
                "response was {} bytes, cursor stopped at {}",
                len,
                self.position()
            )))
        } else {
            Ok(())
        }
    }
}

/// Mirror of [`PtpRead`] for the write side of the cursor-based codec (§4.1).
pub trait PtpWrite: WriteBytesExt {
    fn write_ptp_u8(&mut self, v: u8) -> Result<(), Error> {
        Ok(self.write_u8(v)?)
    }

    fn write_ptp_i8(&mut self, v: i8) -> Result<(), Error> {
        Ok(self.write_i8(v)?)
    }

    fn write_ptp_u16(&mut self, v: u16) -> Result<(), Error> {
        Ok(self.write_u16::<LittleEndian>(v)?)
    }

    fn write_ptp_i16(&mut self, v: i16) -> Result<(), Error> {
        Ok(self.write_i16::<LittleEndian>(v)?)
    }

    fn write_ptp_u32(&mut self, v: u32) -> Result<(), Error> {
        Ok(self.write_u32::<LittleEndian>(v)?)
    }

    fn write_ptp_i32(&mut self, v: i32) -> Result<(), Error> {
        Ok(self.write_i32::<LittleEndian>(v)?)
    }

    fn write_ptp_u64(&mut self, v: u64) -> Result<(), Error> {
        Ok(self.write_u64::<LittleEndian>(v)?)
    }

    fn write_ptp_i64(&mut self, v: i64) -> Result<(), Error> {
        Ok(self.write_i64::<LittleEndian>(v)?)
    }

    fn write_ptp_u128(&mut self, v: (u64, u64)) -> Result<(), Error> {
        let (lo, hi) = v;
        self.write_u64::<LittleEndian>(lo)?;
        self.write_u64::<LittleEndian>(hi)?;
        Ok(())
    }

    fn write_ptp_vec<T: Copy, F: Fn(&mut Self, T) -> Result<(), Error>>(
        &mut self,
        items: &[T],
        func: F,
    ) -> Result<(), Error> {
        self.write_u32::<LittleEndian>(items.len() as u32)?;
        for item in items {
            func(self, *item)?;
        }
        Ok(())
    }

    /// Writes `s` using the PTP string convention: a one-byte code-unit
    /// count (including the NUL terminator) followed by UTF-16LE code units.
    fn write_ptp_str(&mut self, s: &str) -> Result<(), Error> {
        if s.is_empty() {
            self.write_u8(0)?;
            return Ok(());
        }

        let units: Vec<u16> = s.encode_utf16().collect();
        let len = units.len() + 1;
        if len > MAX_PTP_STR_UNITS {
            return Err(Error::Malformed(format!(
                "string of {} code units exceeds the PTP string limit",
                units.len()
            )));
        }

        self.write_u8(len as u8)?;
        for unit in units {
            self.write_u16::<LittleEndian>(unit)?;
        }
        self.write_u16::<LittleEndian>(0)?;
        Ok(())
    }
}

impl PtpWrite for Vec<u8> {}
impl<W: PtpWrite + ?Sized> PtpWrite for &mut W {}

#[derive(Debug, Eq, PartialEq, PartialOrd, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum PtpData {
    UNDEF,
    INT8(i8),
    UINT8(u8),
    INT16(i16),
    UINT16(u16),
    INT32(i32),
    UINT32(u32),
    INT64(i64),
    UINT64(u64),
    INT128((u64, u64)),
    UINT128((u64, u64)),
    AINT8(Vec<i8>),
    AUINT8(Vec<u8>),
    AINT16(Vec<i16>),
    AUINT16(Vec<u16>),
    AINT32(Vec<i32>),
    AUINT32(Vec<u32>),
    AINT64(Vec<i64>),
    AUINT64(Vec<u64>),
    AINT128(Vec<(u64, u64)>),
    AUINT128(Vec<(u64, u64)>),
    STR(String),
}

impl PtpData {
    pub fn encode(&self) -> Vec<u8> {
        use self::PtpData::*;
        let mut out: Vec<u8> = vec![];
        match self {
            UNDEF => {}
            &INT8(val) => {
                out.write_ptp_i8(val).ok();
            }
            &UINT8(val) => {
                out.write_ptp_u8(val).ok();
            }
            &INT16(val) => {
                out.write_ptp_i16(val).ok();
            }
            &UINT16(val) => {
                out.write_ptp_u16(val).ok();
            }
            &INT32(val) => {
                out.write_ptp_i32(val).ok();
            }
            &UINT32(val) => {
                out.write_ptp_u32(val).ok();
            }
            &INT64(val) => {
                out.write_ptp_i64(val).ok();
            }
            &UINT64(val) => {
                out.write_ptp_u64(val).ok();
            }
            &INT128(v) | &UINT128(v) => {
                out.write_ptp_u128(v).ok();
            }
            AINT8(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_i8(v)).ok();
            }
            AUINT8(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_u8(v)).ok();
            }
            AINT16(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_i16(v)).ok();
            }
            AUINT16(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_u16(v)).ok();
            }
            AINT32(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_i32(v)).ok();
            }
            AUINT32(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_u32(v)).ok();
            }
            AINT64(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_i64(v)).ok();
            }
            AUINT64(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_u64(v)).ok();
            }
            AINT128(val) | AUINT128(val) => {
                out.write_ptp_vec(val, |w, v| w.write_ptp_u128(v)).ok();
            }
            STR(val) => {
                out.write_ptp_str(val).ok();
            }
        }
        out
    }

    pub fn read_type<T: PtpRead>(kind: u16, reader: &mut T) -> Result<PtpData, Error> {
        use self::PtpData::*;
        Ok(match kind {
            0x0000 => UNDEF,
            0x0001 => INT8(reader.read_ptp_i8()?),
            0x0002 => UINT8(reader.read_ptp_u8()?),
            0x0003 => INT16(reader.read_ptp_i16()?),
            0x0004 => UINT16(reader.read_ptp_u16()?),
            0x0005 => INT32(reader.read_ptp_i32()?),
            0x0006 => UINT32(reader.read_ptp_u32()?),
            0x0007 => INT64(reader.read_ptp_i64()?),
            0x0008 => UINT64(reader.read_ptp_u64()?),
            0x0009 => INT128(reader.read_ptp_i128()?),
            0x000A => UINT128(reader.read_ptp_u128()?),
            0x4001 => AINT8(reader.read_ptp_i8_vec()?),
            0x4002 => AUINT8(reader.read_ptp_u8_vec()?),
            0x4003 => AINT16(reader.read_ptp_i16_vec()?),
            0x4004 => AUINT16(reader.read_ptp_u16_vec()?),
            0x4005 => AINT32(reader.read_ptp_i32_vec()?),
            0x4006 => AUINT32(reader.read_ptp_u32_vec()?),
            0x4007 => AINT64(reader.read_ptp_i64_vec()?),
            0x4008 => AUINT64(reader.read_ptp_u64_vec()?),
            0x4009 => AINT128(reader.read_ptp_i128_vec()?),
            0x400A => AUINT128(reader.read_ptp_u128_vec()?),
            0xFFFF => STR(reader.read_ptp_str()?),
            _ => UNDEF,
        })
    }
}

impl ToPrimitive for PtpData {
    fn to_i64(&self) -> Option<i64> {
        match self {
            PtpData::INT8(v) => Some(*v as i64),
            PtpData::UINT8(v) => Some(*v as i64),
            PtpData::INT16(v) => Some(*v as i64),
            PtpData::UINT16(v) => Some(*v as i64),
            PtpData::INT32(v) => Some(*v as i64),
            PtpData::UINT32(v) => Some(*v as i64),
            PtpData::INT64(v) => Some(*v as i64),
            _ => None,
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            PtpData::UINT8(v) => Some(*v as u64),
            PtpData::UINT16(v) => Some(*v as u64),
            PtpData::UINT32(v) => Some(*v as u64),
            PtpData::UINT64(v) => Some(*v as u64),
            _ => None,
        }
    }
}

impl From<i8> for PtpData {
    fn from(value: i8) -> Self {
        PtpData::INT8(value)
    }
}

impl From<u8> for PtpData {
    fn from(value: u8) -> Self {
        PtpData::UINT8(value)
    }
}

impl From<i16> for PtpData {
    fn from(value: i16) -> Self {
        PtpData::INT16(value)
    }
}

impl From<u16> for PtpData {
    fn from(value: u16) -> Self {
        PtpData::UINT16(value)
    }
}

impl From<i32> for PtpData {
    fn from(value: i32) -> Self {
        PtpData::INT32(value)
    }
}

impl From<u32> for PtpData {
    fn from(value: u32) -> Self {
        PtpData::UINT32(value)
    }
}

impl From<i64> for PtpData {
    fn from(value: i64) -> Self {
        PtpData::INT64(value)
    }
}

impl From<u64> for PtpData {
    fn from(value: u64) -> Self {
        PtpData::UINT64(value)
    }
}

impl<'a> From<&'a str> for PtpData {
    fn from(value: &'a str) -> Self {
        PtpData::STR(value.to_owned())
    }
}

impl From<String> for PtpData {
    fn from(value: String) -> Self {
        PtpData::STR(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_string_round_trips() {
        let mut buf: Vec<u8> = vec![];
        buf.write_ptp_str("EOS R5").unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_ptp_str().unwrap(), "EOS R5");
        cur.expect_end().unwrap();
    }

    #[test]
    fn empty_string_is_one_byte() {
        let mut buf: Vec<u8> = vec![];
        buf.write_ptp_str("").unwrap();
        assert_eq!(buf, vec![0u8]);

        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_ptp_str().unwrap(), "");
    }

    #[test]
    fn string_uses_zero_high_bytes_for_ascii() {
        let mut buf: Vec<u8> = vec![];
        buf.write_ptp_str("Hi").unwrap();
        // length prefix, then 'H' 'i' '\0' as little-endian u16 each
        assert_eq!(buf, vec![3, b'H', 0, b'i', 0, 0, 0]);
    }

    #[test]
    fn array_round_trips() {
        let mut buf: Vec<u8> = vec![];
        let items = [1u16, 2, 3, 4];
        buf.write_ptp_vec(&items, |w, v| w.write_ptp_u16(v)).unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(cur.read_ptp_u16_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn array_count_over_255_is_malformed() {
        let mut buf: Vec<u8> = vec![];
        buf.write_u32::<LittleEndian>(256).unwrap();
        let mut cur = Cursor::new(buf);
        assert!(matches!(cur.read_ptp_u16_vec(), Err(Error::Malformed(_))));
    }

    #[test]
    fn capped_array_zero_fills_and_reports_true_count() {
        let mut buf: Vec<u8> = vec![];
        buf.write_u32::<LittleEndian>(5).unwrap();
        for v in [10u16, 20, 30, 40, 50] {
            buf.write_u16::<LittleEndian>(v).unwrap();
        }

        let mut cur = Cursor::new(buf);
        let (out, true_count) = cur.read_ptp_vec_capped(3, |c| c.read_ptp_u16()).unwrap();
        assert_eq!(true_count, 5);
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn ptp_data_round_trips_uint32() {
        let data = PtpData::UINT32(0xdead_beef);
        let encoded = data.encode();
        let mut cur = Cursor::new(encoded);
        let decoded = PtpData::read_type(0x0006, &mut cur).unwrap();
        assert_eq!(decoded, data);
    }
}
