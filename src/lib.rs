#[cfg(feature = "serde")]
use serde::Serialize;

use byteorder::{LittleEndian, ReadBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};
use thiserror::Error;

use std::io::{self, Cursor};

mod buffer;
mod command;
mod container;
mod data;
pub mod engine;
mod event;
mod response;
mod storage;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use crate::command::*;
pub use crate::container::{ContainerType, PtpIpPacketType};
pub use crate::data::*;
pub use crate::engine::{DeviceType, Engine, EngineState, TransactionHandle};
pub use crate::event::*;
pub use crate::response::*;
pub use crate::storage::*;
pub use crate::transport::{Framing, HybridTransport, PtpIpTransport, Transport, UsbTransport};

/// An error in a PTP transaction
#[derive(Error, Debug)]
pub enum Error {
    /// PTP Responder returned a status code other than Ok, either a constant in StandardResponseCode or a vendor-defined code
    #[error("the ptp device returned an error code: {0:?}")]
    Response(ResponseCode),

    /// Data received was malformed
    #[error("the data received was malformed: {0}")]
    Malformed(String),

    #[error("the data received was malformed: bad object format")]
    BadObjectFormat,

    #[error("the data received was malformed: bad association code")]
    BadAssociationCode,

    #[error("the data received was malformed: bad event code")]
    BadEventCode,

    #[error("received an event with no payload")]
    NoEventPayload,

    /// The engine's scratch buffer could not grow enough to hold an
    /// incoming or outgoing payload.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Another rusb error
    #[error("a usb error occurred: {0}")]
    Usb(#[from] rusb::Error),

    /// Another IO error
    #[error("an i/o error occurred: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DeviceInfo {
    pub version: u16,
    pub vendor_ex_id: u32,
    pub vendor_ex_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub image_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn decode(buf: &[u8]) -> Result<DeviceInfo, Error> {
        let mut cur = Cursor::new(buf);

        Ok(DeviceInfo {
            version: cur.read_ptp_u16()?,
            vendor_ex_id: cur.read_ptp_u32()?,
            vendor_ex_version: cur.read_ptp_u16()?,
            vendor_extension_desc: cur.read_ptp_str()?,
            functional_mode: cur.read_ptp_u16()?,
            operations_supported: cur.read_ptp_u16_vec()?,
            events_supported: cur.read_ptp_u16_vec()?,
            device_properties_supported: cur.read_ptp_u16_vec()?,
            capture_formats: cur.read_ptp_u16_vec()?,
            image_formats: cur.read_ptp_u16_vec()?,
            manufacturer: cur.read_ptp_str()?,
            model: cur.read_ptp_str()?,
            device_version: cur.read_ptp_str()?,
            serial_number: cur.read_ptp_str()?,
        })
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: ObjectFormatCode,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub thumb_format: ObjectFormatCode,
    pub thumb_compressed_size: u32,
    pub thumb_pix_width: u32,
    pub thumb_pix_height: u32,
    pub image_pix_width: u32,
    pub image_pix_height: u32,
    pub image_bit_depth: u32,
    pub parent_object: u32,
    pub association_type: AssociationCode,
    pub association_desc: u32,
    pub sequence_number: u32,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
    pub keywords: String,
}

impl ObjectInfo {
    pub fn decode(buf: &[u8]) -> Result<ObjectInfo, Error> {
        let mut cur = Cursor::new(buf);

        Ok(ObjectInfo {
            storage_id: cur.read_ptp_u32()?,
            object_format: ObjectFormatCode::from_u16(cur.read_ptp_u16()?)
                .ok_or(Error::BadObjectFormat)?,
            protection_status: cur.read_ptp_u16()?,
            object_compressed_size: cur.read_ptp_u32()?,
            thumb_format: ObjectFormatCode::from_u16(cur.read_ptp_u16()?)
                .ok_or(Error::BadObjectFormat)?,
            thumb_compressed_size: cur.read_ptp_u32()?,
            thumb_pix_width: cur.read_ptp_u32()?,
            thumb_pix_height: cur.read_ptp_u32()?,
            image_pix_width: cur.read_ptp_u32()?,
            image_pix_height: cur.read_ptp_u32()?,
            image_bit_depth: cur.read_ptp_u32()?,
            parent_object: cur.read_ptp_u32()?,
            association_type: AssociationCode::from_u16(cur.read_ptp_u16()?)
                .ok_or(Error::BadAssociationCode)?,
            association_desc: cur.read_ptp_u32()?,
            sequence_number: cur.read_ptp_u32()?,
            filename: cur.read_ptp_str()?,
            capture_date: cur.read_ptp_str()?,
            modification_date: cur.read_ptp_str()?,
            keywords: cur.read_ptp_str()?,
        })
    }

    pub fn encode<W: PtpWrite>(&self, mut w: W) -> Result<(), Error> {
        w.write_ptp_u32(self.storage_id)?;
        w.write_ptp_u16(self.object_format.to_u16().unwrap())?;
        w.write_ptp_u16(self.protection_status)?;
        w.write_ptp_u32(self.object_compressed_size)?;
        w.write_ptp_u16(self.thumb_format.to_u16().unwrap())?;
        w.write_ptp_u32(self.thumb_compressed_size)?;
        w.write_ptp_u32(self.thumb_pix_width)?;
        w.write_ptp_u32(self.thumb_pix_height)?;
        w.write_ptp_u32(self.image_pix_width)?;
        w.write_ptp_u32(self.image_pix_height)?;
        w.write_ptp_u32(self.image_bit_depth)?;
        w.write_ptp_u32(self.parent_object)?;
        w.write_ptp_u16(self.association_type.to_u16().unwrap())?;
        w.write_ptp_u32(self.association_desc)?;
        w.write_ptp_u32(self.sequence_number)?;
        w.write_ptp_str(&self.filename)?;
        w.write_ptp_str(&self.capture_date)?;
        w.write_ptp_str(&self.modification_date)?;
        w.write_ptp_str(&self.keywords)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StorageInfo {
    pub storage_type: StorageType,
    pub filesystem_type: FilesystemType,
    pub access_capability: AccessType,
    pub max_capacity: u64,
    pub free_space_in_bytes: u64,
    pub free_space_in_images: u32,
    pub storage_description: String,
    pub volume_label: String,
}

impl StorageInfo {
    pub fn decode<T: PtpRead>(cur: &mut T) -> Result<StorageInfo, Error> {
        Ok(StorageInfo {
            storage_type: StorageType::from_u16(cur.read_ptp_u16()?)
                .ok_or_else(|| Error::Malformed("invalid storage type".to_owned()))?,
            filesystem_type: FilesystemType::from_u16(cur.read_ptp_u16()?)
                .ok_or_else(|| Error::Malformed("invalid filesystem type".to_owned()))?,
            access_capability: AccessType::from_u16(cur.read_ptp_u16()?)
                .ok_or_else(|| Error::Malformed("invalid access type".to_owned()))?,
            max_capacity: cur.read_ptp_u64()?,
            free_space_in_bytes: cur.read_ptp_u64()?,
            free_space_in_images: cur.read_ptp_u32()?,
            storage_description: cur.read_ptp_str()?,
            volume_label: cur.read_ptp_str()?,
        })
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum FormData {
    None,
    Range {
        min_value: PtpData,
        max_value: PtpData,
        step: PtpData,
    },
    Enumeration {
        array: Vec<PtpData>,
    },
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PropInfo {
    pub property_code: u16,
    pub data_type: u16,
    pub get_set: u8,
    pub is_enable: u8,
    pub factory_default: PtpData,
    pub current: PtpData,
    pub form: FormData,
}

impl PropInfo {
    pub fn decode<T: PtpRead>(cur: &mut T) -> Result<PropInfo, Error> {
        let data_type;
        Ok(PropInfo {
            property_code: cur.read_u16::<LittleEndian>()?,
            data_type: {
                data_type = cur.read_u16::<LittleEndian>()?;
                data_type
            },
            get_set: cur.read_u8()?,
            is_enable: cur.read_u8()?,
            factory_default: PtpData::read_type(data_type, cur)?,
            current: PtpData::read_type(data_type, cur)?,
            form: {
                match cur.read_u8()? {
                    0x01 => FormData::Range {
                        min_value: PtpData::read_type(data_type, cur)?,
                        max_value: PtpData::read_type(data_type, cur)?,
                        step: PtpData::read_type(data_type, cur)?,
                    },
                    0x02 => FormData::Enumeration {
                        array: {
                            let len = cur.read_u16::<LittleEndian>()? as usize;
                            let mut arr = Vec::with_capacity(len);
                            for _ in 0..len {
                                arr.push(PtpData::read_type(data_type, cur)?);
                            }
                            arr
                        },
                    },
                    _ => FormData::None,
                }
            },
        })
    }
}

/// Ambient, general-purpose operation wrappers (OpenSession, CloseSession,
/// GetDeviceInfo, GetStorageIDs, GetObjectInfo, GetObject, SendObject) that
/// exercise the transaction engine end-to-end, the way the teacher's own
/// `Device<C>` carries them atop its bulk transfer primitives. Per-vendor
/// opcode catalogs and device-type-specific behavior remain out of scope;
/// these stay thin clients of `Engine`.
impl<T: Transport> Engine<T> {
    pub fn get_object_info(&self, handle: ObjectHandle) -> Result<ObjectInfo, Error> {
        let data = self.send(StandardCommandCode::GetObjectInfo.into(), &[handle.0])?;
        ObjectInfo::decode(&data)
    }

    pub fn send_object_info(
        &self,
        storage_id: StorageId,
        parent: ObjectHandle,
        info: &ObjectInfo,
    ) -> Result<ObjectHandle, Error> {
        let mut data = vec![];
        info.encode(&mut data)?;

        let data = self.send_data(
            StandardCommandCode::SendObjectInfo.into(),
            &[storage_id.0, parent.0],
            &data,
        )?;

        let mut cur = Cursor::new(data);
        let _storage_id = cur.read_ptp_u32()?;
        let _parent = cur.read_ptp_u32()?;
        let object_handle = cur.read_ptp_u32()?;
        cur.expect_end()?;

        Ok(ObjectHandle(object_handle))
    }

    pub fn send_object(&self, data: &[u8]) -> Result<(), Error> {
        self.send_data(StandardCommandCode::SendObject.into(), &[], data)?;
        Ok(())
    }

    pub fn get_object(&self, handle: ObjectHandle) -> Result<Vec<u8>, Error> {
        self.send(StandardCommandCode::GetObject.into(), &[handle.0])
    }

    pub fn get_partial_object(
        &self,
        handle: ObjectHandle,
        offset: u32,
        len: u32,
    ) -> Result<Vec<u8>, Error> {
        self.send(
            StandardCommandCode::GetPartialObject.into(),
            &[handle.0, offset, len],
        )
    }

    /// Gets the object handles contained in a storage. If `parent` is not
    /// specified, it returns every object in the storage. If `parent` is
    /// `ObjectHandle::root()`, it returns only those at the "root" level.
    pub fn get_object_handles(
        &self,
        storage_id: StorageId,
        format: Option<ObjectFormatCode>,
        parent: Option<ObjectHandle>,
    ) -> Result<Vec<ObjectHandle>, Error> {
        let data = self.send(
            StandardCommandCode::GetObjectHandles.into(),
            &[
                storage_id.0,
                format.map_or(0x0, |fmt| fmt.to_u32().unwrap()),
                parent.map_or(0x0, |p| p.0),
            ],
        )?;

        let mut cur = Cursor::new(data);
        let value = cur.read_ptp_u32_vec()?;
        cur.expect_end()?;

        Ok(value.into_iter().map(ObjectHandle).collect())
    }

    pub fn get_num_objects(
        &self,
        storage_id: Option<StorageId>,
        format: Option<ObjectFormatCode>,
        parent: Option<ObjectHandle>,
    ) -> Result<u32, Error> {
        let data = self.send(
            StandardCommandCode::GetNumObjects.into(),
            &[
                storage_id.map_or(0xFFFFFFFF, |sid| sid.0),
                format.map_or(0x0, |fmt| fmt.to_u32().unwrap()),
                parent.map_or(0x0, |oh| oh.0),
            ],
        )?;

        let mut cur = Cursor::new(data);
        let value = cur.read_ptp_u32()?;
        cur.expect_end()?;

        Ok(value)
    }

    pub fn get_storage_info(&self, storage_id: StorageId) -> Result<StorageInfo, Error> {
        let data = self.send(StandardCommandCode::GetStorageInfo.into(), &[storage_id.0])?;

        let mut cur = Cursor::new(data);
        let res = StorageInfo::decode(&mut cur)?;
        cur.expect_end()?;

        Ok(res)
    }

    pub fn get_storage_ids(&self) -> Result<Vec<StorageId>, Error> {
        let data = self.send(StandardCommandCode::GetStorageIDs.into(), &[])?;

        let mut cur = Cursor::new(data);
        let value = cur.read_ptp_u32_vec()?;
        cur.expect_end()?;

        Ok(value.into_iter().map(StorageId).collect())
    }

    pub fn get_device_info(&self) -> Result<DeviceInfo, Error> {
        let data = self.send(StandardCommandCode::GetDeviceInfo.into(), &[0, 0, 0])?;
        let device_info = DeviceInfo::decode(&data)?;
        self.set_device_info(device_info.clone());
        Ok(device_info)
    }
}

#[derive(Debug, Clone)]
#[cfg(test)]
mod tests {
    use super::*;

    fn device_info_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_ptp_u16(100).unwrap();
        buf.write_ptp_u32(0x0000_0006).unwrap();
        buf.write_ptp_u16(1).unwrap();
        buf.write_ptp_str("vendor extension").unwrap();
        buf.write_ptp_u16(1).unwrap();
        buf.write_ptp_vec(&[0x1001u16, 0x1002], |w, v| w.write_ptp_u16(v))
            .unwrap();
        buf.write_ptp_vec(&[0x4002u16], |w, v| w.write_ptp_u16(v))
            .unwrap();
        buf.write_ptp_vec(&[0x5001u16], |w, v| w.write_ptp_u16(v))
            .unwrap();
        buf.write_ptp_vec(&[0x3801u16], |w, v| w.write_ptp_u16(v))
            .unwrap();
        buf.write_ptp_vec(&[0x3801u16], |w, v| w.write_ptp_u16(v))
            .unwrap();
        buf.write_ptp_str("Canon Inc.").unwrap();
        buf.write_ptp_str("Canon EOS R5").unwrap();
        buf.write_ptp_str("3.2.1").unwrap();
        buf.write_ptp_str("012345").unwrap();
        buf
    }

    #[test]
    fn device_info_round_trips_through_decode() {
        let buf = device_info_bytes();
        let info = DeviceInfo::decode(&buf).unwrap();

        assert_eq!(info.version, 100);
        assert_eq!(info.vendor_ex_id, 0x0000_0006);
        assert_eq!(info.vendor_extension_desc, "vendor extension");
        assert_eq!(info.operations_supported, vec![0x1001, 0x1002]);
        assert_eq!(info.events_supported, vec![0x4002]);
        assert_eq!(info.device_properties_supported, vec![0x5001]);
        assert_eq!(info.capture_formats, vec![0x3801]);
        assert_eq!(info.image_formats, vec![0x3801]);
        assert_eq!(info.manufacturer, "Canon Inc.");
        assert_eq!(info.model, "Canon EOS R5");
        assert_eq!(info.device_version, "3.2.1");
        assert_eq!(info.serial_number, "012345");
    }

    #[test]
    fn object_info_round_trips_through_encode_decode() {
        let info = ObjectInfo {
            storage_id: 0x0001_0001,
            object_format: ObjectFormatCode::Standard(StandardObjectFormatCode::ExifJpeg),
            protection_status: 0,
            object_compressed_size: 4096,
            thumb_format: ObjectFormatCode::Standard(StandardObjectFormatCode::ExifJpeg),
            thumb_compressed_size: 1024,
            thumb_pix_width: 160,
            thumb_pix_height: 120,
            image_pix_width: 1920,
            image_pix_height: 1080,
            image_bit_depth: 24,
            parent_object: 0,
            association_type: AssociationCode::Standard(StandardAssociationCode::Undefined),
            association_desc: 0,
            sequence_number: 0,
            filename: "img_0001.jpg".to_owned(),
            capture_date: "20260101T000000".to_owned(),
            modification_date: "20260101T000000".to_owned(),
            keywords: String::new(),
        };

        let mut buf = Vec::new();
        info.encode(&mut buf).unwrap();

        let decoded = ObjectInfo::decode(&buf).unwrap();
        assert_eq!(decoded.storage_id, info.storage_id);
        assert_eq!(decoded.object_compressed_size, info.object_compressed_size);
        assert_eq!(decoded.filename, info.filename);
        assert_eq!(decoded.capture_date, info.capture_date);
        assert_eq!(decoded.keywords, info.keywords);
    }

    #[test]
    fn storage_info_decode_falls_back_to_other_for_vendor_codes() {
        let mut buf = Vec::new();
        buf.write_ptp_u16(0x8001).unwrap();
        buf.write_ptp_u16(0x8002).unwrap();
        buf.write_ptp_u16(0x0000).unwrap();
        buf.write_ptp_u64(1_000_000).unwrap();
        buf.write_ptp_u64(500_000).unwrap();
        buf.write_ptp_u32(10).unwrap();
        buf.write_ptp_str("flash card").unwrap();
        buf.write_ptp_str("VOL").unwrap();

        let mut cur = Cursor::new(buf);
        let info = StorageInfo::decode(&mut cur).unwrap();

        assert_eq!(info.storage_type, StorageType::Other(0x8001));
        assert_eq!(info.filesystem_type, FilesystemType::Other(0x8002));
        assert_eq!(
            info.access_capability,
            AccessType::Standard(StandardAccessType::ReadWrite)
        );
        assert_eq!(info.storage_description, "flash card");
        assert_eq!(info.volume_label, "VOL");
    }
}

pub struct ObjectTree {
    pub handle: ObjectHandle,
    pub info: ObjectInfo,
    pub children: Option<Vec<ObjectTree>>,
}

impl ObjectTree {
    pub fn walk(&self) -> Vec<(String, ObjectTree)> {
        let mut input = vec![("".to_owned(), self.clone())];
        let mut output = vec![];

        while !input.is_empty() {
            for (prefix, item) in input.split_off(0) {
                let path = prefix.clone()
                    + (if prefix.is_empty() { "" } else { "/" })
                    + &item.info.filename;

                output.push((path.clone(), item.clone()));

                if let Some(children) = item.children {
                    input.extend(children.into_iter().map(|x| (path.clone(), x)));
                }
            }
        }

        output
    }
}
