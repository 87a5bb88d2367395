use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Ord, PartialOrd, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ObjectHandle(pub(crate) u32);

impl ObjectHandle {
    /// Returns an ObjectHandle that represents the "root" of a storage.
    pub fn root() -> ObjectHandle {
        ObjectHandle(0xFFFFFFFF)
    }
}

impl Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectHandle(0x{:08x})", self.0)
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Ord, PartialOrd, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StandardObjectFormatCode {
    UndefinedNonImage = 0x3000,
    Association,
    Script,
    Executable,
    Text,
    Html,
    Dpof,
    Aiff,
    Wav,
    Mp3,
    Avi,
    Mpeg,
    Asf,
    UndefinedImage = 0x3800,
    ExifJpeg,
    TiffEp,
    FlashPix,
    Bmp,
    Ciff,
    UndefinedReserved,
    Gif,
    Jfif,
    Pcd,
    Pict,
    Png,
    UndefinedReserved2,
    Tiff,
    TiffIt,
    Jp2,
    Jpx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum ObjectFormatCode {
    Standard(StandardObjectFormatCode),
    Reserved(u16),
    Vendor(u16),
    ImageOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormatCategory {
    Ancillary,
    Image,
    Unknown,
}

impl ObjectFormatCode {
    pub fn category(&self) -> ObjectFormatCategory {
        match self {
            ObjectFormatCode::Standard(sofc) => match sofc {
                StandardObjectFormatCode::UndefinedNonImage
                | StandardObjectFormatCode::Association
                | StandardObjectFormatCode::Script
                | StandardObjectFormatCode::Executable
                | StandardObjectFormatCode::Text
                | StandardObjectFormatCode::Html
                | StandardObjectFormatCode::Dpof
                | StandardObjectFormatCode::Aiff
                | StandardObjectFormatCode::Wav
                | StandardObjectFormatCode::Mp3
                | StandardObjectFormatCode::Avi
                | StandardObjectFormatCode::Mpeg
                | StandardObjectFormatCode::Asf => ObjectFormatCategory::Ancillary,
                StandardObjectFormatCode::UndefinedImage
                | StandardObjectFormatCode::ExifJpeg
                | StandardObjectFormatCode::TiffEp
                | StandardObjectFormatCode::FlashPix
                | StandardObjectFormatCode::Bmp
                | StandardObjectFormatCode::Ciff
                | StandardObjectFormatCode::UndefinedReserved
                | StandardObjectFormatCode::Gif
                | StandardObjectFormatCode::Jfif
                | StandardObjectFormatCode::Pcd
                | StandardObjectFormatCode::Pict
                | StandardObjectFormatCode::Png
                | StandardObjectFormatCode::UndefinedReserved2
                | StandardObjectFormatCode::Tiff
                | StandardObjectFormatCode::TiffIt
                | StandardObjectFormatCode::Jp2
                | StandardObjectFormatCode::Jpx => ObjectFormatCategory::Image,
            },
            ObjectFormatCode::ImageOnly => ObjectFormatCategory::Image,
            ObjectFormatCode::Reserved(_) | ObjectFormatCode::Vendor(_) => {
                ObjectFormatCategory::Unknown
            }
        }
    }
}

impl FromPrimitive for ObjectFormatCode {
    fn from_i64(_: i64) -> Option<Self> {
        None
    }

    fn from_u64(n: u64) -> Option<Self> {
        let n = n as u16;

        const MSN_MASK: u16 = 0b1111_0000_0000_0000;
        const RESERVED_MSN: u16 = 0b0011;
        const VENDOR_MSN: u16 = 0b1011;

        if let Some(ofc) = StandardObjectFormatCode::from_u16(n) {
            return Some(ObjectFormatCode::Standard(ofc));
        }

        if n == 0xFFFF {
            return Some(ObjectFormatCode::ImageOnly);
        }

        let msn = (n & MSN_MASK) >> 12;

        if msn == VENDOR_MSN {
            return Some(ObjectFormatCode::Vendor(n));
        }

        if msn == RESERVED_MSN {
            return Some(ObjectFormatCode::Reserved(n));
        }

        None
    }
}

impl ToPrimitive for ObjectFormatCode {
    fn to_i64(&self) -> Option<i64> {
        None
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            ObjectFormatCode::Standard(ofc) => ofc.to_u64(),
            ObjectFormatCode::Reserved(n) | ObjectFormatCode::Vendor(n) => Some(*n as u64),
            ObjectFormatCode::ImageOnly => Some(0xFFFFFFFF),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Ord, PartialOrd, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StandardAssociationCode {
    Undefined = 0x0000,
    GenericFolder,
    Album,
    TimeSequence,
    PanoramicHorizontal,
    PanoramicVertical,
    Panoramic2D,
    AncillaryData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum AssociationCode {
    Standard(StandardAssociationCode),
    Reserved(u16),
    Vendor(u16),
}

impl FromPrimitive for AssociationCode {
    fn from_i64(_: i64) -> Option<Self> {
        None
    }

    fn from_u64(n: u64) -> Option<Self> {
        let n = n as u16;

        if let Some(ac) = StandardAssociationCode::from_u16(n) {
            return Some(AssociationCode::Standard(ac));
        }

        if (n >> 15) & 1 == 1 {
            return Some(AssociationCode::Vendor(n));
        }

        Some(AssociationCode::Reserved(n))
    }
}

impl ToPrimitive for AssociationCode {
    fn to_i64(&self) -> Option<i64> {
        None
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            AssociationCode::Standard(ac) => ac.to_u64(),
            AssociationCode::Reserved(n) | AssociationCode::Vendor(n) => Some(*n as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Ord, PartialOrd, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StorageId(pub(crate) u32);

impl StorageId {
    /// Returns a StorageId that represents all of the storages combined.
    pub fn all() -> StorageId {
        StorageId(0xFFFFFFFF)
    }
}

impl Display for StorageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageId(0x{:08x})", self.0)
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StandardStorageType {
    Undefined = 0x0000,
    FixedRom = 0x0001,
    RemovableRom = 0x0002,
    FixedRam = 0x0003,
    RemovableRam = 0x0004,
}

/// §6's `StorageInfo.storage_type`, widened with a fallback for the
/// reserved/vendor-defined values PTP/MTP permits beyond the standard set
/// (same shape as `CommandCode`/`ResponseCode`'s `Standard`/`Other` split).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StorageType {
    Standard(StandardStorageType),
    Other(u16),
}

impl FromPrimitive for StorageType {
    fn from_i64(n: i64) -> Option<Self> {
        Some(StandardStorageType::from_i64(n).map_or_else(
            || StorageType::Other(n as u16),
            StorageType::Standard,
        ))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(StandardStorageType::from_u64(n).map_or_else(
            || StorageType::Other(n as u16),
            StorageType::Standard,
        ))
    }
}

impl ToPrimitive for StorageType {
    fn to_i64(&self) -> Option<i64> {
        match self {
            StorageType::Standard(s) => s.to_i64(),
            StorageType::Other(n) => Some(*n as i64),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            StorageType::Standard(s) => s.to_u64(),
            StorageType::Other(n) => Some(*n as u64),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StandardFilesystemType {
    Undefined = 0x0000,
    GenericFlat = 0x0001,
    GenericHierarchical = 0x0002,
    Dcf = 0x0003,
}

/// §6's `StorageInfo.filesystem_type`, widened the same way as `StorageType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum FilesystemType {
    Standard(StandardFilesystemType),
    Other(u16),
}

impl FromPrimitive for FilesystemType {
    fn from_i64(n: i64) -> Option<Self> {
        Some(StandardFilesystemType::from_i64(n).map_or_else(
            || FilesystemType::Other(n as u16),
            FilesystemType::Standard,
        ))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(StandardFilesystemType::from_u64(n).map_or_else(
            || FilesystemType::Other(n as u16),
            FilesystemType::Standard,
        ))
    }
}

impl ToPrimitive for FilesystemType {
    fn to_i64(&self) -> Option<i64> {
        match self {
            FilesystemType::Standard(s) => s.to_i64(),
            FilesystemType::Other(n) => Some(*n as i64),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            FilesystemType::Standard(s) => s.to_u64(),
            FilesystemType::Other(n) => Some(*n as u64),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum StandardAccessType {
    ReadWrite = 0x0000,
    ReadOnly = 0x0001,
    ReadOnlyWithObjectDeletion = 0x0002,
}

/// §6's `StorageInfo.access_capability`, widened the same way as
/// `StorageType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum AccessType {
    Standard(StandardAccessType),
    Other(u16),
}

impl FromPrimitive for AccessType {
    fn from_i64(n: i64) -> Option<Self> {
        Some(StandardAccessType::from_i64(n).map_or_else(
            || AccessType::Other(n as u16),
            AccessType::Standard,
        ))
    }

    fn from_u64(n: u64) -> Option<Self> {
        Some(StandardAccessType::from_u64(n).map_or_else(
            || AccessType::Other(n as u16),
            AccessType::Standard,
        ))
    }
}

impl ToPrimitive for AccessType {
    fn to_i64(&self) -> Option<i64> {
        match self {
            AccessType::Standard(s) => s.to_i64(),
            AccessType::Other(n) => Some(*n as i64),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match self {
            AccessType::Standard(s) => s.to_u64(),
            AccessType::Other(n) => Some(*n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_type_falls_back_to_other_for_vendor_values() {
        assert_eq!(StorageType::from_u16(0x8001), Some(StorageType::Other(0x8001)));
        assert_eq!(
            StorageType::from_u16(0x0001),
            Some(StorageType::Standard(StandardStorageType::FixedRom))
        );
    }

    #[test]
    fn association_code_keeps_its_own_variant() {
        // regression: from_u64 previously returned an ObjectFormatCode for
        // vendor/reserved association codes, which wouldn't type-check.
        assert_eq!(
            AssociationCode::from_u16(0x9000),
            Some(AssociationCode::Vendor(0x9000))
        );
        assert_eq!(
            AssociationCode::from_u16(0x1000),
            Some(AssociationCode::Reserved(0x1000))
        );
    }

    #[test]
    fn object_format_category_classifies_known_codes() {
        let jpeg = ObjectFormatCode::Standard(StandardObjectFormatCode::ExifJpeg);
        assert_eq!(jpeg.category(), ObjectFormatCategory::Image);

        let script = ObjectFormatCode::Standard(StandardObjectFormatCode::Script);
        assert_eq!(script.category(), ObjectFormatCategory::Ancillary);

        let vendor = ObjectFormatCode::Vendor(0xb001);
        assert_eq!(vendor.category(), ObjectFormatCategory::Unknown);
    }
}
