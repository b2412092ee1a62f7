use binrw::BinRead;

use crate::utils::common;

pub const IMAGEWTY_MAGIC: [u8; 8] = *b"IMAGEWTY";
pub const IMAGE_HEADER_LEN: usize = 1024;
pub const FILE_HEADER_LEN: usize = 1024;
pub const HEADER_VERSION_V1: u32 = 0x0100;
pub const HEADER_VERSION_V3: u32 = 0x0300;
pub const FORMAT_VERSION: u32 = 0x0010_0234;

#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct ImageHeader {
    pub magic: [u8; 8],
    pub header_version: u32,
    pub header_size: u32,
    pub ram_base: u32,
    pub version: u32,
    pub image_size: u32,
    pub image_header_size: u32,
    #[br(args(header_version))]
    pub body: ImageHeaderBody,
}

/// Version-dependent tail of the image header. v3 interposes one unknown
/// word before the USB ids, shifting the remaining slots.
#[derive(BinRead, Debug, Clone)]
#[br(little, import(header_version: u32))]
pub enum ImageHeaderBody {
    #[br(pre_assert(header_version == HEADER_VERSION_V3))]
    V3 {
        unknown: u32,
        pid: u32,
        vid: u32,
        hardware_id: u32,
        firmware_id: u32,
        val1: u32,
        val1024: u32,
        num_files: u32,
        val1024_2: u32,
        val0: u32,
        val0_2: u32,
        val0_3: u32,
        val0_4: u32,
    },
    V1 {
        pid: u32,
        vid: u32,
        hardware_id: u32,
        firmware_id: u32,
        val1: u32,
        val1024: u32,
        num_files: u32,
        val1024_2: u32,
        val0: u32,
        val0_2: u32,
        val0_3: u32,
        val0_4: u32,
    },
}

impl ImageHeader {
    pub fn num_files(&self) -> u32 {
        match &self.body {
            ImageHeaderBody::V3 { num_files, .. } | ImageHeaderBody::V1 { num_files, .. } => {
                *num_files
            }
        }
    }

    pub fn pid(&self) -> u32 {
        match &self.body {
            ImageHeaderBody::V3 { pid, .. } | ImageHeaderBody::V1 { pid, .. } => *pid,
        }
    }

    pub fn vid(&self) -> u32 {
        match &self.body {
            ImageHeaderBody::V3 { vid, .. } | ImageHeaderBody::V1 { vid, .. } => *vid,
        }
    }

    pub fn hardware_id(&self) -> u32 {
        match &self.body {
            ImageHeaderBody::V3 { hardware_id, .. } | ImageHeaderBody::V1 { hardware_id, .. } => {
                *hardware_id
            }
        }
    }

    pub fn firmware_id(&self) -> u32 {
        match &self.body {
            ImageHeaderBody::V3 { firmware_id, .. } | ImageHeaderBody::V1 { firmware_id, .. } => {
                *firmware_id
            }
        }
    }
}

#[derive(BinRead, Debug, Clone)]
#[br(little, import(header_version: u32))]
pub struct FileHeader {
    pub filename_len: u32,
    pub total_header_size: u32,
    maintype_bytes: [u8; 8],
    subtype_bytes: [u8; 16],
    #[br(args(header_version))]
    pub body: FileHeaderBody,
}

/// Version-dependent tail of a file header. v1 keeps the lengths before the
/// filename array, v3 moves the filename up front and pads the length words.
#[derive(BinRead, Debug, Clone)]
#[br(little, import(header_version: u32))]
pub enum FileHeaderBody {
    #[br(pre_assert(header_version == HEADER_VERSION_V3))]
    V3 {
        unknown_0: u32,
        filename: [u8; 256],
        stored_length: u32,
        pad1: u32,
        original_length: u32,
        pad2: u32,
        offset: u32,
    },
    V1 {
        unknown_3: u32,
        stored_length: u32,
        original_length: u32,
        offset: u32,
        unknown: u32,
        filename: [u8; 256],
    },
}

impl FileHeader {
    pub fn maintype(&self) -> String {
        common::clean_field(&self.maintype_bytes)
    }

    pub fn subtype(&self) -> String {
        common::clean_field(&self.subtype_bytes)
    }

    pub fn filename(&self) -> String {
        match &self.body {
            FileHeaderBody::V3 { filename, .. } | FileHeaderBody::V1 { filename, .. } => {
                common::clean_field(filename)
            }
        }
    }

    pub fn stored_length(&self) -> u32 {
        match &self.body {
            FileHeaderBody::V3 { stored_length, .. }
            | FileHeaderBody::V1 { stored_length, .. } => *stored_length,
        }
    }

    pub fn original_length(&self) -> u32 {
        match &self.body {
            FileHeaderBody::V3 { original_length, .. }
            | FileHeaderBody::V1 { original_length, .. } => *original_length,
        }
    }

    pub fn offset(&self) -> u32 {
        match &self.body {
            FileHeaderBody::V3 { offset, .. } | FileHeaderBody::V1 { offset, .. } => *offset,
        }
    }
}
