//! Reader/writer for Allwinner "IMAGEWTY" firmware image containers, the
//! format consumed by the vendor flashing tools (PhoenixSuit, LiveSuit).
//!
//! - `imagewty`: container codec (load, in-place decrypt, file index)
//! - `imagecfg`: DragonEx `image.cfg` configuration language
//! - `partition`: `sys_partition.fex` partition tables
//! - `packer`: unpack layouts, `image.cfg` synthesis, decrypt-to-file

pub mod error;
pub mod imagecfg;
pub mod imagewty;
pub mod packer;
pub mod partition;
pub mod utils;
