//! Turns a loaded image back into files on disk: the two unpack layouts,
//! the synthesized `image.cfg`, and the decrypt-to-file operation.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;

use crate::error::{Error, Result};
use crate::imagecfg::{Document, Group, Variable};
use crate::imagewty::{FileEntry, Image};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Flat `<maintype>_<subtype>` payloads next to their raw `.hdr` blocks.
    Unimg,
    /// Embedded filenames as relative paths, directories recreated.
    Imgrepacker,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unimg" => Some(Self::Unimg),
            "imgrepacker" => Some(Self::Imgrepacker),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unimg => "unimg",
            Self::Imgrepacker => "imgrepacker",
        }
    }
}

pub fn unpack_image(
    image: &Image,
    output_dir: &Path,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir)?;
    }
    fs::create_dir_all(output_dir)?;

    let mut failed = 0usize;
    let mut filelist = Group::new("FILELIST");

    for (index, entry) in image.files().iter().enumerate() {
        let cfg_filename = match format {
            OutputFormat::Unimg => {
                if verbose {
                    println!(
                        "Extracting: {} {} ({}, {})",
                        entry.maintype, entry.subtype, entry.original_length, entry.stored_length
                    );
                }
                let stem = format!("{}_{}", entry.maintype, entry.subtype);
                if let Err(e) = write_unimg_pair(image, index, entry, output_dir, &stem) {
                    eprintln!("Error: unable to extract {stem}: {e}");
                    failed += 1;
                }
                stem
            }
            OutputFormat::Imgrepacker => {
                if verbose {
                    println!("Extracting {}", entry.filename);
                }
                let relative = entry.filename.trim_start_matches('/').to_string();
                if let Err(e) = write_nested(image, entry, output_dir, &relative) {
                    eprintln!("Error: unable to extract {}: {e}", entry.filename);
                    failed += 1;
                }
                relative
            }
        };

        filelist.push(Variable::list(
            "",
            vec![
                Variable::string("filename", cfg_filename),
                Variable::string("maintype", entry.maintype.clone()),
                Variable::string("subtype", entry.subtype.clone()),
            ],
        ));
    }

    let config = build_image_cfg(image, filelist);
    let banner = format!(
        ";/**************************************************************************/\n\
         ; {}\n\
         ; generated by awimage v{}\n\
         ; {}\n\
         ;/**************************************************************************/\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        env!("CARGO_PKG_VERSION"),
        image.path().display()
    );
    fs::write(
        output_dir.join("image.cfg"),
        banner + &config.dump_to_string(),
    )?;

    if failed > 0 {
        return Err(Error::Io(io::Error::other(format!(
            "{failed} file(s) failed to extract"
        ))));
    }
    if verbose {
        println!("Successfully unpacked image to {}", output_dir.display());
    }
    Ok(())
}

fn write_unimg_pair(
    image: &Image,
    index: usize,
    entry: &FileEntry,
    output_dir: &Path,
    stem: &str,
) -> Result<()> {
    if let Some(header) = image.header_bytes(index) {
        fs::write(output_dir.join(format!("{stem}.hdr")), header)?;
    }
    fs::write(output_dir.join(stem), image.data(entry))?;
    Ok(())
}

fn write_nested(
    image: &Image,
    entry: &FileEntry,
    output_dir: &Path,
    relative: &str,
) -> Result<()> {
    let path = output_dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, image.data(entry))?;
    Ok(())
}

fn build_image_cfg(image: &Image, filelist: Group) -> Document {
    let mut dir_def = Group::new("DIR_DEF");
    dir_def.push(Variable::string("INPUT_DIR", "../"));

    let mut image_cfg = Group::new("IMAGE_CFG");
    image_cfg.push(Variable::number("version", image.version()));
    image_cfg.push(Variable::number("pid", image.pid()));
    image_cfg.push(Variable::number("vid", image.vid()));
    image_cfg.push(Variable::number("hardwareid", image.hardware_id()));
    image_cfg.push(Variable::number("firmwareid", image.firmware_id()));
    image_cfg.push(Variable::reference(
        "imagename",
        image.path().display().to_string(),
    ));
    image_cfg.push(Variable::reference("filelist", "FILELIST"));
    image_cfg.push(Variable::reference(
        "encrypt",
        if image.is_encrypted() { "1" } else { "0" },
    ));

    let mut config = Document::new();
    config.add_group(dir_def);
    config.add_group(filelist);
    config.add_group(image_cfg);
    config
}

// TODO: implement packing; stored_length is original_length rounded up to
// 512, and regions are encrypted header first, then the file header table,
// then the contents in table order, mirroring the load path.
pub fn pack_image(_input_dir: &Path, _output_file: &Path, _encrypt: bool) -> Result<()> {
    eprintln!("Warning: pack is not implemented yet");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagewty::fixtures::{build_v1_image, temp_path};
    use crate::partition::PartitionTable;

    fn load_fixture(name: &str) -> (Image, std::path::PathBuf) {
        let path = temp_path(name);
        fs::write(&path, build_v1_image()).unwrap();
        (Image::load(&path).unwrap(), path)
    }

    #[test]
    fn test_unpack_imgrepacker_layout() {
        let (image, img_path) = load_fixture("unpack-rep.img");
        let out = temp_path("unpack-rep-out");

        unpack_image(&image, &out, OutputFormat::Imgrepacker, false).unwrap();

        assert_eq!(fs::read(out.join("boot0.fex")).unwrap().len(), 8000);
        assert_eq!(fs::read(out.join("sys_partition.fex")).unwrap().len(), 300);

        let config = Document::load(&out.join("image.cfg")).unwrap();
        assert_eq!(config.get_number_in("IMAGE_CFG", "pid"), Some(0x1234));
        assert_eq!(config.get_number_in("IMAGE_CFG", "vid"), Some(0x8087));
        assert_eq!(config.get_string_in("DIR_DEF", "INPUT_DIR"), Some("../"));
        assert_eq!(config.count_variables("FILELIST"), 2);

        fs::remove_dir_all(&out).unwrap();
        fs::remove_file(&img_path).unwrap();
    }

    #[test]
    fn test_unpack_unimg_layout() {
        let (image, img_path) = load_fixture("unpack-unimg.img");
        let out = temp_path("unpack-unimg-out");

        unpack_image(&image, &out, OutputFormat::Unimg, false).unwrap();

        let payload = fs::read(out.join("BOOT_BOOT0_00000000")).unwrap();
        assert_eq!(payload.len(), 8000);
        let header = fs::read(out.join("BOOT_BOOT0_00000000.hdr")).unwrap();
        assert_eq!(header.len(), 1024);
        assert_eq!(image.header_bytes(0).unwrap(), &header[..]);
        assert!(out.join("SYSTEM_sys_partition").exists());
        assert!(out.join("SYSTEM_sys_partition.hdr").exists());

        fs::remove_dir_all(&out).unwrap();
        fs::remove_file(&img_path).unwrap();
    }

    #[test]
    fn test_unpack_recreates_output_dir() {
        let (image, img_path) = load_fixture("unpack-clean.img");
        let out = temp_path("unpack-clean-out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.bin"), b"stale").unwrap();

        unpack_image(&image, &out, OutputFormat::Imgrepacker, false).unwrap();
        assert!(!out.join("stale.bin").exists());
        assert!(out.join("boot0.fex").exists());

        fs::remove_dir_all(&out).unwrap();
        fs::remove_file(&img_path).unwrap();
    }

    #[test]
    fn test_partition_extraction_path() {
        let (image, img_path) = load_fixture("part-op.img");

        let entry = image.file_by_filename("sys_partition.fex").unwrap();
        let table = PartitionTable::parse_bytes(&image.data(entry));
        assert_eq!(table.mbr_size, 20480);
        assert_eq!(table.partitions().len(), 1);
        let p = &table.partitions()[0];
        assert_eq!(p.name, "boot-resource");
        assert_eq!(p.size, 256);
        assert_eq!(p.user_type, 0x8000);
        assert_eq!(p.downloadfile, "boot-resource.fex");

        let dump = table.dump_to_string();
        assert!(dump.contains("boot-resource"));

        fs::remove_file(&img_path).unwrap();
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("unimg"), Some(OutputFormat::Unimg));
        assert_eq!(
            OutputFormat::parse("imgrepacker"),
            Some(OutputFormat::Imgrepacker)
        );
        assert_eq!(OutputFormat::parse("tarball"), None);
    }

    #[test]
    fn test_pack_is_a_stub() {
        let input = temp_path("pack-in");
        let output = temp_path("pack-out.img");
        pack_image(&input, &output, true).unwrap();
        assert!(!output.exists());
    }
}
