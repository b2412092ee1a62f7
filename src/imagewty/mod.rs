mod include;

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use binrw::BinReaderExt;
use twofish::cipher::KeyInit;
use twofish::Twofish;

use crate::error::{Error, Result};
use crate::utils::rc6::Rc6;

pub use include::{
    FileHeader, FileHeaderBody, ImageHeader, ImageHeaderBody, FILE_HEADER_LEN, FORMAT_VERSION,
    HEADER_VERSION_V1, HEADER_VERSION_V3, IMAGEWTY_MAGIC, IMAGE_HEADER_LEN,
};

fn header_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[31] = b'i';
    key
}

fn file_headers_key() -> [u8; 32] {
    let mut key = [1u8; 32];
    key[31] = b'm';
    key
}

fn file_content_key() -> [u8; 32] {
    let mut key = [2u8; 32];
    key[31] = b'g';
    key
}

/// Twofish key for non-fex payloads in the stock packer: 5, 4, then each
/// byte is the wrapping sum of the previous two.
fn twofish_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[0] = 5;
    key[1] = 4;
    for i in 2..key.len() {
        key[i] = key[i - 1].wrapping_add(key[i - 2]);
    }
    key
}

struct Crypto {
    header: Rc6,
    file_headers: Rc6,
    file_content: Rc6,
    // Initialized like the stock tool does; nothing on the unpack path uses it.
    _twofish: Option<Twofish>,
}

impl Crypto {
    fn new() -> Self {
        Self {
            header: Rc6::new(&header_key()),
            file_headers: Rc6::new(&file_headers_key()),
            file_content: Rc6::new(&file_content_key()),
            _twofish: Twofish::new_from_slice(&twofish_key()).ok(),
        }
    }
}

/// One entry of the file index, with the fixed-width text fields cleaned.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub filename: String,
    pub maintype: String,
    pub subtype: String,
    pub stored_length: u32,
    pub original_length: u32,
    pub offset: u32,
}

/// A loaded IMAGEWTY image. The whole file is resident in `data`, decrypted
/// in place during load; the index refers into that buffer by offset.
pub struct Image {
    path: PathBuf,
    data: Vec<u8>,
    header: ImageHeader,
    encrypted: bool,
    headers: Vec<FileHeader>,
    files: Vec<FileEntry>,
    crypto: Crypto,
}

impl Image {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_verbose(path, false)
    }

    pub fn load_verbose(path: &Path, verbose: bool) -> Result<Self> {
        let mut data = fs::read(path)?;
        if data.is_empty() {
            return Err(Error::Format(format!(
                "{}: empty image file",
                path.display()
            )));
        }
        if data.len() < IMAGE_HEADER_LEN {
            return Err(Error::Format(format!(
                "image header truncated: {} bytes",
                data.len()
            )));
        }

        let crypto = Crypto::new();
        let encrypted = data[..8] != IMAGEWTY_MAGIC;
        if encrypted {
            crypto.header.decrypt_in_place(&mut data[..IMAGE_HEADER_LEN]);
        }

        let header: ImageHeader = Cursor::new(&data[..IMAGE_HEADER_LEN])
            .read_le()
            .map_err(|e| Error::Format(format!("bad image header: {e}")))?;
        if header.magic != IMAGEWTY_MAGIC {
            return Err(Error::Format("bad magic in image header".to_string()));
        }

        let num_files = header.num_files();
        if num_files == 0 {
            return Err(Error::Format("image contains no files".to_string()));
        }
        let table_end =
            IMAGE_HEADER_LEN as u64 + num_files as u64 * FILE_HEADER_LEN as u64;
        if table_end > data.len() as u64 {
            return Err(Error::Format(format!(
                "file header table overruns image ({num_files} files, {} bytes)",
                data.len()
            )));
        }
        let table_end = table_end as usize;

        if encrypted {
            crypto
                .file_headers
                .decrypt_in_place(&mut data[IMAGE_HEADER_LEN..table_end]);
        }

        let mut headers = Vec::with_capacity(num_files as usize);
        for i in 0..num_files as usize {
            let off = IMAGE_HEADER_LEN + i * FILE_HEADER_LEN;
            let file_header: FileHeader = Cursor::new(&data[off..off + FILE_HEADER_LEN])
                .read_le_args((header.header_version,))
                .map_err(|e| Error::Format(format!("bad file header {i}: {e}")))?;
            headers.push(file_header);
        }

        // Contents are stored back to back after the header table and
        // decrypted in that order, independent of the per-file offsets.
        let mut cursor = table_end;
        for (i, file_header) in headers.iter().enumerate() {
            let stored = file_header.stored_length() as usize;
            if cursor as u64 + stored as u64 > data.len() as u64 {
                return Err(Error::Format(format!(
                    "file {i} content overruns image"
                )));
            }
            if stored % 16 != 0 {
                return Err(Error::Crypto(format!(
                    "file {i}: stored length {stored} is not a multiple of 16"
                )));
            }
            if encrypted {
                crypto
                    .file_content
                    .decrypt_in_place(&mut data[cursor..cursor + stored]);
            }
            cursor += stored;
        }

        let mut files = Vec::with_capacity(headers.len());
        for (i, file_header) in headers.iter().enumerate() {
            let entry = FileEntry {
                filename: file_header.filename(),
                maintype: file_header.maintype(),
                subtype: file_header.subtype(),
                stored_length: file_header.stored_length(),
                original_length: file_header.original_length(),
                offset: file_header.offset(),
            };
            let start = entry.offset as u64;
            let end = start + entry.stored_length as u64;
            if start < table_end as u64 || end > data.len() as u64 {
                return Err(Error::Format(format!(
                    "file {i} payload out of range: offset {start}, length {}",
                    entry.stored_length
                )));
            }
            if entry.original_length > entry.stored_length {
                return Err(Error::Format(format!(
                    "file {i}: original length {} exceeds stored length {}",
                    entry.original_length, entry.stored_length
                )));
            }
            files.push(entry);
        }

        let mut ranges: Vec<(u64, u64)> = files
            .iter()
            .map(|f| (f.offset as u64, f.offset as u64 + f.stored_length as u64))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(Error::Format("overlapping file payloads".to_string()));
            }
        }

        if verbose {
            println!(
                "Successfully loaded image: {} (size: {} bytes)",
                path.display(),
                data.len()
            );
            println!("Found {} files in image", files.len());
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
            header,
            encrypted,
            headers,
            files,
            crypto,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn pid(&self) -> u32 {
        self.header.pid()
    }

    pub fn vid(&self) -> u32 {
        self.header.vid()
    }

    pub fn hardware_id(&self) -> u32 {
        self.header.hardware_id()
    }

    pub fn firmware_id(&self) -> u32 {
        self.header.firmware_id()
    }

    pub fn num_files(&self) -> u32 {
        self.files.len() as u32
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// First index entry whose cleaned filename matches exactly.
    pub fn file_by_filename(&self, filename: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// All index entries whose cleaned subtype matches exactly, header order.
    pub fn files_by_subtype(&self, subtype: &str) -> Vec<&FileEntry> {
        self.files.iter().filter(|f| f.subtype == subtype).collect()
    }

    /// Fresh copy of the payload, `original_length` bytes (padding excluded).
    pub fn data(&self, entry: &FileEntry) -> Vec<u8> {
        let start = entry.offset as usize;
        self.data[start..start + entry.original_length as usize].to_vec()
    }

    pub fn file_header(&self, index: usize) -> Option<&FileHeader> {
        self.headers.get(index)
    }

    /// Copy of the parsed header for the first file with that filename.
    pub fn file_header_by_filename(&self, filename: &str) -> Option<FileHeader> {
        self.files
            .iter()
            .position(|f| f.filename == filename)
            .and_then(|i| self.headers.get(i))
            .cloned()
    }

    /// Raw (decrypted) bytes of the on-disk file header block.
    pub fn header_bytes(&self, index: usize) -> Option<&[u8]> {
        if index >= self.headers.len() {
            return None;
        }
        let off = IMAGE_HEADER_LEN + index * FILE_HEADER_LEN;
        Some(&self.data[off..off + FILE_HEADER_LEN])
    }

    /// Writes a decrypted copy of the source file. The resident buffer was
    /// decrypted in place during load, so the encrypted bytes are re-read
    /// from the original path.
    pub fn write_decrypted(&self, output: &Path, verbose: bool) -> Result<()> {
        let mut data = fs::read(&self.path)?;
        if data.len() < self.data.len() {
            return Err(Error::Format(format!(
                "{}: image shrank on disk since load",
                self.path.display()
            )));
        }

        if self.encrypted {
            self.crypto
                .header
                .decrypt_in_place(&mut data[..IMAGE_HEADER_LEN]);
            let table_end = IMAGE_HEADER_LEN + self.headers.len() * FILE_HEADER_LEN;
            self.crypto
                .file_headers
                .decrypt_in_place(&mut data[IMAGE_HEADER_LEN..table_end]);

            let mut cursor = table_end;
            for (entry, file_header) in self.files.iter().zip(&self.headers) {
                let stored = file_header.stored_length() as usize;
                if verbose {
                    println!(
                        "Found: {} ({}, {})",
                        entry.filename,
                        file_header.original_length(),
                        stored
                    );
                }
                self.crypto
                    .file_content
                    .decrypt_in_place(&mut data[cursor..cursor + stored]);
                cursor += stored;
            }
        }

        fs::write(output, &data)?;
        if verbose {
            println!("Successfully decrypted image to {}", output.display());
        }
        Ok(())
    }
}
