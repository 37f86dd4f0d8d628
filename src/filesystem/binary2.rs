/// Binary II archives
///
/// Each file is a 128-byte header followed by its data padded to a
/// multiple of 128 bytes. The last header byte counts the files that follow.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::prodos::{self, prodos_date};
use crate::filesystem::{insert_path, AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, DiskParameters};
use log::debug;

/// Header and data block size
pub const BLOCK_SIZE: usize = 128;
/// Header signature
pub const SIGNATURE: [u8; 3] = [0x0A, 0x47, 0x4C];
/// Offset of the id byte
const ID_OFFSET: usize = 18;
/// Value of the id byte
const ID_BYTE: u8 = 0x02;

/// A Binary II header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary2Entry {
    /// ProDOS access byte
    pub access: u8,
    /// ProDOS file type
    pub file_type: u8,
    /// ProDOS storage type
    pub storage_type: u8,
    /// Size in 512-byte blocks
    pub blocks: u16,
    /// Length of the file
    pub eof: u32,
    /// Files after this one
    pub files_to_follow: u8,
    /// Header block in the archive
    pub header_block: usize,
}

/// Is this a Binary II header?
pub fn is_header(data: &[u8]) -> bool {
    data.len() >= BLOCK_SIZE && data.starts_with(&SIGNATURE) && data[ID_OFFSET] == ID_BYTE
}

/// Parse a Binary II archive
pub fn parse(name: &str, data: Buffer) -> Result<AppleFileSystem> {
    if !is_header(data.as_slice()) {
        return Err(FsError::mismatch(FileSystemType::Binary2, "no Binary II header"));
    }
    let reader = BlockReader::new(name, data, DiskParameters::records())?;
    let mut fs = AppleFileSystem::new(name, FileSystemType::Binary2, reader);

    let mut tree = Vec::new();
    let mut header_block = 0;
    let mut headers = 0;
    loop {
        let header = fs.reader().read(header_block);
        if !is_header(&header) {
            fs.anomaly(format!("expected a header at block {}", header_block));
            break;
        }
        headers += 1;
        fs.mark_fs_block(header_block, "HEADER");

        let entry = Binary2Entry {
            access: header[3],
            file_type: header[4],
            storage_type: header[7],
            blocks: u16::from_le_bytes([header[8], header[9]]),
            eof: u32::from_le_bytes([header[20], header[21], header[22], 0]),
            files_to_follow: header[127],
            header_block,
        };
        let name_length = (header[23] as usize).min(64);
        let path = String::from_utf8_lossy(&header[24..24 + name_length]).to_string();
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let word = |pos: usize| u16::from_le_bytes([header[pos], header[pos + 1]]);

        let data_blocks = (entry.eof as usize).div_ceil(BLOCK_SIZE);
        let is_folder = entry.storage_type == prodos::SUBDIRECTORY || entry.file_type == 0x0F;
        match parts.split_last() {
            Some((leaf, folders)) => {
                let mut file = if is_folder {
                    AppleFile::new(fs.next_file_id(), *leaf, FileKind::Folder)
                } else {
                    let blocks = (header_block + 1..header_block + 1 + data_blocks)
                        .map(Some)
                        .collect();
                    let mut file = AppleFile::new(fs.next_file_id(), *leaf, FileKind::File)
                        .with_blocks(blocks, BLOCK_SIZE);
                    file.eof = entry.eof as usize;
                    if !fs.reader().is_valid_block(header_block + data_blocks) && data_blocks > 0 {
                        file.anomaly("data runs past the end of the archive");
                    }
                    file
                };
                file.aux_type = word(5);
                file.locked = entry.access & 0x02 == 0;
                file.modified = prodos_date(word(10), word(12));
                file.created = prodos_date(word(14), word(16));
                fs.claim_blocks(&file);
                file.detail = FileDetail::Binary2(entry.clone());
                insert_path(&mut fs, &mut tree, folders, file);
            }
            None => fs.failed(
                format!("header {}", header_block),
                &FsError::corrupt(FileSystemType::Binary2, "empty file name"),
            ),
        }

        if entry.files_to_follow == 0 {
            break;
        }
        let next = header_block + 1 + if is_folder { 0 } else { data_blocks };
        if !fs.reader().is_valid_block(next) {
            fs.anomaly(format!("{} more files announced but archive ends", entry.files_to_follow));
            break;
        }
        header_block = next;
    }
    debug!("{}: Binary II archive with {} headers", name, headers);

    fs.set_catalog_blocks(headers);
    for file in tree {
        fs.add_file(file);
    }
    Ok(fs)
}

/// One line: name, type, aux type, blocks and length
pub fn catalog_line(file: &AppleFile) -> String {
    let blocks = match &file.detail {
        FileDetail::Binary2(entry) => entry.blocks,
        _ => 0,
    };
    format!(
        "{}{:<15} {:<3} ${:04X} {:>6} {:>8}",
        if file.locked { '*' } else { ' ' },
        file.name,
        file.type_text(),
        file.aux_type,
        blocks,
        file.file_length()
    )
}
