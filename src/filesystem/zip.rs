/// ZIP archives
///
/// Members are expanded on load. Paths with `/` build a folder tree.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{insert_path, AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, DiskParameters};
use log::debug;
use std::io::{Cursor, Read};

/// Local file header signature
pub const LOCAL_MAGIC: [u8; 4] = *b"PK\x03\x04";
/// End of central directory signature (an empty archive)
pub const END_MAGIC: [u8; 4] = *b"PK\x05\x06";

/// Does the buffer look like a ZIP archive?
pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(&LOCAL_MAGIC) || data.starts_with(&END_MAGIC)
}

/// Parse a ZIP archive
pub fn parse(name: &str, data: Buffer) -> Result<AppleFileSystem> {
    if !is_zip(data.as_slice()) {
        return Err(FsError::mismatch(FileSystemType::Zip, "no PK signature"));
    }
    let mut archive = ::zip::ZipArchive::new(Cursor::new(data.as_slice()))
        .map_err(|e| FsError::corrupt(FileSystemType::Zip, e.to_string()))?;
    debug!("{}: ZIP archive with {} entries", name, archive.len());

    let reader = BlockReader::new(name, data.clone(), DiskParameters::stream(data.len()))?;
    let mut fs = AppleFileSystem::new(name, FileSystemType::Zip, reader);
    fs.set_catalog_blocks(1 + archive.len());

    let mut tree = Vec::new();
    for index in 0..archive.len() {
        let mut member = match archive.by_index(index) {
            Ok(member) => member,
            Err(err) => {
                fs.failed(
                    format!("entry {}", index),
                    &FsError::corrupt(FileSystemType::Zip, err.to_string()),
                );
                continue;
            }
        };
        let path = member.name().to_string();
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((leaf, folders)) = parts.split_last() else {
            continue;
        };

        let mut file = if member.is_dir() {
            AppleFile::new(fs.next_file_id(), *leaf, FileKind::Folder)
        } else {
            let mut contents = Vec::with_capacity(member.size() as usize);
            let file = AppleFile::new(fs.next_file_id(), *leaf, FileKind::File);
            match member.read_to_end(&mut contents) {
                Ok(_) => file.with_bytes(Buffer::new(contents)),
                Err(err) => {
                    let mut file = file;
                    file.anomaly(format!("cannot expand: {}", err));
                    file
                }
            }
        };
        file.detail = FileDetail::Archive {
            compressed_size: member.compressed_size(),
            method: format!("{:?}", member.compression()),
        };
        insert_path(&mut fs, &mut tree, folders, file);
    }

    for file in tree {
        fs.add_file(file);
    }
    Ok(fs)
}

/// One line: name, method, stored and expanded sizes
pub fn catalog_line(file: &AppleFile) -> String {
    match &file.detail {
        FileDetail::Archive {
            compressed_size,
            method,
        } => format!(
            "{:<30} {:<10} {:>8} {:>8}",
            file.name,
            method,
            compressed_size,
            file.file_length()
        ),
        _ => file.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use ::zip::write::SimpleFileOptions;

    fn build(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, data) in members {
            if path.ends_with('/') {
                writer.add_directory(*path, SimpleFileOptions::default()).unwrap();
            } else {
                writer
                    .start_file(*path, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_members_and_folders() {
        let data = build(&[
            ("DISKS/", b""),
            ("DISKS/GAME.DSK", b"not really a disk"),
            ("README.TXT", b"hello"),
        ]);
        let fs = parse("t.zip", Buffer::new(data)).unwrap();

        assert_eq!(fs.files().len(), 2);
        assert!(fs.find_file("DISKS").unwrap().is_folder());
        assert_eq!(fs.read_file("DISKS/GAME.DSK").unwrap(), b"not really a disk");
        assert_eq!(fs.read_file("README.TXT").unwrap(), b"hello");
        assert_eq!(fs.total_catalog_blocks(), 4);
    }

    #[test]
    fn test_not_zip() {
        assert!(parse("t", Buffer::new(vec![0u8; 64]))
            .unwrap_err()
            .is_format_mismatch());
    }

    #[test]
    fn test_damaged_zip() {
        let mut data = build(&[("A", b"a")]);
        let len = data.len();
        data.truncate(len - 10);
        assert!(matches!(
            parse("t", Buffer::new(data)),
            Err(FsError::Corruption { .. })
        ));
    }
}
