/// GZIP streams
///
/// A gzip stream holds one member; its name comes from the header or,
/// failing that, from the archive name without `.gz`.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, DiskParameters};
use flate2::read::GzDecoder;
use log::debug;
use std::io::Read;

/// GZIP magic
pub const MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Does the buffer start with the gzip magic?
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&MAGIC)
}

fn member_name(archive: &str) -> String {
    let base = archive.rsplit(['/', '\\']).next().unwrap_or(archive);
    let lower = base.to_ascii_lowercase();
    if lower.ends_with(".gz") {
        base[..base.len() - 3].to_string()
    } else {
        base.to_string()
    }
}

/// Parse a gzip stream
pub fn parse(name: &str, data: Buffer) -> Result<AppleFileSystem> {
    if !is_gzip(data.as_slice()) {
        return Err(FsError::mismatch(FileSystemType::Gzip, "no gzip magic"));
    }
    let mut decoder = GzDecoder::new(data.as_slice());
    let mut contents = Vec::new();
    let expanded = decoder.read_to_end(&mut contents);

    let (stored_name, modified) = match decoder.header() {
        Some(header) => (
            header
                .filename()
                .map(|n| String::from_utf8_lossy(n).to_string()),
            match header.mtime() {
                0 => None,
                secs => chrono::DateTime::from_timestamp(secs as i64, 0).map(|d| d.naive_utc()),
            },
        ),
        None => {
            return Err(FsError::corrupt(FileSystemType::Gzip, "unreadable header"));
        }
    };

    let reader = BlockReader::new(name, data.clone(), DiskParameters::stream(data.len()))?;
    let mut fs = AppleFileSystem::new(name, FileSystemType::Gzip, reader);
    fs.set_catalog_blocks(1);

    let member = stored_name.unwrap_or_else(|| member_name(name));
    let file = AppleFile::new(fs.next_file_id(), member, FileKind::File);
    let mut file = match expanded {
        Ok(_) => file.with_bytes(Buffer::new(contents)),
        Err(err) => {
            let mut file = file;
            file.anomaly(format!("cannot expand: {}", err));
            file
        }
    };
    file.modified = modified;
    file.detail = FileDetail::Archive {
        compressed_size: data.len() as u64,
        method: "Deflate".to_string(),
    };
    debug!("{}: gzip member {} ({} bytes)", name, file.name, file.eof);
    fs.add_file(file);
    Ok(fs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    #[test]
    fn test_named_member() {
        let mut encoder = GzBuilder::new()
            .filename("GAME.PO")
            .write(Vec::new(), Compression::default());
        encoder.write_all(&[0x42; 1000]).unwrap();
        let data = encoder.finish().unwrap();

        let fs = parse("x.gz", Buffer::new(data)).unwrap();
        assert_eq!(fs.files().len(), 1);
        assert_eq!(fs.read_file("GAME.PO").unwrap(), vec![0x42; 1000]);
    }

    #[test]
    fn test_name_from_archive() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"abc").unwrap();
        let data = encoder.finish().unwrap();

        let fs = parse("dir/Disk.DSK.gz", Buffer::new(data)).unwrap();
        assert_eq!(fs.files()[0].name, "Disk.DSK");
    }

    #[test]
    fn test_truncated_stream_is_an_anomaly() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[7u8; 5000]).unwrap();
        let mut data = encoder.finish().unwrap();
        data.truncate(data.len() / 2);

        let fs = parse("t.gz", Buffer::new(data)).unwrap();
        assert_eq!(fs.files()[0].anomalies.len(), 1);
    }

    #[test]
    fn test_not_gzip() {
        assert!(parse("t", Buffer::new(b"plain".to_vec()))
            .unwrap_err()
            .is_format_mismatch());
    }
}
