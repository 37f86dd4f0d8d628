/// LBR libraries
///
/// A CP/M library is a directory of 32-byte entries followed by members,
/// all measured in 128-byte records. The first entry describes the
/// directory itself. Squeezed members (`.?Q?`) are expanded on load.

use crate::buffer::Buffer;
use crate::codec::squeeze;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, DiskParameters};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;

/// Record size
pub const RECORD_SIZE: usize = 128;
/// Directory entry size
pub const ENTRY_SIZE: usize = 32;
/// Entry status: in use
pub const ACTIVE: u8 = 0x00;
/// Entry status: deleted
pub const DELETED: u8 = 0xFE;
/// Entry status: never used
pub const UNUSED: u8 = 0xFF;

/// An LBR directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbrEntry {
    /// First record of the member
    pub index: u16,
    /// Length in records
    pub length: u16,
    /// Stored CRC
    pub crc: u16,
    /// Unused bytes in the last record
    pub pad: u8,
    /// Member was squeezed; the file holds the expanded bytes
    pub squeezed: bool,
    /// Name as stored in the directory, when the expanded name differs
    pub stored_name: Option<String>,
}

fn word(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

fn member_name(entry: &[u8]) -> String {
    let part = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    };
    let name = part(&entry[1..9]);
    let ext = part(&entry[9..12]);
    if ext.is_empty() {
        name
    } else {
        format!("{}.{}", name, ext)
    }
}

/// CP/M date (days since 31 Dec 1977) and DOS-style time
pub fn cpm_date(days: u16, time: u16) -> Option<NaiveDateTime> {
    if days == 0 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(1977, 12, 31)? + Duration::days(days as i64);
    date.and_hms_opt(
        (time >> 11) as u32,
        ((time >> 5) & 0x3F) as u32,
        ((time & 0x1F) * 2) as u32,
    )
    .or_else(|| date.and_hms_opt(0, 0, 0))
}

/// Is the extension of the `?Q?` form?
fn is_squeezed_name(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.len() >= 2 && ext.as_bytes()[1] == b'Q')
}

/// Parse an LBR library
pub fn parse(name: &str, data: Buffer) -> Result<AppleFileSystem> {
    let mismatch = |reason: &str| FsError::mismatch(FileSystemType::Lbr, reason);
    let bytes = data.as_slice();
    if bytes.len() < RECORD_SIZE {
        return Err(mismatch("too short"));
    }
    if bytes[0] != ACTIVE || bytes[1..12].iter().any(|&b| b != b' ') {
        return Err(mismatch("no directory entry"));
    }
    if word(bytes, 12) != 0 {
        return Err(mismatch("directory does not start at record 0"));
    }
    let dir_records = word(bytes, 14) as usize;
    if dir_records == 0 || dir_records * RECORD_SIZE > bytes.len() {
        return Err(mismatch("directory length out of range"));
    }
    let total_records = bytes.len().div_ceil(RECORD_SIZE);

    let reader = BlockReader::new(name, data.clone(), DiskParameters::records())?;
    let mut fs = AppleFileSystem::new(name, FileSystemType::Lbr, reader);
    fs.set_catalog_blocks(dir_records);
    for record in 0..dir_records {
        fs.mark_fs_block(record, "DIRECTORY");
    }

    let directory = &bytes[..dir_records * RECORD_SIZE];
    for entry in directory.chunks(ENTRY_SIZE).skip(1) {
        match entry[0] {
            ACTIVE => {}
            DELETED => {
                fs.add_deleted(member_name(entry));
                continue;
            }
            _ => continue,
        }
        let member = member_name(entry);
        let detail = LbrEntry {
            index: word(entry, 12),
            length: word(entry, 14),
            crc: word(entry, 16),
            pad: entry[26],
            squeezed: false,
            stored_name: None,
        };
        let first = detail.index as usize;
        let count = detail.length as usize;
        if first < dir_records || first + count > total_records {
            fs.failed(
                member,
                &FsError::corrupt(
                    FileSystemType::Lbr,
                    format!("records {}..{} outside the library", first, first + count),
                ),
            );
            continue;
        }
        let file = build_member(&mut fs, member, entry, detail);
        fs.claim_blocks(&file);
        fs.add_file(file);
    }
    debug!("{}: LBR with {} members", name, fs.files().len());
    Ok(fs)
}

fn build_member(
    fs: &mut AppleFileSystem,
    name: String,
    entry: &[u8],
    mut detail: LbrEntry,
) -> AppleFile {
    let first = detail.index as usize;
    let count = detail.length as usize;
    let eof = (count * RECORD_SIZE).saturating_sub(detail.pad as usize);
    let blocks: Vec<Option<usize>> = (first..first + count).map(Some).collect();
    let mut file = AppleFile::new(fs.next_file_id(), name.as_str(), FileKind::File)
        .with_blocks(blocks, RECORD_SIZE);
    file.eof = eof;
    file.created = cpm_date(word(entry, 18), word(entry, 22));
    file.modified = cpm_date(word(entry, 20), word(entry, 24));

    let raw = file.file_buffer(fs.reader()).clone();
    if is_squeezed_name(&name) {
        if let Some((header, start)) = squeeze::parse_header(raw.as_slice()) {
            match squeeze::unsqueeze(&raw.as_slice()[start..], None) {
                Ok(expanded) => {
                    fs.claim_blocks(&file);
                    let sum = expanded.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
                    let mut unpacked =
                        AppleFile::new(file.id, header.file_name.as_str(), FileKind::File)
                            .with_bytes(Buffer::new(expanded));
                    unpacked.created = file.created;
                    unpacked.modified = file.modified;
                    if sum != header.checksum {
                        unpacked.anomaly(format!(
                            "checksum {:04X}, expected {:04X}",
                            sum, header.checksum
                        ));
                    }
                    detail.squeezed = true;
                    detail.stored_name = Some(name);
                    unpacked.detail = FileDetail::Lbr(detail);
                    return unpacked;
                }
                Err(err) => file.anomaly(format!("cannot unsqueeze: {}", err)),
            }
        }
    }
    file.detail = FileDetail::Lbr(detail);
    file
}

/// One line: name, records, index and squeeze state
pub fn catalog_line(file: &AppleFile) -> String {
    match &file.detail {
        FileDetail::Lbr(entry) => format!(
            "{:<12} {:>5} {:>5} {:>8} {}",
            file.name,
            entry.index,
            entry.length,
            file.file_length(),
            entry
                .stored_name
                .as_deref()
                .map_or_else(String::new, |stored| format!("(squeezed as {})", stored))
        ),
        _ => file.name.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn entry(name: &[u8; 11], index: u16, length: u16, pad: u8) -> Vec<u8> {
        let mut e = vec![0u8; ENTRY_SIZE];
        e[1..12].copy_from_slice(name);
        e[12..14].copy_from_slice(&index.to_le_bytes());
        e[14..16].copy_from_slice(&length.to_le_bytes());
        e[26] = pad;
        e
    }

    /// Library with one directory record and the given members
    pub(crate) fn library(members: &[(&[u8; 11], &[u8])]) -> Vec<u8> {
        let mut dir = entry(b"           ", 0, 1, 0);
        let mut data = Vec::new();
        let mut index = 1;
        for (name, contents) in members {
            let records = contents.len().div_ceil(RECORD_SIZE);
            let pad = (records * RECORD_SIZE - contents.len()) as u8;
            dir.extend(entry(name, index, records as u16, pad));
            let mut padded = contents.to_vec();
            padded.resize(records * RECORD_SIZE, 0x1A);
            data.extend(padded);
            index += records as u16;
        }
        dir.resize(RECORD_SIZE, UNUSED);
        dir.extend(data);
        dir
    }

    #[test]
    fn test_members() {
        let lib = library(&[(b"READ    ME ", b"hello"), (b"BIG     DAT", &[7u8; 300])]);
        let fs = parse("t.lbr", Buffer::new(lib)).unwrap();

        assert_eq!(fs.files().len(), 2);
        assert_eq!(fs.read_file("READ.ME").unwrap(), b"hello");
        let big = fs.find_file("BIG.DAT").unwrap();
        assert_eq!(big.data_blocks(), &[Some(2), Some(3), Some(4)]);
        assert_eq!(big.file_length(), 300);
    }

    #[test]
    fn test_squeezed_member() {
        // SQ header, name "ABA", a two-leaf tree and the bits for A B A EOF
        let mut sq = vec![0x76, 0xFF];
        sq.extend_from_slice(&(65u16 * 2 + 66).to_le_bytes());
        sq.extend_from_slice(b"ABA\0");
        sq.extend_from_slice(&2u16.to_le_bytes());
        for node in [-66i16, 1, -67, -257] {
            sq.extend_from_slice(&node.to_le_bytes());
        }
        sq.push(0b0011_0010);
        let lib = library(&[(b"ABA     TQT", &sq)]);
        let fs = parse("t.lbr", Buffer::new(lib)).unwrap();

        let file = fs.find_file("ABA").unwrap();
        assert_eq!(fs.read_file("ABA").unwrap(), b"ABA");
        assert!(file.anomalies.is_empty());
        match &file.detail {
            FileDetail::Lbr(entry) => {
                assert!(entry.squeezed);
                assert_eq!(entry.stored_name.as_deref(), Some("ABA.TQT"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_member_outside_library() {
        let mut lib = library(&[(b"A       TXT", b"x")]);
        lib[ENTRY_SIZE + 14] = 50;
        let fs = parse("t.lbr", Buffer::new(lib)).unwrap();
        assert!(fs.files().is_empty());
        assert_eq!(fs.failures().len(), 1);
    }

    #[test]
    fn test_not_lbr() {
        assert!(parse("t", Buffer::new(vec![0u8; 256]))
            .unwrap_err()
            .is_format_mismatch());
    }

    #[test]
    fn test_cpm_date() {
        let date = cpm_date(1, (10 << 11) | (30 << 5) | 5).unwrap();
        assert_eq!(date.to_string(), "1978-01-01 10:30:10");
        assert!(cpm_date(0, 0).is_none());
    }
}
