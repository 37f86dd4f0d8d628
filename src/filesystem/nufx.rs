/// NuFX (ShrinkIt) archives
///
/// A 48-byte master header is followed by records. Each record is a
/// CRC-protected header, a filename, 16-byte thread headers and then the
/// thread data in the same order.

use crate::buffer::Buffer;
use crate::codec::{crc16, CodecRegistry, ThreadFormat};
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind, ForkType};
use crate::filesystem::{insert_path, AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, DiskParameters};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, trace};

/// Master header magic ("NuFile" with alternating high bits)
pub const MASTER_MAGIC: [u8; 6] = [0x4E, 0xF5, 0x46, 0xE9, 0x6C, 0xE5];
/// Record header magic ("NuFX" with alternating high bits)
pub const RECORD_MAGIC: [u8; 4] = [0x4E, 0xF5, 0x46, 0xD8];
/// Size of the master header
pub const MASTER_SIZE: usize = 48;
/// Size of a thread header
pub const THREAD_SIZE: usize = 16;
/// Smallest attribute section a record can have
const MIN_ATTRIB_COUNT: usize = 58;

/// Thread class
pub const CLASS_MESSAGE: u16 = 0;
/// Thread class
pub const CLASS_CONTROL: u16 = 1;
/// Thread class
pub const CLASS_DATA: u16 = 2;
/// Thread class
pub const CLASS_FILENAME: u16 = 3;

/// Data thread kind
pub const KIND_DATA_FORK: u16 = 0;
/// Data thread kind
pub const KIND_DISK_IMAGE: u16 = 1;
/// Data thread kind
pub const KIND_RESOURCE_FORK: u16 = 2;
/// Message thread kind
pub const KIND_COMMENT: u16 = 1;

/// One thread header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHeader {
    /// Class (message, control, data, filename)
    pub class: u16,
    /// Compression format
    pub format: ThreadFormat,
    /// Kind within the class
    pub kind: u16,
    /// CRC of the expanded data (version 3 records)
    pub crc: u16,
    /// Expanded length
    pub eof: u32,
    /// Stored length
    pub compressed_eof: u32,
}

impl ThreadHeader {
    fn parse(data: &[u8]) -> Self {
        let word = |pos: usize| u16::from_le_bytes([data[pos], data[pos + 1]]);
        let long = |pos: usize| {
            u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
        };
        Self {
            class: word(0),
            format: ThreadFormat::from(word(2)),
            kind: word(4),
            crc: word(6),
            eof: long(8),
            compressed_eof: long(12),
        }
    }
}

/// A NuFX record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NufxEntry {
    /// Record version
    pub version: u16,
    /// Originating file system id (1 = ProDOS)
    pub file_sys_id: u16,
    /// Path separator
    pub separator: u8,
    /// ProDOS-style access flags
    pub access: u32,
    /// File type
    pub file_type: u32,
    /// Auxiliary type (block count for disk images)
    pub extra_type: u32,
    /// Storage type (block size for disk images)
    pub storage_type: u16,
    /// Record comment
    pub comment: Option<String>,
    /// Thread headers in record order
    pub threads: Vec<ThreadHeader>,
}

impl NufxEntry {
    /// Compression format of the first data thread
    pub fn data_format(&self) -> Option<ThreadFormat> {
        self.threads
            .iter()
            .find(|t| t.class == CLASS_DATA)
            .map(|t| t.format)
    }

    /// Sum of stored thread lengths
    pub fn compressed_size(&self) -> u64 {
        self.threads.iter().map(|t| t.compressed_eof as u64).sum()
    }
}

/// NuFX date: second, minute, hour, year, day, month, filler, weekday
pub fn nufx_date(data: &[u8]) -> Option<NaiveDateTime> {
    if data.iter().all(|&b| b == 0) {
        return None;
    }
    let year = data[3] as i32;
    let year = if year < 40 { 2000 + year } else { 1900 + year };
    NaiveDate::from_ymd_opt(year, data[5] as u32 + 1, data[4] as u32 + 1)?.and_hms_opt(
        data[2] as u32,
        data[1] as u32,
        data[0] as u32,
    )
}

fn word(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

fn long(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn corrupt(reason: impl Into<String>) -> FsError {
    FsError::corrupt(FileSystemType::Nufx, reason)
}

/// Does the buffer start with a NuFX master header?
pub fn is_nufx(data: &[u8]) -> bool {
    data.starts_with(&MASTER_MAGIC)
}

/// Parse a NuFX archive
pub fn parse(name: &str, data: Buffer, codecs: &CodecRegistry) -> Result<AppleFileSystem> {
    let bytes = data.as_slice();
    if !is_nufx(bytes) {
        return Err(FsError::mismatch(FileSystemType::Nufx, "no master header"));
    }
    if bytes.len() < MASTER_SIZE {
        return Err(corrupt("master header truncated"));
    }
    let stored = word(bytes, 6);
    let computed = crc16(0, &bytes[8..MASTER_SIZE]);
    if stored != computed {
        return Err(corrupt(format!(
            "master header CRC {:04X}, expected {:04X}",
            computed, stored
        )));
    }
    let total_records = long(bytes, 8) as usize;
    debug!("{}: NuFX archive with {} records", name, total_records);

    let mut records = Vec::with_capacity(total_records.min(4096));
    let mut pos = MASTER_SIZE;
    for index in 0..total_records {
        let (record, next) = read_record(bytes, pos)
            .map_err(|err| match err {
                FsError::Corruption { reason, .. } => {
                    corrupt(format!("record {}: {}", index, reason))
                }
                other => other,
            })?;
        records.push(record);
        pos = next;
    }

    let reader = BlockReader::new(name, data.clone(), DiskParameters::stream(data.len()))?;
    let mut fs = AppleFileSystem::new(name, FileSystemType::Nufx, reader);
    fs.set_catalog_blocks(1 + records.len());

    let mut tree = Vec::new();
    for record in records {
        build_record(&mut fs, &mut tree, record, codecs);
    }
    for file in tree {
        fs.add_file(file);
    }
    Ok(fs)
}

/// A record as laid out in the archive, before expansion
struct RawRecord<'a> {
    entry: NufxEntry,
    path: String,
    created: Option<NaiveDateTime>,
    modified: Option<NaiveDateTime>,
    thread_data: Vec<&'a [u8]>,
}

fn read_record(bytes: &[u8], start: usize) -> Result<(RawRecord<'_>, usize)> {
    let header = bytes
        .get(start..start + MIN_ATTRIB_COUNT)
        .ok_or_else(|| corrupt("record header truncated"))?;
    if header[..4] != RECORD_MAGIC {
        return Err(corrupt(format!("no record header at offset {}", start)));
    }
    let attrib_count = word(header, 6) as usize;
    if attrib_count < MIN_ATTRIB_COUNT {
        return Err(corrupt(format!("attribute section of {} bytes", attrib_count)));
    }
    let name_at = start + attrib_count;
    let name_length = bytes
        .get(name_at - 2..name_at)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| corrupt("record header truncated"))?;
    let total_threads = long(header, 10) as usize;
    let threads_at = name_at + name_length;
    let threads_end = threads_at + total_threads * THREAD_SIZE;
    if threads_end > bytes.len() {
        return Err(corrupt("thread headers truncated"));
    }

    let stored = word(header, 4);
    let computed = crc16(0, &bytes[start + 6..threads_end]);
    if stored != computed {
        return Err(corrupt(format!(
            "header CRC {:04X}, expected {:04X}",
            computed, stored
        )));
    }

    let header = &bytes[start..name_at];
    let threads: Vec<ThreadHeader> = bytes[threads_at..threads_end]
        .chunks(THREAD_SIZE)
        .map(ThreadHeader::parse)
        .collect();

    let mut thread_data = Vec::with_capacity(threads.len());
    let mut pos = threads_end;
    for thread in &threads {
        let end = pos + thread.compressed_eof as usize;
        let data = bytes
            .get(pos..end)
            .ok_or_else(|| corrupt("thread data truncated"))?;
        thread_data.push(data);
        pos = end;
    }

    let mut path = String::from_utf8_lossy(&bytes[name_at..threads_at]).to_string();
    for (thread, data) in threads.iter().zip(&thread_data) {
        if thread.class == CLASS_FILENAME {
            let length = (thread.eof as usize).min(data.len());
            path = String::from_utf8_lossy(&data[..length]).to_string();
        }
    }

    let entry = NufxEntry {
        version: word(header, 8),
        file_sys_id: word(header, 14),
        separator: header[16],
        access: long(header, 18),
        file_type: long(header, 22),
        extra_type: long(header, 26),
        storage_type: word(header, 30),
        comment: None,
        threads,
    };
    trace!("NuFX record {} with {} threads", path, entry.threads.len());

    Ok((
        RawRecord {
            entry,
            path,
            created: nufx_date(&header[32..40]),
            modified: nufx_date(&header[40..48]),
            thread_data,
        },
        pos,
    ))
}

/// Expand one thread, recording why it could not be read
fn expand(
    codecs: &CodecRegistry,
    thread: &ThreadHeader,
    data: &[u8],
    length: usize,
    anomalies: &mut Vec<String>,
) -> Option<Buffer> {
    match codecs.decompress(thread.format, data, length) {
        Ok(Some(bytes)) => Some(Buffer::new(bytes)),
        Ok(None) => {
            anomalies.push(format!("no codec for {}", thread.format));
            None
        }
        Err(err) => {
            anomalies.push(err.to_string());
            None
        }
    }
}

fn build_record(
    fs: &mut AppleFileSystem,
    tree: &mut Vec<AppleFile>,
    record: RawRecord<'_>,
    codecs: &CodecRegistry,
) {
    let RawRecord {
        mut entry,
        path,
        created,
        modified,
        thread_data,
    } = record;
    let separator = match entry.separator {
        0 => '/',
        sep => (sep & 0x7F) as char,
    };
    let parts: Vec<&str> = path.split(separator).filter(|p| !p.is_empty()).collect();
    let Some((leaf_name, folders)) = parts.split_last() else {
        fs.failed(path.clone(), &corrupt("record has no name"));
        return;
    };

    let mut anomalies = Vec::new();
    let mut data_fork = None;
    let mut resource_fork = None;
    let mut disk_image = None;
    let mut is_directory = false;

    for (thread, data) in entry.threads.clone().iter().zip(&thread_data) {
        match (thread.class, thread.kind) {
            (CLASS_MESSAGE, KIND_COMMENT) | (CLASS_MESSAGE, 0) => {
                let length = (thread.eof as usize).min(data.len());
                let text = String::from_utf8_lossy(&data[..length]).replace('\r', "\n");
                let text = text.trim_end_matches('\0').to_string();
                if !text.is_empty() {
                    entry.comment = Some(text);
                }
            }
            (CLASS_CONTROL, 0) => is_directory = true,
            (CLASS_DATA, KIND_DATA_FORK) => {
                data_fork = Some(expand(codecs, thread, data, thread.eof as usize, &mut anomalies));
            }
            (CLASS_DATA, KIND_RESOURCE_FORK) => {
                resource_fork =
                    Some(expand(codecs, thread, data, thread.eof as usize, &mut anomalies));
            }
            (CLASS_DATA, KIND_DISK_IMAGE) => {
                let length = match thread.eof {
                    0 => entry.extra_type as usize * entry.storage_type as usize,
                    eof => eof as usize,
                };
                disk_image = Some(expand(codecs, thread, data, length, &mut anomalies));
            }
            (CLASS_FILENAME, _) => {}
            (class, kind) => debug!("{}: ignoring thread {}/{}", path, class, kind),
        }
    }

    let mut file = if is_directory {
        AppleFile::new(fs.next_file_id(), *leaf_name, FileKind::Folder)
    } else if let Some(image) = disk_image {
        let file = AppleFile::new(fs.next_file_id(), *leaf_name, FileKind::Embedded);
        match image {
            Some(bytes) => file.with_bytes(bytes),
            None => file,
        }
    } else if let Some(resource) = resource_fork {
        let mut forked = AppleFile::new(fs.next_file_id(), *leaf_name, FileKind::Forked);
        for (fork, content) in [
            (ForkType::Data, data_fork.flatten()),
            (ForkType::Resource, resource),
        ] {
            let child = AppleFile::new(fs.next_file_id(), *leaf_name, FileKind::Fork(fork));
            forked.children.push(match content {
                Some(bytes) => child.with_bytes(bytes),
                None => child,
            });
        }
        forked.eof = forked.fork(ForkType::Data).map_or(0, |f| f.eof);
        forked
    } else {
        let file = AppleFile::new(fs.next_file_id(), *leaf_name, FileKind::File);
        match data_fork.flatten() {
            Some(bytes) => file.with_bytes(bytes),
            None => file,
        }
    };

    file.aux_type = entry.extra_type as u16;
    file.locked = entry.access & 0x02 == 0;
    file.created = created;
    file.modified = modified;
    for anomaly in anomalies {
        file.anomaly(anomaly);
    }
    file.detail = FileDetail::Nufx(entry);
    insert_path(fs, tree, folders, file);
}

/// One line in the style of a ShrinkIt listing
pub fn catalog_line(file: &AppleFile) -> String {
    let (format, compressed) = match &file.detail {
        FileDetail::Nufx(entry) => (
            entry
                .data_format()
                .map_or_else(|| "-".to_string(), |f| f.to_string()),
            entry.compressed_size(),
        ),
        _ => ("-".to_string(), 0),
    };
    let date = file
        .modified
        .map_or_else(|| "[No Date]".to_string(), |d| d.format("%d-%b-%y %H:%M").to_string());
    format!(
        "{}{:<27} {:<3}/{:04X} {:<15} {:<8} {:>8} {:>8}",
        if file.locked { '+' } else { ' ' },
        file.name,
        file.type_text(),
        file.aux_type,
        date,
        format,
        compressed,
        file.file_length()
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A thread to put in a test record
    pub(crate) struct TestThread<'a> {
        pub(crate) class: u16,
        pub(crate) format: u16,
        pub(crate) kind: u16,
        pub(crate) eof: u32,
        pub(crate) data: &'a [u8],
    }

    /// Stored data fork thread
    pub(crate) fn data_thread(data: &[u8]) -> TestThread<'_> {
        TestThread {
            class: CLASS_DATA,
            format: 0,
            kind: KIND_DATA_FORK,
            eof: data.len() as u32,
            data,
        }
    }

    /// Build one record with the given name and threads
    pub(crate) fn record(name: &str, file_type: u32, threads: &[TestThread<'_>]) -> Vec<u8> {
        let mut header = vec![0u8; MIN_ATTRIB_COUNT];
        header[..4].copy_from_slice(&RECORD_MAGIC);
        header[6..8].copy_from_slice(&(MIN_ATTRIB_COUNT as u16).to_le_bytes());
        header[8..10].copy_from_slice(&3u16.to_le_bytes());
        header[10..14].copy_from_slice(&(threads.len() as u32).to_le_bytes());
        header[14..16].copy_from_slice(&1u16.to_le_bytes());
        header[16] = b'/';
        header[18..22].copy_from_slice(&0xE3u32.to_le_bytes());
        header[22..26].copy_from_slice(&file_type.to_le_bytes());
        header[26..30].copy_from_slice(&0x2000u32.to_le_bytes());
        // 17-May-86 13:45:00
        header[40..46].copy_from_slice(&[0, 45, 13, 86, 16, 4]);
        header[56..58].copy_from_slice(&(name.len() as u16).to_le_bytes());
        header.extend_from_slice(name.as_bytes());
        for thread in threads {
            header.extend_from_slice(&thread.class.to_le_bytes());
            header.extend_from_slice(&thread.format.to_le_bytes());
            header.extend_from_slice(&thread.kind.to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes());
            header.extend_from_slice(&thread.eof.to_le_bytes());
            header.extend_from_slice(&(thread.data.len() as u32).to_le_bytes());
        }
        let crc = crc16(0, &header[6..]);
        header[4..6].copy_from_slice(&crc.to_le_bytes());
        for thread in threads {
            header.extend_from_slice(thread.data);
        }
        header
    }

    /// Wrap records in a master header
    pub(crate) fn archive(records: &[Vec<u8>]) -> Vec<u8> {
        let mut master = vec![0u8; MASTER_SIZE];
        master[..6].copy_from_slice(&MASTER_MAGIC);
        master[8..12].copy_from_slice(&(records.len() as u32).to_le_bytes());
        master[28..30].copy_from_slice(&2u16.to_le_bytes());
        let total: usize = MASTER_SIZE + records.iter().map(|r| r.len()).sum::<usize>();
        master[38..42].copy_from_slice(&(total as u32).to_le_bytes());
        let crc = crc16(0, &master[8..MASTER_SIZE]);
        master[6..8].copy_from_slice(&crc.to_le_bytes());
        for record in records {
            master.extend_from_slice(record);
        }
        master
    }

    fn parse_archive(data: Vec<u8>) -> Result<AppleFileSystem> {
        parse("test.shk", Buffer::new(data), &CodecRegistry::standard())
    }

    #[test]
    fn test_single_file() {
        let data = archive(&[record("HELLO", 0x04, &[data_thread(b"HELLO WORLD")])]);
        let fs = parse_archive(data).unwrap();

        assert_eq!(fs.total_catalog_blocks(), 2);
        let file = fs.find_file("HELLO").unwrap();
        assert_eq!(fs.read_file("HELLO").unwrap(), b"HELLO WORLD");
        assert_eq!(file.type_text(), "TXT");
        assert_eq!(file.aux_type, 0x2000);
        assert_eq!(
            file.modified.unwrap().format("%d-%b-%y %H:%M").to_string(),
            "17-May-86 13:45"
        );
    }

    #[test]
    fn test_paths_build_folders() {
        let data = archive(&[
            record("DOCS/A", 0x04, &[data_thread(b"a")]),
            record("DOCS/SUB/B", 0x04, &[data_thread(b"b")]),
            record("C", 0x06, &[data_thread(b"c")]),
        ]);
        let fs = parse_archive(data).unwrap();
        assert_eq!(fs.files().len(), 2);
        assert!(fs.find_file("DOCS").unwrap().is_folder());
        assert_eq!(fs.read_file("DOCS/SUB/B").unwrap(), b"b");
    }

    #[test]
    fn test_filename_thread_wins() {
        let name = TestThread {
            class: CLASS_FILENAME,
            format: 0,
            kind: 0,
            eof: 4,
            data: b"REAL\0\0\0\0",
        };
        let data = archive(&[record("OLD", 0x04, &[name, data_thread(b"x")])]);
        let fs = parse_archive(data).unwrap();
        assert!(fs.find_file("OLD").is_none());
        assert!(fs.find_file("REAL").is_some());
    }

    #[test]
    fn test_forked_record() {
        let resource = TestThread {
            class: CLASS_DATA,
            format: 0,
            kind: KIND_RESOURCE_FORK,
            eof: 3,
            data: b"RES",
        };
        let data = archive(&[record("APP", 0xB3, &[data_thread(b"DATA"), resource])]);
        let fs = parse_archive(data).unwrap();
        let file = fs.find_file("APP").unwrap();
        assert_eq!(file.kind, FileKind::Forked);
        assert_eq!(file.file_length(), 4);
        let resource = file.fork(ForkType::Resource).unwrap();
        assert_eq!(resource.file_buffer(fs.reader()).as_slice(), b"RES");
    }

    #[test]
    fn test_comment_and_unknown_format() {
        let comment = TestThread {
            class: CLASS_MESSAGE,
            format: 0,
            kind: KIND_COMMENT,
            eof: 5,
            data: b"Hi\rme\0\0\0",
        };
        let packed = TestThread {
            class: CLASS_DATA,
            format: 5,
            kind: KIND_DATA_FORK,
            eof: 100,
            data: b"\x1f\x9d\x90",
        };
        let data = archive(&[record("PACKED", 0x06, &[comment, packed])]);
        let fs = parse_archive(data).unwrap();
        let file = fs.find_file("PACKED").unwrap();
        match &file.detail {
            FileDetail::Nufx(entry) => assert_eq!(entry.comment.as_deref(), Some("Hi\nme")),
            other => panic!("unexpected detail {:?}", other),
        }
        assert_eq!(file.anomalies.len(), 1);
        assert_eq!(fs.read_file("PACKED").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_disk_image_thread() {
        let image = vec![0xAAu8; 1024];
        let disk = TestThread {
            class: CLASS_DATA,
            format: 0,
            kind: KIND_DISK_IMAGE,
            eof: 1024,
            data: &image,
        };
        let data = archive(&[record("DISK", 0, &[disk])]);
        let fs = parse_archive(data).unwrap();
        let file = fs.find_file("DISK").unwrap();
        assert_eq!(file.kind, FileKind::Embedded);
        assert_eq!(file.file_length(), 1024);
    }

    #[test]
    fn test_record_crc_mismatch_is_corruption() {
        let mut bad = record("BAD", 0x04, &[data_thread(b"x")]);
        bad[20] ^= 0xFF;
        let data = archive(&[record("GOOD", 0x04, &[data_thread(b"y")]), bad]);
        let err = parse_archive(data).unwrap_err();
        assert!(matches!(err, FsError::Corruption { .. }));
    }

    #[test]
    fn test_master_crc_mismatch_is_corruption() {
        let mut data = archive(&[]);
        data[12] = 1;
        assert!(matches!(
            parse_archive(data),
            Err(FsError::Corruption { .. })
        ));
    }

    #[test]
    fn test_not_nufx() {
        let err = parse_archive(vec![0u8; 100]).unwrap_err();
        assert!(err.is_format_mismatch());
    }
}
