/// Integration tests for applefs

use applefs::codec::crc16;
use applefs::filesystem::{cpm, nufx, pascal};
use applefs::*;
use proptest::prelude::*;

const DISK_140K: usize = 35 * 16 * 256;

/// DOS 3.3 disk in DOS order with HELLO, a 16-byte Applesoft program
fn dos_disk() -> Vec<u8> {
    let mut disk = vec![0u8; DISK_140K];
    let ts = |track: usize, sector: usize| (track * 16 + sector) * 256;

    let vtoc = ts(17, 0);
    disk[vtoc + 0x01] = 17;
    disk[vtoc + 0x02] = 15;
    disk[vtoc + 0x03] = 3;
    disk[vtoc + 0x06] = 254;
    disk[vtoc + 0x27] = 122;
    disk[vtoc + 0x34] = 35;
    disk[vtoc + 0x35] = 16;
    disk[vtoc + 0x37] = 1;
    for track in (1..35).filter(|&t| t != 17 && t != 18) {
        disk[vtoc + 0x38 + track * 4] = 0xFF;
        disk[vtoc + 0x38 + track * 4 + 1] = 0xFF;
    }
    for sector in (2..=15).rev() {
        disk[ts(17, sector) + 0x01] = 17;
        disk[ts(17, sector) + 0x02] = (sector - 1) as u8;
    }

    // Catalog entry: TS list at T18/S0, Applesoft, 2 sectors
    let entry = ts(17, 15) + 0x0B;
    disk[entry] = 18;
    disk[entry + 1] = 0;
    disk[entry + 2] = 0x02;
    for (i, b) in format!("{:<30}", "HELLO").bytes().enumerate() {
        disk[entry + 3 + i] = b | 0x80;
    }
    disk[entry + 0x21] = 2;

    // TS list points at T18/S1
    disk[ts(18, 0) + 0x0C] = 18;
    disk[ts(18, 0) + 0x0D] = 1;

    // 10 PRINT "HELLO", preceded by its length word
    let program: [u8; 16] = [
        0x0E, 0x08, 0x0A, 0x00, 0xBA, b'"', b'H', b'E', b'L', b'L', b'O', b'"', 0x00, 0x00,
        0x00, 0x00,
    ];
    let data = ts(18, 1);
    disk[data..data + 2].copy_from_slice(&16u16.to_le_bytes());
    disk[data + 2..data + 18].copy_from_slice(&program);
    disk
}

/// ProDOS volume "TEST" in block order with a seedling README at block 50
fn prodos_volume() -> Vec<u8> {
    let mut disk = vec![0u8; 280 * 512];
    let dir = 2 * 512 + 4;
    disk[dir] = 0xF4;
    disk[dir + 1..dir + 5].copy_from_slice(b"TEST");
    disk[dir + 0x1F] = 0x27;
    disk[dir + 0x20] = 0x0D;
    disk[dir + 0x21] = 1;
    disk[dir + 0x23] = 6;
    disk[dir + 0x25..dir + 0x27].copy_from_slice(&280u16.to_le_bytes());
    for block in 7..280 {
        if block != 50 {
            disk[6 * 512 + block / 8] |= 0x80 >> (block % 8);
        }
    }

    let at = dir + 0x27;
    disk[at] = 0x16;
    disk[at + 1..at + 7].copy_from_slice(b"README");
    disk[at + 0x10] = 0x04;
    disk[at + 0x11..at + 0x13].copy_from_slice(&50u16.to_le_bytes());
    disk[at + 0x13..at + 0x15].copy_from_slice(&1u16.to_le_bytes());
    disk[at + 0x15..at + 0x18].copy_from_slice(&[100, 0, 0]);
    disk[at + 0x1E] = 0xE3;
    disk[at + 0x25..at + 0x27].copy_from_slice(&2u16.to_le_bytes());

    for (i, byte) in disk[50 * 512..50 * 512 + 100].iter_mut().enumerate() {
        *byte = b'A' + (i % 26) as u8;
    }
    disk
}

/// The ProDOS volume plus SPARSE, a sapling over blocks [61, -, 63] with a
/// fourth block past the last pointer still inside its EOF
fn sparse_prodos_volume() -> Vec<u8> {
    let mut disk = prodos_volume();
    let dir = 2 * 512 + 4;
    disk[dir + 0x21] = 2;
    for block in [60, 61, 63] {
        disk[6 * 512 + block / 8] &= !(0x80 >> (block % 8));
    }

    let at = dir + 2 * 0x27;
    disk[at] = 0x26;
    disk[at + 1..at + 7].copy_from_slice(b"SPARSE");
    disk[at + 0x10] = 0x06;
    disk[at + 0x11..at + 0x13].copy_from_slice(&60u16.to_le_bytes());
    disk[at + 0x13..at + 0x15].copy_from_slice(&3u16.to_le_bytes());
    disk[at + 0x15..at + 0x18].copy_from_slice(&[0, 8, 0]);
    disk[at + 0x1E] = 0xE3;
    disk[at + 0x25..at + 0x27].copy_from_slice(&2u16.to_le_bytes());

    disk[60 * 512] = 61;
    disk[60 * 512 + 2] = 63;
    disk[61 * 512] = 0x11;
    disk[63 * 512] = 0x33;
    disk
}

/// Pascal volume "WORK" with NOTES.TEXT at blocks 10..12, 50 bytes in the last block
fn pascal_volume() -> Vec<u8> {
    let mut disk = vec![0u8; 280 * 512];
    let cat = 2 * 512;
    disk[cat + 2..cat + 4].copy_from_slice(&6u16.to_le_bytes());
    disk[cat + 6] = 4;
    disk[cat + 7..cat + 11].copy_from_slice(b"WORK");
    disk[cat + 14..cat + 16].copy_from_slice(&280u16.to_le_bytes());
    disk[cat + 16..cat + 18].copy_from_slice(&1u16.to_le_bytes());

    let at = cat + 26;
    disk[at..at + 2].copy_from_slice(&10u16.to_le_bytes());
    disk[at + 2..at + 4].copy_from_slice(&12u16.to_le_bytes());
    disk[at + 4] = 3;
    disk[at + 6] = 10;
    disk[at + 7..at + 17].copy_from_slice(b"NOTES.TEXT");
    disk[at + 22..at + 24].copy_from_slice(&50u16.to_le_bytes());
    disk
}

/// Write one CP/M extent through a reader so the CP/M interleave applies
fn add_cpm_extent(
    disk: Vec<u8>,
    slot: usize,
    name: &[u8; 11],
    extent: u8,
    records: u8,
    allocation: &[u8],
) -> Vec<u8> {
    let mut reader = BlockReader::new("t", Buffer::new(disk), DiskParameters::cpm()).unwrap();
    let block_no = 12 + slot * 32 / 1024;
    let at = slot * 32 % 1024;
    let block = reader.buffer_mut(block_no).unwrap();
    block[at] = 0;
    block[at + 1..at + 12].copy_from_slice(name);
    block[at + 12] = extent;
    block[at + 13..at + 16].copy_from_slice(&[0, 0, records]);
    block[at + 16..at + 32].fill(0);
    block[at + 16..at + 16 + allocation.len()].copy_from_slice(allocation);
    reader.mark_dirty(block_no);
    reader.flush();
    reader.into_disk().to_vec()
}

/// A NuFX archive holding one stored record
fn nufx_archive(name: &str, data: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; 58];
    record[..4].copy_from_slice(&[0x4E, 0xF5, 0x46, 0xD8]);
    record[6..8].copy_from_slice(&58u16.to_le_bytes());
    record[8..10].copy_from_slice(&3u16.to_le_bytes());
    record[10..14].copy_from_slice(&1u32.to_le_bytes());
    record[14..16].copy_from_slice(&1u16.to_le_bytes());
    record[16] = b'/';
    record[22..26].copy_from_slice(&0x04u32.to_le_bytes());
    record[56..58].copy_from_slice(&(name.len() as u16).to_le_bytes());
    record.extend_from_slice(name.as_bytes());
    // Data thread: class 2, stored, data fork
    record.extend_from_slice(&2u16.to_le_bytes());
    record.extend_from_slice(&0u16.to_le_bytes());
    record.extend_from_slice(&0u16.to_le_bytes());
    record.extend_from_slice(&0u16.to_le_bytes());
    record.extend_from_slice(&(data.len() as u32).to_le_bytes());
    record.extend_from_slice(&(data.len() as u32).to_le_bytes());
    let crc = crc16(0, &record[6..]);
    record[4..6].copy_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(data);

    let mut master = vec![0u8; 48];
    master[..6].copy_from_slice(&[0x4E, 0xF5, 0x46, 0xE9, 0x6C, 0xE5]);
    master[8..12].copy_from_slice(&1u32.to_le_bytes());
    master[28..30].copy_from_slice(&2u16.to_le_bytes());
    master[38..42].copy_from_slice(&((48 + record.len()) as u32).to_le_bytes());
    let crc = crc16(0, &master[8..48]);
    master[6..8].copy_from_slice(&crc.to_le_bytes());
    master.extend_from_slice(&record);
    master
}

/// Check the buffer lengths of every block-backed file, returning how many were seen
fn check_buffer_lengths(fs: &AppleFileSystem) -> usize {
    let mut checked = 0;
    fs.walk(&mut |file, _| {
        if let FileContent::Blocks(blocks) = &file.content {
            let raw = file.raw_file_buffer(fs.reader());
            assert_eq!(
                raw.len(),
                (blocks.len() + file.trailing_gaps) * file.block_size,
                "{}",
                file.name
            );
            assert!(file.file_buffer(fs.reader()).len() <= raw.len(), "{}", file.name);
            checked += 1;
        }
    });
    checked
}

fn detect_one(name: &str, data: &[u8]) -> AppleFileSystem {
    let results = FormatDetector::new().detect(name, data);
    detect::resolve(results).expect("a file system")
}

#[test]
fn test_dos_applesoft_program() {
    let fs = detect_one("hello.dsk", &dos_disk());
    assert_eq!(fs.fs_type(), FileSystemType::Dos);
    assert_eq!(fs.volume_name(), Some("DISK VOLUME 254"));

    let file = fs.find_file("hello").expect("HELLO");
    assert_eq!(file.file_length(), 16);
    assert!(applesoft::is_applesoft(file));

    let listing = applesoft::list_file(&fs, file).unwrap().unwrap();
    assert_eq!(listing, "10 PRINT \"HELLO\"\n");
}

#[test]
fn test_prodos_seedling() {
    let fs = detect_one("test.po", &prodos_volume());
    assert_eq!(fs.fs_type(), FileSystemType::Prodos);
    assert_eq!(fs.volume_name(), Some("TEST"));

    let file = fs.find_file("README").unwrap();
    assert_eq!(file.data_blocks(), &[Some(50)]);
    assert_eq!(file.file_length(), 100);

    let data = fs.read_file("README").unwrap();
    assert_eq!(data.len(), 100);
    assert_eq!(&data[..3], b"ABC");
    assert_eq!(fs.reader().block_type(50), BlockType::FileData);

    let info = fs.info();
    assert_eq!(info.total_blocks, 280);
    assert_eq!(info.free_blocks, 272);
}

#[test]
fn test_pascal_file_length() {
    let fs = pascal::parse(
        "work.po",
        Buffer::new(pascal_volume()),
        DiskParameters::prodos(0),
    )
    .unwrap();
    let file = fs.find_file("NOTES.TEXT").unwrap();
    assert_eq!(file.data_blocks(), &[Some(10), Some(11)]);
    assert_eq!(file.file_length(), 512 + 50);
    assert_eq!(fs.read_file("NOTES.TEXT").unwrap().len(), 562);
}

#[test]
fn test_buffers_cover_every_block() {
    let dos = detect_one("hello.dsk", &dos_disk());
    let prodos = detect_one("sparse.po", &sparse_prodos_volume());
    let pascal = pascal::parse(
        "work.po",
        Buffer::new(pascal_volume()),
        DiskParameters::prodos(0),
    )
    .unwrap();
    for fs in [&dos, &prodos, &pascal] {
        assert!(check_buffer_lengths(fs) > 0, "{}", fs.fs_type());
    }

    let sparse = prodos.find_file("SPARSE").unwrap();
    assert_eq!(sparse.data_blocks(), &[Some(61), None, Some(63)]);
    assert_eq!(sparse.file_gaps(), 2);
    assert!(sparse.anomalies.is_empty(), "{:?}", sparse.anomalies);
    let data = prodos.read_file("SPARSE").unwrap();
    assert_eq!(data.len(), 2048);
    assert_eq!((data[0], data[512], data[1024], data[1536]), (0x11, 0, 0x33, 0));
    assert_eq!(prodos.free_blocks(), 269);
}

#[test]
fn test_cpm_extents_merge() {
    let mut disk = vec![0u8; DISK_140K];
    disk[3 * 4096..4 * 4096].fill(0xE5);
    let disk = add_cpm_extent(disk, 0, b"FOO     TXT", 1, 8, &[4, 5]);
    let disk = add_cpm_extent(disk, 1, b"FOO     TXT", 0, 16, &[2, 3]);

    let fs = cpm::parse("cpm.dsk", Buffer::new(disk), DiskParameters::cpm()).unwrap();
    assert_eq!(fs.files().len(), 1);
    let file = fs.find_file("FOO.TXT").unwrap();
    assert_eq!(file.data_blocks(), &[Some(14), Some(15), Some(16), Some(17)]);
    assert_eq!(file.file_length(), 24 * 128);
    assert!(file.anomalies.is_empty());
}

#[test]
fn test_nufx_archive() {
    let fs = detect_one("hello.shk", &nufx_archive("HELLO", b"HELLO WORLD"));
    assert_eq!(fs.fs_type(), FileSystemType::Nufx);
    assert_eq!(fs.read_file("HELLO").unwrap(), b"HELLO WORLD");
}

#[test]
fn test_nufx_crc_mismatch() {
    let mut data = nufx_archive("HELLO", b"HELLO WORLD");
    // Corrupt the record's file type, inside the CRC-covered header
    data[48 + 22] ^= 0xFF;
    let err = nufx::parse("bad.shk", Buffer::new(data.clone()), &CodecRegistry::standard())
        .unwrap_err();
    assert!(matches!(err, FsError::Corruption { .. }));
    assert!(!err.is_format_mismatch());

    assert!(FormatDetector::new().detect("bad.shk", &data).is_empty());
}

#[test]
fn test_noise_detects_nothing() {
    let noise: Vec<u8> = (0..DISK_140K).map(|i| (i * 7 + 13) as u8).collect();
    let results = FormatDetector::new().detect("noise.bin", &noise);
    assert!(results.is_empty());
    assert!(detect::resolve(results).is_none());
}

#[test]
fn test_prodos_in_2img_wrapper() {
    let payload = prodos_volume();
    let mut data = vec![0u8; 64];
    data[..4].copy_from_slice(b"2IMG");
    data[4..8].copy_from_slice(b"TEST");
    data[8..10].copy_from_slice(&64u16.to_le_bytes());
    data[10..12].copy_from_slice(&1u16.to_le_bytes());
    data[12..16].copy_from_slice(&1u32.to_le_bytes());
    data[20..24].copy_from_slice(&280u32.to_le_bytes());
    data[24..28].copy_from_slice(&64u32.to_le_bytes());
    data[28..32].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&payload);

    let fs = detect_one("test.2mg", &data);
    assert_eq!(fs.fs_type(), FileSystemType::Prodos);
    assert_eq!(fs.wrapper(), Some(WrapperFormat::TwoImg));
    assert_eq!(fs.read_file("README").unwrap().len(), 100);
}

#[test]
fn test_delete_and_write_back() {
    let mut fs = detect_one("test.po", &prodos_volume());
    fs.delete_file("README").unwrap();
    assert!(fs.find_file("README").is_none());
    assert!(matches!(
        fs.delete_file("README"),
        Err(FsError::FileNotFound(_))
    ));

    let bytes = fs.into_bytes();
    let reopened = detect_one("test.po", &bytes);
    assert!(reopened.find_file("README").is_none());
    assert_eq!(reopened.volume_name(), Some("TEST"));
}

#[test]
fn test_archives_are_read_only() {
    let mut fs = detect_one("hello.shk", &nufx_archive("HELLO", b"x"));
    assert!(matches!(
        fs.delete_file("HELLO"),
        Err(FsError::Unsupported(_))
    ));
}

#[test]
fn test_catalog_and_tree_render() {
    let fs = detect_one("test.po", &prodos_volume());
    let text = catalog::catalog(&fs);
    assert!(text.starts_with("test.po (ProDOS)"));
    assert!(text.contains("README"));
    assert!(catalog::tree(&fs).contains("README (100 bytes)"));
}

/// Apply byte patches to a copy of a disk
fn patched(base: &[u8], patches: &[(usize, u8)]) -> Vec<u8> {
    let mut disk = base.to_vec();
    for &(pos, byte) in patches {
        let pos = pos % disk.len();
        disk[pos] = byte;
    }
    disk
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_detect_never_panics(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let results = FormatDetector::new().detect("random.bin", &data);
        for fs in &results {
            let _ = catalog::catalog(fs);
        }
    }

    #[test]
    fn prop_damaged_catalogs_never_panic(
        patches in proptest::collection::vec((0usize..DISK_140K, any::<u8>()), 1..64)
    ) {
        for base in [dos_disk(), sparse_prodos_volume(), pascal_volume()] {
            let disk = patched(&base, &patches);
            for fs in FormatDetector::new().detect("damaged.dsk", &disk) {
                check_buffer_lengths(&fs);
                let _ = catalog::catalog(&fs);
                let _ = catalog::block_map(fs.reader(), false);
                fs.walk(&mut |file, _| {
                    let _ = fs.read_entry(file);
                });
            }
        }
    }

    #[test]
    fn prop_detect_is_repeatable(
        patches in proptest::collection::vec((0usize..DISK_140K, any::<u8>()), 0..16)
    ) {
        let disk = patched(&dos_disk(), &patches);
        let detector = FormatDetector::new();
        let first: Vec<_> = detector
            .detect("a.dsk", &disk)
            .iter()
            .map(|fs| (fs.fs_type(), fs.total_catalog_blocks(), fs.files().len()))
            .collect();
        let second: Vec<_> = detector
            .detect("a.dsk", &disk)
            .iter()
            .map(|fs| (fs.fs_type(), fs.total_catalog_blocks(), fs.files().len()))
            .collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_buffer_slices_stay_in_bounds(
        len in 0usize..512,
        offset in 0usize..600,
        length in 0usize..600,
    ) {
        let buffer = Buffer::new(vec![0xAA; len]);
        match buffer.slice(offset, length) {
            Ok(view) => {
                prop_assert!(offset + length <= len);
                prop_assert_eq!(view.len(), length);
                prop_assert_eq!(view.offset(), offset);
            }
            Err(err) => {
                prop_assert!(offset + length > len);
                let is_invalid_buffer = matches!(err, FsError::InvalidBuffer { .. });
                prop_assert!(is_invalid_buffer);
            }
        }
        let clamped = buffer.slice_clamped(offset, length);
        prop_assert!(clamped.offset() + clamped.len() <= len);
    }
}
