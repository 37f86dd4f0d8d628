/// Catalog listings, file trees and block maps
///
/// Everything here returns text; printing is left to the caller.

use crate::file::{AppleFile, FileKind};
use crate::filesystem::{
    binary2, cpm, dos, lbr, nufx, pascal, prodos, zip, AppleFileSystem, FileSystemType,
};
use crate::image::{BlockReader, BlockType};

/// ANSI color codes for the block map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const DARK_RED: &str = "\x1b[2;31m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
}

const BLOCK_EMPTY: char = '\u{2591}'; // ░
const BLOCK_ORPHAN: char = '\u{2592}'; // ▒
const BLOCK_FILE: char = '\u{2593}'; // ▓
const BLOCK_FS: char = '\u{2588}'; // █

/// Blocks per row when the reader has no tracks
const MAP_WIDTH: usize = 64;

/// One listing line for a file, in the style of its file system
pub fn catalog_line(fs_type: FileSystemType, file: &AppleFile) -> String {
    match fs_type {
        FileSystemType::Dos31 | FileSystemType::Dos | FileSystemType::Dos4 => {
            dos::catalog_line(file)
        }
        FileSystemType::Prodos => prodos::catalog_line(file),
        FileSystemType::Pascal => pascal::catalog_line(file),
        FileSystemType::Cpm => cpm::catalog_line(file),
        FileSystemType::Nufx => nufx::catalog_line(file),
        FileSystemType::Binary2 => binary2::catalog_line(file),
        FileSystemType::Lbr => lbr::catalog_line(file),
        FileSystemType::Zip | FileSystemType::Gzip => zip::catalog_line(file),
        FileSystemType::Hybrid => file.name.clone(),
    }
}

/// Full catalog of a file system, with anomalies and failures inline
pub fn catalog(fs: &AppleFileSystem) -> String {
    let mut out = String::new();
    let wrapper = fs
        .wrapper()
        .map_or_else(String::new, |w| format!(", {} wrapper", w));
    out.push_str(&format!("{} ({}{})\n", fs.name(), fs.fs_type(), wrapper));
    if let Some(volume) = fs.volume_name() {
        out.push_str(&format!("Volume: {}\n", volume));
    }

    if fs.fs_type() == FileSystemType::Hybrid {
        for part in fs.file_systems() {
            out.push('\n');
            out.push_str(&catalog(part));
        }
        return out;
    }

    out.push('\n');
    for file in fs.files() {
        list_entry(fs.fs_type(), file, 0, &mut out);
    }
    for failure in fs.failures() {
        out.push_str(&format!("  x {}: {}\n", failure.name, failure.reason));
    }
    for anomaly in fs.anomalies() {
        out.push_str(&format!("  ! {}\n", anomaly));
    }
    if !fs.deleted().is_empty() {
        out.push_str(&format!("\nDeleted: {}\n", fs.deleted().join(", ")));
    }

    let info = fs.info();
    out.push('\n');
    if fs.fs_type().is_disk() {
        out.push_str(&format!(
            "{} of {} blocks free ({} bytes each), {} catalog blocks\n",
            info.free_blocks, info.total_blocks, info.block_size, info.catalog_blocks
        ));
    } else {
        out.push_str(&format!("{} entries\n", info.files));
    }
    if fs.fs_type() == FileSystemType::Pascal {
        let gaps = pascal::free_space(fs, info.total_blocks);
        let text: Vec<String> = gaps
            .iter()
            .map(|gap| format!("{}-{}", gap.start, gap.end - 1))
            .collect();
        out.push_str(&format!("Free extents: {}\n", text.join(" ")));
    }
    out
}

fn list_entry(fs_type: FileSystemType, file: &AppleFile, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!("{}{}\n", indent, catalog_line(fs_type, file)));
    for anomaly in &file.anomalies {
        out.push_str(&format!("{}    ! {}\n", indent, anomaly));
    }
    for nested in &file.file_systems {
        out.push_str(&format!(
            "{}    [{} with {} entries]\n",
            indent,
            nested.fs_type(),
            nested.files().len()
        ));
    }
    if file.is_folder() {
        for child in &file.children {
            list_entry(fs_type, child, depth + 1, out);
        }
    }
}

/// Indented tree of every entry, descending into embedded file systems
pub fn tree(fs: &AppleFileSystem) -> String {
    let mut out = String::new();
    tree_fs(fs, 0, &mut out);
    out
}

fn tree_fs(fs: &AppleFileSystem, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let label = fs.volume_name().unwrap_or(fs.name());
    out.push_str(&format!("{}{} [{}]\n", indent, label, fs.fs_type()));
    for part in fs.file_systems() {
        tree_fs(part, depth + 1, out);
    }
    for file in fs.files() {
        tree_file(file, depth + 1, out);
    }
}

fn tree_file(file: &AppleFile, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match file.kind {
        FileKind::Folder => out.push_str(&format!("{}{}/\n", indent, file.name)),
        FileKind::Fork(fork) => out.push_str(&format!(
            "{}{} ({}, {} bytes)\n",
            indent,
            file.name,
            fork,
            file.file_length()
        )),
        _ => out.push_str(&format!(
            "{}{} ({} bytes)\n",
            indent,
            file.name,
            file.file_length()
        )),
    }
    for child in &file.children {
        tree_file(child, depth + 1, out);
    }
    for nested in &file.file_systems {
        tree_fs(nested, depth + 1, out);
    }
}

/// Count of blocks per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockUsage {
    /// Free blocks
    pub empty: usize,
    /// Blocks nothing accounts for
    pub orphan: usize,
    /// File system structures
    pub fs_data: usize,
    /// File contents
    pub file_data: usize,
}

/// Tally the block classifications of a reader
pub fn block_usage(reader: &BlockReader) -> BlockUsage {
    let mut usage = BlockUsage::default();
    for block_no in 0..reader.total_blocks() {
        match reader.block_type(block_no) {
            BlockType::Empty => usage.empty += 1,
            BlockType::Orphan => usage.orphan += 1,
            BlockType::FsData => usage.fs_data += 1,
            BlockType::FileData => usage.file_data += 1,
        }
    }
    usage
}

fn block_cell(block_type: BlockType, color: bool) -> String {
    let (glyph, shade) = match block_type {
        BlockType::Empty => (BLOCK_EMPTY, colors::DARK_WHITE),
        BlockType::Orphan => (BLOCK_ORPHAN, colors::DARK_RED),
        BlockType::FsData => (BLOCK_FS, colors::BRIGHT_YELLOW),
        BlockType::FileData => (BLOCK_FILE, colors::BRIGHT_WHITE),
    };
    if color {
        format!("{}{}{}", shade, glyph, colors::RESET)
    } else {
        glyph.to_string()
    }
}

/// Block map: one column per track with sector 0 at the bottom, or rows of
/// blocks for readers without tracks
pub fn block_map(reader: &BlockReader, color: bool) -> String {
    let mut out = String::new();
    let total = reader.total_blocks();
    out.push_str(&format!(
        "Legend: {} Free {} Orphan {} File system {} File\n\n",
        block_cell(BlockType::Empty, color),
        block_cell(BlockType::Orphan, color),
        block_cell(BlockType::FsData, color),
        block_cell(BlockType::FileData, color)
    ));
    if total == 0 {
        out.push_str("No blocks.\n");
        return out;
    }

    let per_track = reader.params().blocks_per_track;
    if per_track == 0 {
        for row in (0..total).step_by(MAP_WIDTH) {
            out.push_str(&format!("{:>5} ", row));
            for block_no in row..(row + MAP_WIDTH).min(total) {
                out.push_str(&block_cell(reader.block_type(block_no), color));
            }
            out.push('\n');
        }
        return out;
    }

    let tracks = total.div_ceil(per_track);
    for sector in (0..per_track).rev() {
        out.push_str(&format!("{:>2} ", sector));
        for track in 0..tracks {
            let block_no = track * per_track + sector;
            if block_no < total {
                out.push_str(&block_cell(reader.block_type(block_no), color));
            } else {
                out.push(' ');
            }
        }
        out.push('\n');
    }

    // Track axis, labelled every five tracks
    out.push_str("   ");
    let mut axis = vec![' '; tracks];
    for track in (0..tracks).step_by(5) {
        for (i, digit) in track.to_string().chars().enumerate() {
            if track + i < tracks {
                axis[track + i] = digit;
            }
        }
    }
    out.extend(axis);
    out.push('\n');
    out
}

/// Every labelled or owned block, one per line
pub fn block_list(reader: &BlockReader) -> String {
    let mut out = String::new();
    for block_no in 0..reader.total_blocks() {
        let block_type = reader.block_type(block_no);
        if block_type == BlockType::Empty || block_type == BlockType::Orphan {
            continue;
        }
        out.push_str(&format!("{:>5} {:<10}", block_no, block_type));
        if let Some(label) = reader.block_sub_type(block_no) {
            out.push_str(&format!(" {}", label));
        }
        if let Some(owner) = reader.file_owner(block_no) {
            out.push_str(&format!(" file #{}", owner.0));
        }
        out.push('\n');
    }
    out
}
