/// Sequential and random-access text files
///
/// A text file is random access when its block list has holes or when a
/// zero byte appears before its end. The record length is the GCD of the
/// offsets where records start (a non-zero byte after a zero byte).

use log::debug;

/// Smallest record length accepted without real gaps
pub const MIN_RECORD_LENGTH: usize = 4;
/// Largest record length accepted without real gaps
pub const MAX_RECORD_LENGTH: usize = 1000;

/// One record inside a text block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    /// Record number (offset / record length)
    pub number: usize,
    /// Offset of the record from the start of the file
    pub offset: usize,
    /// Bytes up to the first zero
    pub length: usize,
}

/// A run of consecutive allocated blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    /// Index of the first block in the file's block list
    pub first_index: usize,
    /// Block numbers in the run
    pub blocks: Vec<usize>,
    /// Byte offset of the run within the file
    pub offset: usize,
    /// Records starting inside the run
    pub records: Vec<TextRecord>,
}

/// Result of scanning a text file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayout {
    /// Fixed-record file?
    pub random_access: bool,
    /// Inferred record length
    pub record_length: Option<usize>,
    /// One past the last non-zero byte
    pub eof: usize,
    /// Allocated runs, only filled for random-access files
    pub text_blocks: Vec<TextBlock>,
}

/// One past the last non-zero byte
pub fn text_eof(data: &[u8]) -> usize {
    data.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Offsets (excluding zero) where a record starts
fn record_starts(data: &[u8], eof: usize) -> Vec<usize> {
    (1..eof)
        .filter(|&i| data[i] != 0 && data[i - 1] == 0)
        .collect()
}

/// Classify a text file from its raw bytes and block list
pub fn analyze(data: &[u8], blocks: &[Option<usize>], block_size: usize) -> TextLayout {
    let eof = text_eof(data);
    let has_gaps = blocks.iter().any(|b| b.is_none());
    let embedded_zero = data[..eof].contains(&0);

    let mut layout = TextLayout {
        random_access: has_gaps || embedded_zero,
        record_length: None,
        eof,
        text_blocks: Vec::new(),
    };
    if !layout.random_access {
        return layout;
    }

    let starts = record_starts(data, eof);
    let length = starts.iter().fold(0, |acc, &s| gcd(acc, s));
    if !(MIN_RECORD_LENGTH..=MAX_RECORD_LENGTH).contains(&length) {
        if !has_gaps {
            debug!(
                "record length {} implausible without gaps, treating as sequential text",
                length
            );
            layout.random_access = false;
            return layout;
        }
    } else {
        layout.record_length = Some(length);
    }

    layout.text_blocks = text_blocks(data, blocks, block_size, layout.record_length);
    layout
}

/// Split a block list into runs and locate the records in each
pub fn text_blocks(
    data: &[u8],
    blocks: &[Option<usize>],
    block_size: usize,
    record_length: Option<usize>,
) -> Vec<TextBlock> {
    let mut runs: Vec<TextBlock> = Vec::new();
    let mut current: Option<TextBlock> = None;

    for (index, block) in blocks.iter().enumerate() {
        match block {
            Some(block_no) => current
                .get_or_insert_with(|| TextBlock {
                    first_index: index,
                    blocks: Vec::new(),
                    offset: index * block_size,
                    records: Vec::new(),
                })
                .blocks
                .push(*block_no),
            None => runs.extend(current.take()),
        }
    }
    runs.extend(current);

    if let Some(length) = record_length {
        for run in &mut runs {
            let end = (run.offset + run.blocks.len() * block_size).min(data.len());
            let first = run.offset.div_ceil(length) * length;
            run.records = (first..end)
                .step_by(length)
                .filter(|&offset| data[offset] != 0)
                .map(|offset| TextRecord {
                    number: offset / length,
                    offset,
                    length: data[offset..end.min(offset + length)]
                        .iter()
                        .position(|&b| b == 0)
                        .unwrap_or(end.min(offset + length) - offset),
                })
                .collect();
        }
    }
    runs
}
