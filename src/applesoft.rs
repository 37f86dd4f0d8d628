/// Applesoft BASIC program lister

use crate::error::Result;
use crate::file::{AppleFile, FileDetail};
use crate::filesystem::dos::DosFileType;
use crate::filesystem::AppleFileSystem;

/// ProDOS file type of an Applesoft program
pub const PRODOS_BAS: u8 = 0xFC;

/// First token byte
const FIRST_TOKEN: u8 = 0x80;

/// Keywords for tokens 0x80 to 0xEA
const TOKENS: [&str; 107] = [
    "END", "FOR", "NEXT", "DATA", "INPUT", "DEL", "DIM", "READ", "GR", "TEXT", "PR#", "IN#",
    "CALL", "PLOT", "HLIN", "VLIN", "HGR2", "HGR", "HCOLOR=", "HPLOT", "DRAW", "XDRAW", "HTAB",
    "HOME", "ROT=", "SCALE=", "SHLOAD", "TRACE", "NOTRACE", "NORMAL", "INVERSE", "FLASH",
    "COLOR=", "POP", "VTAB", "HIMEM:", "LOMEM:", "ONERR", "RESUME", "RECALL", "STORE", "SPEED=",
    "LET", "GOTO", "RUN", "IF", "RESTORE", "&", "GOSUB", "RETURN", "REM", "STOP", "ON", "WAIT",
    "LOAD", "SAVE", "DEF", "POKE", "PRINT", "CONT", "LIST", "CLEAR", "GET", "NEW", "TAB(", "TO",
    "FN", "SPC(", "THEN", "AT", "NOT", "STEP", "+", "-", "*", "/", "^", "AND", "OR", ">", "=",
    "<", "SGN", "INT", "ABS", "USR", "FRE", "SCRN(", "PDL", "POS", "SQR", "RND", "LOG", "EXP",
    "COS", "SIN", "TAN", "ATN", "PEEK", "LEN", "STR$", "VAL", "ASC", "CHR$", "LEFT$", "RIGHT$",
    "MID$",
];

/// Token that starts a comment
const TOKEN_REM: u8 = 0xB2;
/// Token that starts inline data
const TOKEN_DATA: u8 = 0x83;

/// Is this file an Applesoft program?
pub fn is_applesoft(file: &AppleFile) -> bool {
    match &file.detail {
        FileDetail::Dos(entry) => matches!(entry.file_type, DosFileType::Applesoft),
        FileDetail::Prodos(entry) => entry.file_type == PRODOS_BAS,
        FileDetail::Nufx(entry) => entry.file_type == PRODOS_BAS as u32,
        FileDetail::Binary2(entry) => entry.file_type == PRODOS_BAS,
        _ => false,
    }
}

/// List an Applesoft file from a file system
///
/// Returns `Ok(None)` when the file is not an Applesoft program.
pub fn list_file(fs: &AppleFileSystem, file: &AppleFile) -> Result<Option<String>> {
    if !is_applesoft(file) {
        return Ok(None);
    }
    let data = fs.read_entry(file)?;
    Ok(Some(list_program(&data)))
}

/// Detokenize an Applesoft program
///
/// Each line is a link word, a line number and tokenized text ending in a
/// zero byte. A zero link ends the program. Truncated lines are listed as far
/// as they go.
pub fn list_program(data: &[u8]) -> String {
    let mut output = String::new();
    let mut pos = 0;

    while pos + 4 <= data.len() {
        let link = u16::from_le_bytes([data[pos], data[pos + 1]]);
        if link == 0 {
            break;
        }
        let line_num = u16::from_le_bytes([data[pos + 2], data[pos + 3]]);
        pos += 4;

        let end = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .map_or(data.len(), |n| pos + n);
        output.push_str(&format!("{} ", line_num));
        output.push_str(&list_line(&data[pos..end]));
        output.push('\n');
        pos = end + 1;
    }

    output
}

/// Detokenize the text of one line
fn list_line(line: &[u8]) -> String {
    let mut text = String::new();
    let mut in_quotes = false;
    // REM or DATA: following bytes are not tokens
    let mut literal: Option<u8> = None;

    for &byte in line {
        if byte >= FIRST_TOKEN && !in_quotes && literal.is_none() {
            let keyword = TOKENS
                .get((byte - FIRST_TOKEN) as usize)
                .copied()
                .unwrap_or("?");
            if keyword.starts_with(|c: char| c.is_ascii_alphabetic()) {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
                text.push_str(keyword);
                text.push(' ');
            } else {
                text.push_str(keyword);
            }
            if byte == TOKEN_REM || byte == TOKEN_DATA {
                literal = Some(byte);
            }
            continue;
        }

        let c = byte & 0x7F;
        match c {
            b'"' => {
                in_quotes = !in_quotes;
                text.push('"');
            }
            b':' => {
                if !in_quotes && literal == Some(TOKEN_DATA) {
                    literal = None;
                }
                text.push(':');
            }
            0x00..=0x1F => {
                text.push('^');
                text.push((c + 0x40) as char);
            }
            _ => text.push(c as char),
        }
    }

    text.trim_end().to_string()
}
