/// WOZ nibble images
///
/// Only the container is understood here. Turning flux/nibble tracks into
/// logical sectors is the job of a [`NibbleDecoder`] supplied by the caller.

use crate::error::{FsError, Result};
use crate::format::constants::*;

/// Converts a nibble image into a logical sector stream
pub trait NibbleDecoder: Send + Sync {
    /// Decode a whole WOZ file into DOS-ordered sector data
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// WOZ container version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WozVersion {
    /// WOZ1
    Woz1,
    /// WOZ2
    Woz2,
}

/// Information from a WOZ INFO chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WozInfo {
    /// Container version
    pub version: WozVersion,
    /// 1 = 5.25", 2 = 3.5"
    pub disk_type: u8,
    /// Write protected flag
    pub write_protected: bool,
    /// Name of the imaging tool
    pub creator: String,
    /// Chunk identifiers in file order
    pub chunks: Vec<String>,
}

/// Check the WOZ signature and trailer
pub fn is_woz(data: &[u8]) -> Option<WozVersion> {
    if data.len() < WOZ_HEADER_SIZE || &data[4..8] != WOZ_TRAILER {
        return None;
    }
    if data.starts_with(WOZ2_SIGNATURE) {
        Some(WozVersion::Woz2)
    } else if data.starts_with(WOZ1_SIGNATURE) {
        Some(WozVersion::Woz1)
    } else {
        None
    }
}

/// Walk the chunk list and read the INFO chunk
pub fn parse_info(data: &[u8]) -> Result<WozInfo> {
    let version = is_woz(data).ok_or_else(|| FsError::unsupported("not a WOZ image"))?;
    let mut info = WozInfo {
        version,
        disk_type: 0,
        write_protected: false,
        creator: String::new(),
        chunks: Vec::new(),
    };

    let mut pos = WOZ_HEADER_SIZE;
    while pos + 8 <= data.len() {
        let id = String::from_utf8_lossy(&data[pos..pos + 4]).to_string();
        let size = u32::from_le_bytes([
            data[pos + 4],
            data[pos + 5],
            data[pos + 6],
            data[pos + 7],
        ]) as usize;
        let body = pos + 8;
        if id == "INFO" && body + 37 <= data.len() {
            info.disk_type = data[body + 1];
            info.write_protected = data[body + 2] != 0;
            info.creator = String::from_utf8_lossy(&data[body + 5..body + 37])
                .trim_end()
                .to_string();
        }
        info.chunks.push(id);
        pos = match body.checked_add(size) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(info)
}
