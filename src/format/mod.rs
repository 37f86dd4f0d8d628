/// Disk image wrapper formats

/// Magic bytes, offsets and sizes
pub mod constants;
/// DiskCopy 4.2 header
pub mod diskcopy;
/// 2IMG header
pub mod two_img;
/// WOZ container and nibble decoder seam
pub mod woz;

pub use constants::*;
pub use diskcopy::DiskCopyHeader;
pub use two_img::{TwoImgHeader, TwoImgOrder};
pub use woz::{NibbleDecoder, WozInfo, WozVersion};

/// Wrapper around a raw disk image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperFormat {
    /// 2IMG universal header
    TwoImg,
    /// DiskCopy 4.2
    DiskCopy,
    /// WOZ nibble image
    Woz,
}

impl WrapperFormat {
    /// Get a human-readable name for this wrapper
    pub fn name(&self) -> &'static str {
        match self {
            WrapperFormat::TwoImg => "2IMG",
            WrapperFormat::DiskCopy => "DiskCopy 4.2",
            WrapperFormat::Woz => "WOZ",
        }
    }
}

impl std::fmt::Display for WrapperFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Location of the payload inside a wrapped image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    /// Which wrapper was found
    pub format: WrapperFormat,
    /// Payload offset
    pub offset: usize,
    /// Payload length
    pub length: usize,
    /// Interleave for a ProDOS-block reader over the payload, when the header says
    pub prodos_interleave: Option<usize>,
    /// Header comment or disk name
    pub label: Option<String>,
    /// Checksum problems and similar recoverable issues
    pub anomalies: Vec<String>,
}

/// Detect a 2IMG or DiskCopy header
pub fn detect_wrapper(data: &[u8]) -> Option<Unwrapped> {
    if let Some(header) = TwoImgHeader::parse(data) {
        return Some(Unwrapped {
            format: WrapperFormat::TwoImg,
            offset: header.data_offset,
            length: header.data_length,
            prodos_interleave: Some(header.prodos_interleave()),
            label: header.comment.clone(),
            anomalies: Vec::new(),
        });
    }

    if let Some(header) = DiskCopyHeader::parse(data) {
        let payload = &data[header.data_offset()..header.data_offset() + header.data_size];
        let computed = diskcopy::checksum(payload);
        let mut anomalies = Vec::new();
        if computed != header.data_checksum {
            anomalies.push(format!(
                "DiskCopy data checksum ${:08X} does not match computed ${:08X}",
                header.data_checksum, computed
            ));
        }
        return Some(Unwrapped {
            format: WrapperFormat::DiskCopy,
            offset: header.data_offset(),
            length: header.data_size,
            prodos_interleave: Some(0),
            label: Some(header.name),
            anomalies,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_two_img() {
        let mut data = two_img::build_header(1, 512);
        data.resize(TWO_IMG_HEADER_SIZE + 512, 0);
        let wrapped = detect_wrapper(&data).unwrap();
        assert_eq!(wrapped.format, WrapperFormat::TwoImg);
        assert_eq!(wrapped.offset, 64);
        assert_eq!(wrapped.length, 512);
    }

    #[test]
    fn test_detect_diskcopy_checksum_anomaly() {
        let payload = vec![0x5Au8; 512];
        let mut data = diskcopy::build_header("Bad", &payload);
        data.extend_from_slice(&payload);
        data[DISKCOPY_HEADER_SIZE] = 0;

        let wrapped = detect_wrapper(&data).unwrap();
        assert_eq!(wrapped.format, WrapperFormat::DiskCopy);
        assert_eq!(wrapped.label.as_deref(), Some("Bad"));
        assert_eq!(wrapped.anomalies.len(), 1);
    }

    #[test]
    fn test_detect_plain_data() {
        assert!(detect_wrapper(&[0u8; 1024]).is_none());
    }
}
