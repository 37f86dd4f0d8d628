/// Format detection
///
/// The detector tries every enabled parser over a buffer and keeps the ones
/// that accept it. Wrapper headers (2IMG, DiskCopy, WOZ) are removed first,
/// 800K images are also tried as two UniDOS halves, and files that look like
/// containers are fed back through the detector.

use crate::buffer::Buffer;
use crate::codec::CodecRegistry;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{
    binary2, cpm, dos, gzip, lbr, nufx, pascal, prodos, zip, AppleFileSystem, FileSystemType,
};
use crate::format::{self, woz, NibbleDecoder, WrapperFormat};
use crate::format::{DISK_113K, DISK_140K, DISK_800K, UNIDOS_HALF};
use crate::image::{BlockReader, DiskParameters};
use log::{debug, info, trace, warn};
use std::path::Path;
use std::sync::Arc;

/// Default nesting depth for embedded file systems
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Name suffixes of files worth probing for a file system
const CONTAINER_SUFFIXES: [&str; 13] = [
    ".SHK", ".SDK", ".BXY", ".BNY", ".BQY", ".LBR", ".DSK", ".DO", ".PO", ".2MG", ".ZIP", ".GZ",
    ".WOZ",
];

/// ProDOS "LBR" file type used for archives and disk images
const PRODOS_ARCHIVE_TYPE: u8 = 0xE0;

/// Tries each known parser over a buffer
pub struct FormatDetector {
    max_depth: usize,
    formats: Vec<FileSystemType>,
    try_alternate_order: bool,
    nibble_decoder: Option<Box<dyn NibbleDecoder>>,
    codecs: CodecRegistry,
}

/// Builder for a [`FormatDetector`]
pub struct FormatDetectorBuilder {
    max_depth: usize,
    formats: Vec<FileSystemType>,
    try_alternate_order: bool,
    nibble_decoder: Option<Box<dyn NibbleDecoder>>,
    codecs: CodecRegistry,
}

impl FormatDetectorBuilder {
    /// Create a builder with every format enabled
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            formats: FileSystemType::ALL.to_vec(),
            try_alternate_order: true,
            nibble_decoder: None,
            codecs: CodecRegistry::standard(),
        }
    }

    /// Set how deep embedded file systems are followed
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Restrict detection to these formats
    pub fn formats(mut self, formats: &[FileSystemType]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Try both sector orders on 140K images
    pub fn try_alternate_order(mut self, enabled: bool) -> Self {
        self.try_alternate_order = enabled;
        self
    }

    /// Set the decoder used for WOZ images
    pub fn nibble_decoder(mut self, decoder: Box<dyn NibbleDecoder>) -> Self {
        self.nibble_decoder = Some(decoder);
        self
    }

    /// Set the NuFX thread codecs
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Build the detector
    pub fn build(self) -> FormatDetector {
        FormatDetector {
            max_depth: self.max_depth,
            formats: self.formats,
            try_alternate_order: self.try_alternate_order,
            nibble_decoder: self.nibble_decoder,
            codecs: self.codecs,
        }
    }
}

impl Default for FormatDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for FormatDetector {
    fn default() -> Self {
        FormatDetectorBuilder::new().build()
    }
}

impl FormatDetector {
    /// Detector with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a detector
    pub fn builder() -> FormatDetectorBuilder {
        FormatDetectorBuilder::new()
    }

    /// Formats this detector will try
    pub fn formats(&self) -> &[FileSystemType] {
        &self.formats
    }

    /// Nesting depth for embedded file systems
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Read a file and detect what it holds
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Vec<AppleFileSystem>> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.detect_buffer(&name, Buffer::new(data)))
    }

    /// Detect file systems in a byte slice
    pub fn detect(&self, name: &str, data: &[u8]) -> Vec<AppleFileSystem> {
        self.detect_buffer(name, Buffer::new(data.to_vec()))
    }

    /// Detect file systems in part of a shared array
    pub fn detect_range(
        &self,
        name: &str,
        data: Arc<Vec<u8>>,
        offset: usize,
        length: usize,
    ) -> Vec<AppleFileSystem> {
        match Buffer::with_range(data, offset, length) {
            Ok(buffer) => self.detect_buffer(name, buffer),
            Err(err) => {
                warn!("{}: {}", name, err);
                Vec::new()
            }
        }
    }

    /// Detect file systems in a buffer. Never fails; an empty list means nothing matched.
    pub fn detect_buffer(&self, name: &str, buffer: Buffer) -> Vec<AppleFileSystem> {
        self.detect_at(name, buffer, 0)
    }

    fn detect_at(&self, name: &str, buffer: Buffer, depth: usize) -> Vec<AppleFileSystem> {
        let mut buffer = buffer;
        let length = format::canonical_length(buffer.len());
        if length != buffer.len() {
            debug!("{}: trimming padded image to {} bytes", name, length);
            buffer = buffer.slice_clamped(0, length);
        }

        let mut wrapper = None;
        let mut notes = Vec::new();
        let mut interleave_hint = None;
        if let Some(version) = woz::is_woz(buffer.as_slice()) {
            if let Ok(info) = woz::parse_info(buffer.as_slice()) {
                debug!("{}: {:?} image from {}", name, version, info.creator);
            }
            let Some(decoder) = &self.nibble_decoder else {
                warn!(
                    "{}: {}",
                    name,
                    FsError::unsupported("WOZ image but no nibble decoder")
                );
                return Vec::new();
            };
            match decoder.decode(buffer.as_slice()) {
                Ok(sectors) => buffer = Buffer::new(sectors),
                Err(err) => {
                    warn!("{}: nibble decoding failed: {}", name, err);
                    return Vec::new();
                }
            }
            wrapper = Some(WrapperFormat::Woz);
        } else if let Some(unwrapped) = format::detect_wrapper(buffer.as_slice()) {
            match buffer.slice(unwrapped.offset, unwrapped.length) {
                Ok(payload) => buffer = payload,
                Err(err) => {
                    warn!("{}: {} payload out of range: {}", name, unwrapped.format, err);
                    return Vec::new();
                }
            }
            debug!(
                "{}: {} wrapper, {} bytes at {}",
                name, unwrapped.format, unwrapped.length, unwrapped.offset
            );
            wrapper = Some(unwrapped.format);
            interleave_hint = unwrapped.prodos_interleave;
            notes = unwrapped.anomalies;
        }

        let mut found = self.try_formats(name, &buffer, interleave_hint);
        for fs in &mut found {
            if let Some(wrapper) = wrapper {
                fs.set_wrapper(wrapper);
            }
            for note in &notes {
                fs.anomaly(note.clone());
            }
            if depth < self.max_depth {
                self.probe_embedded(fs, depth + 1);
            }
        }

        if found.is_empty() {
            debug!("{}: no file system recognised", name);
        } else {
            let names: Vec<&str> = found.iter().map(|fs| fs.fs_type().name()).collect();
            info!("{}: detected {}", name, names.join(", "));
        }
        found
    }

    fn enabled(&self, fs_type: FileSystemType) -> bool {
        self.formats.contains(&fs_type)
    }

    /// Interleaves to try for a 512-byte-block reader
    fn block_orders(&self, length: usize, hint: Option<usize>) -> Vec<usize> {
        match hint {
            Some(interleave) => vec![interleave],
            None if length == DISK_140K && self.try_alternate_order => vec![0, 1],
            None => vec![0],
        }
    }

    /// Interleaves to try for a 256-byte-sector DOS reader
    fn sector_orders(&self, length: usize, hint: Option<usize>) -> Vec<usize> {
        match hint {
            Some(0) if length == DISK_140K => vec![1],
            Some(_) => vec![0],
            None if length == DISK_140K && self.try_alternate_order => vec![0, 1],
            None => vec![0],
        }
    }

    fn try_formats(
        &self,
        name: &str,
        buffer: &Buffer,
        hint: Option<usize>,
    ) -> Vec<AppleFileSystem> {
        let length = buffer.len();
        let mut found = Vec::new();

        if self.enabled(FileSystemType::Prodos) {
            let attempts = self
                .block_orders(length, hint)
                .into_iter()
                .map(|il| prodos::parse(name, buffer.clone(), DiskParameters::prodos(il)));
            found.extend(best_of(name, FileSystemType::Prodos, attempts));
        }
        if self.enabled(FileSystemType::Pascal) {
            let attempts = self
                .block_orders(length, hint)
                .into_iter()
                .map(|il| pascal::parse(name, buffer.clone(), DiskParameters::prodos(il)));
            found.extend(best_of(name, FileSystemType::Pascal, attempts));
        }
        if self.enabled(FileSystemType::Dos31) && length == DISK_113K {
            let attempt = dos::parse(name, buffer.clone(), DiskParameters::dos31());
            found.extend(best_of(name, FileSystemType::Dos31, [attempt]));
        }
        if self.enabled(FileSystemType::Dos) || self.enabled(FileSystemType::Dos4) {
            let attempts = self
                .sector_orders(length, hint)
                .into_iter()
                .map(|il| dos::parse(name, buffer.clone(), DiskParameters::dos33(il)));
            if let Some(fs) = best_of(name, FileSystemType::Dos, attempts) {
                if self.enabled(fs.fs_type()) {
                    found.push(fs);
                } else {
                    trace!("{}: {} not enabled", name, fs.fs_type());
                }
            }
        }
        if self.enabled(FileSystemType::Dos) && length == DISK_800K {
            found.extend(self.try_unidos(name, buffer));
        }
        if self.enabled(FileSystemType::Cpm) {
            let params = match length {
                DISK_140K => Some(DiskParameters::cpm()),
                DISK_800K => Some(DiskParameters::cpm_800()),
                _ => None,
            };
            if let Some(params) = params {
                let attempt = cpm::parse(name, buffer.clone(), params);
                found.extend(best_of(name, FileSystemType::Cpm, [attempt]));
            }
        }
        if self.enabled(FileSystemType::Lbr) {
            found.extend(best_of(name, FileSystemType::Lbr, [lbr::parse(name, buffer.clone())]));
        }
        if self.enabled(FileSystemType::Nufx) {
            let attempt = nufx::parse(name, buffer.clone(), &self.codecs);
            found.extend(best_of(name, FileSystemType::Nufx, [attempt]));
        }
        if self.enabled(FileSystemType::Binary2) {
            let attempt = binary2::parse(name, buffer.clone());
            found.extend(best_of(name, FileSystemType::Binary2, [attempt]));
        }
        if self.enabled(FileSystemType::Zip) {
            found.extend(best_of(name, FileSystemType::Zip, [zip::parse(name, buffer.clone())]));
        }
        if self.enabled(FileSystemType::Gzip) {
            found.extend(best_of(name, FileSystemType::Gzip, [gzip::parse(name, buffer.clone())]));
        }
        found
    }

    /// Parse both halves of an 800K image as DOS and wrap them when both succeed
    fn try_unidos(&self, name: &str, buffer: &Buffer) -> Option<AppleFileSystem> {
        let mut halves = Vec::with_capacity(2);
        for (index, offset) in [0, UNIDOS_HALF].into_iter().enumerate() {
            let half = buffer.slice(offset, UNIDOS_HALF).ok()?;
            let half_name = format!("{} (half {})", name, index + 1);
            let attempt = dos::parse(&half_name, half, DiskParameters::unidos());
            halves.push(best_of(&half_name, FileSystemType::Dos, [attempt])?);
        }
        match BlockReader::new(name, buffer.clone(), DiskParameters::unidos()) {
            Ok(reader) => {
                debug!("{}: UniDOS hybrid", name);
                Some(AppleFileSystem::hybrid(name, reader, halves))
            }
            Err(err) => {
                warn!("{}: {}", name, err);
                None
            }
        }
    }

    /// Look inside files that may hold file systems of their own
    fn probe_embedded(&self, fs: &mut AppleFileSystem, depth: usize) {
        let mut files = std::mem::take(fs.files_mut());
        for file in &mut files {
            self.probe_file(fs, file, depth);
        }
        *fs.files_mut() = files;
        for part in fs.file_systems_mut() {
            self.probe_embedded(part, depth);
        }
    }

    fn probe_file(&self, fs: &AppleFileSystem, file: &mut AppleFile, depth: usize) {
        if file.is_folder() {
            for child in &mut file.children {
                self.probe_file(fs, child, depth);
            }
            return;
        }
        if !looks_like_container(file) {
            return;
        }
        let data = match fs.read_entry(file) {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => return,
            Err(err) => {
                debug!("{}: cannot read {}: {}", fs.name(), file.name, err);
                return;
            }
        };
        let nested = self.detect_at(&file.name, Buffer::new(data), depth);
        if nested.is_empty() && file.kind == FileKind::Embedded {
            file.anomaly("no file system recognised in the disk image");
        }
        file.file_systems = nested;
    }
}

/// Keep the attempt with the most catalog blocks, logging the rejections
fn best_of(
    name: &str,
    fs_type: FileSystemType,
    attempts: impl IntoIterator<Item = Result<AppleFileSystem>>,
) -> Option<AppleFileSystem> {
    let mut best: Option<AppleFileSystem> = None;
    for attempt in attempts {
        match attempt {
            Ok(fs) => {
                trace!(
                    "{}: {} accepted with {} catalog blocks",
                    name,
                    fs.fs_type(),
                    fs.total_catalog_blocks()
                );
                if best
                    .as_ref()
                    .map_or(true, |b| fs.total_catalog_blocks() > b.total_catalog_blocks())
                {
                    best = Some(fs);
                }
            }
            Err(err) if err.is_format_mismatch() => trace!("{}: {}", name, err),
            Err(err) => warn!("{}: {} rejected: {}", name, fs_type, err),
        }
    }
    best
}

/// Does a file look like an archive or a disk image?
pub fn looks_like_container(file: &AppleFile) -> bool {
    if file.kind == FileKind::Embedded {
        return true;
    }
    let file_type = match &file.detail {
        FileDetail::Prodos(entry) => Some(entry.file_type),
        FileDetail::Binary2(entry) => Some(entry.file_type),
        FileDetail::Nufx(entry) => Some(entry.file_type as u8),
        _ => None,
    };
    if file_type == Some(PRODOS_ARCHIVE_TYPE) {
        return true;
    }
    let upper = file.name.to_ascii_uppercase();
    CONTAINER_SUFFIXES.iter().any(|suffix| upper.ends_with(suffix))
}

/// Pick the most plausible result: the one with the most catalog blocks
pub fn resolve(results: Vec<AppleFileSystem>) -> Option<AppleFileSystem> {
    let mut best: Option<AppleFileSystem> = None;
    for fs in results {
        if best
            .as_ref()
            .map_or(true, |b| fs.total_catalog_blocks() > b.total_catalog_blocks())
        {
            best = Some(fs);
        }
    }
    best
}
