//! Archive container extraction with signature-based format detection

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::debug;

/// Container formats recognized by signature. Filename extensions are
/// never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
    /// Bare gzip payload — a single compressed document, no container.
    Gzip,
}

/// Extraction failure. Entries already handed to the caller before the
/// failure remain valid.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unrecognized archive signature")]
    UnsupportedFormat,

    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("truncated archive: {0}")]
    Truncated(String),
}

impl From<std::io::Error> for ExtractError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ExtractError::Truncated(err.to_string())
        } else {
            ExtractError::Corrupt(err.to_string())
        }
    }
}

/// One extracted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive. Empty for a bare gzip payload.
    pub name: String,
    pub data: Vec<u8>,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8; 5] = b"ustar";

/// Detect the container format from leading bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ArchiveFormat> {
    if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
        return Some(ArchiveFormat::Zip);
    }
    if bytes.starts_with(&GZIP_MAGIC) {
        // Probe the decompressed head for a tar header.
        let mut head = [0u8; TAR_MAGIC_OFFSET + TAR_MAGIC.len()];
        let mut decoder = GzDecoder::new(bytes);
        let mut filled = 0;
        while filled < head.len() {
            match decoder.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => break,
            }
        }
        if filled == head.len() && &head[TAR_MAGIC_OFFSET..] == TAR_MAGIC {
            return Some(ArchiveFormat::TarGz);
        }
        return Some(ArchiveFormat::Gzip);
    }
    if bytes.len() > TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &bytes[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        return Some(ArchiveFormat::Tar);
    }
    None
}

/// Extract all file entries from an archive in a single pass, handing
/// each entry to `on_entry` as it is decoded. Returns the number of
/// entries delivered.
///
/// On failure partway through, entries delivered before the failure
/// stand and the error describes why the rest are unavailable.
pub fn extract(
    bytes: &[u8],
    mut on_entry: impl FnMut(ArchiveEntry),
) -> Result<u64, ExtractError> {
    let format = detect_format(bytes).ok_or(ExtractError::UnsupportedFormat)?;
    debug!(?format, size = bytes.len(), "extracting archive");
    match format {
        ArchiveFormat::Zip => extract_zip(bytes, &mut on_entry),
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(bytes), &mut on_entry),
        ArchiveFormat::Tar => extract_tar(Cursor::new(bytes), &mut on_entry),
        ArchiveFormat::Gzip => extract_gzip(bytes, &mut on_entry),
    }
}

/// Convenience wrapper: collect entries, pairing the partial listing
/// with the error when extraction stopped early.
pub fn extract_all(bytes: &[u8]) -> (Vec<ArchiveEntry>, Option<ExtractError>) {
    let mut entries = Vec::new();
    match extract(bytes, |entry| entries.push(entry)) {
        Ok(_) => (entries, None),
        Err(err) => (entries, Some(err)),
    }
}

fn extract_zip(bytes: &[u8], on_entry: &mut dyn FnMut(ArchiveEntry)) -> Result<u64, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
    let mut produced = 0;
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        // Entries that climb out of the archive root are hostile input.
        if name.contains("..") {
            debug!(name, "skipping traversal entry");
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        on_entry(ArchiveEntry { name, data });
        produced += 1;
    }
    Ok(produced)
}

fn extract_tar<R: Read>(
    reader: R,
    on_entry: &mut dyn FnMut(ArchiveEntry),
) -> Result<u64, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut produced = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        if name.contains("..") {
            debug!(name, "skipping traversal entry");
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        on_entry(ArchiveEntry { name, data });
        produced += 1;
    }
    Ok(produced)
}

fn extract_gzip(bytes: &[u8], on_entry: &mut dyn FnMut(ArchiveEntry)) -> Result<u64, ExtractError> {
    let mut data = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut data)?;
    on_entry(ArchiveEntry {
        name: String::new(),
        data,
    });
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn build_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn detects_formats_by_signature_not_name() {
        assert_eq!(detect_format(&build_zip(&[("a", b"x")])), Some(ArchiveFormat::Zip));
        assert_eq!(
            detect_format(&build_tar_gz(&[("a", b"x")])),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(detect_format(&build_tar(&[("a", b"x")])), Some(ArchiveFormat::Tar));

        let mut plain = GzEncoder::new(Vec::new(), Compression::default());
        plain.write_all(b"{\"hello\": true}").unwrap();
        assert_eq!(detect_format(&plain.finish().unwrap()), Some(ArchiveFormat::Gzip));

        assert_eq!(detect_format(b"plain text, no container"), None);
    }

    #[test]
    fn zip_round_trip_matches_reference_listing() {
        let bytes = build_zip(&[
            ("posts/questions.json", b"[1,2,3]"),
            ("posts/answers.json", b"[4,5]"),
        ]);
        let (entries, err) = extract_all(&bytes);
        assert!(err.is_none());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "posts/questions.json");
        assert_eq!(entries[0].data, b"[1,2,3]");
        assert_eq!(entries[1].name, "posts/answers.json");
        assert_eq!(entries[1].data, b"[4,5]");
    }

    #[test]
    fn tar_gz_round_trip_matches_reference_listing() {
        let bytes = build_tar_gz(&[("export/posts.json", b"{\"items\":[]}")]);
        let (entries, err) = extract_all(&bytes);
        assert!(err.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "export/posts.json");
        assert_eq!(entries[0].data, b"{\"items\":[]}");
    }

    #[test]
    fn bare_gzip_yields_one_unnamed_entry() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"rows\":[]}").unwrap();
        let (entries, err) = extract_all(&encoder.finish().unwrap());
        assert!(err.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "");
        assert_eq!(entries[0].data, b"{\"rows\":[]}");
    }

    #[test]
    fn unrecognized_payloads_are_rejected() {
        let (entries, err) = extract_all(b"<html>not an archive</html>");
        assert!(entries.is_empty());
        assert!(matches!(err, Some(ExtractError::UnsupportedFormat)));
    }

    #[test]
    fn truncated_tar_keeps_entries_before_the_cut() {
        let full = build_tar(&[
            ("first.json", b"complete"),
            ("second.json", b"this one gets cut off"),
        ]);
        // First entry spans 1024 bytes (header block + padded data);
        // cut partway into the second entry's header.
        let truncated = &full[..1224];

        let (entries, err) = extract_all(truncated);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "first.json");
        assert!(matches!(err, Some(ExtractError::Truncated(_)) | Some(ExtractError::Corrupt(_))));
    }

    #[test]
    fn traversal_entries_are_skipped() {
        let bytes = build_zip(&[("../escape.txt", b"nope"), ("safe.txt", b"fine")]);
        let (entries, err) = extract_all(&bytes);
        assert!(err.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "safe.txt");
    }
}
