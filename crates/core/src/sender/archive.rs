//! Zip packaging of outgoing documents and returned receipts.

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ProtocolError;

/// Pack `xml` as the single `{stem}.xml` entry of a new archive.
pub fn pack(stem: &str, xml: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer
        .start_file(format!("{}.xml", stem), options)
        .map_err(|e| ProtocolError::Archive(e.to_string()))?;
    writer
        .write_all(xml)
        .map_err(|e| ProtocolError::Archive(e.to_string()))?;

    let cursor = writer
        .finish()
        .map_err(|e| ProtocolError::Archive(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Return the first XML entry of an archive.
///
/// Receipt archives carry a `dummy/` directory entry next to the XML, so
/// entries are matched by extension rather than position.
pub fn first_xml_entry(archive: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut zip =
        ZipArchive::new(Cursor::new(archive)).map_err(|e| ProtocolError::Archive(e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ProtocolError::Archive(e.to_string()))?;
        if !entry.is_file() || !entry.name().to_ascii_lowercase().ends_with(".xml") {
            continue;
        }
        let mut xml = Vec::new();
        entry
            .read_to_end(&mut xml)
            .map_err(|e| ProtocolError::Archive(e.to_string()))?;
        return Ok(xml);
    }

    Err(ProtocolError::Archive("archive has no XML entry".to_string()))
}
