//! The slice archive: a single-file container of named blobs.
//!
//! Blobs live in an uncompressed tar stream under reserved names:
//! `segments/<table_id>/<index>` for copy-format payloads and `manifest`
//! for the JSON manifest, which is always the final entry.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::manifest::Manifest;

fn segment_name(table_id: &str, index: usize) -> String {
    format!("segments/{table_id}/{index}")
}

/// Appends segment blobs as they are produced and the manifest at close.
pub struct SliceWriter<W: Write> {
    builder: tar::Builder<W>,
}

impl<W: Write> SliceWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            builder: tar::Builder::new(out),
        }
    }

    /// Append one segment payload of `len` bytes.
    pub fn append_segment(
        &mut self,
        table_id: &str,
        index: usize,
        len: u64,
        payload: &mut impl Read,
    ) -> io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(len);
        header.set_mode(0o644);
        self.builder
            .append_data(&mut header, segment_name(table_id, index), payload)
    }

    /// Write the manifest blob and finalize the archive, handing back the
    /// underlying output.
    pub fn finish(mut self, manifest: &Manifest) -> io::Result<W> {
        let json = serde_json::to_vec(manifest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(json.len() as u64);
        header.set_mode(0o644);
        self.builder
            .append_data(&mut header, "manifest", Cursor::new(json))?;
        let mut out = self.builder.into_inner()?;
        out.flush()?;
        Ok(out)
    }
}

/// Random-access reads over a slice archive.
///
/// The constructor takes one sequential pass to index blob names to their
/// byte ranges; blobs are then served by seeking the underlying input.
pub struct SliceReader<R: Read + Seek> {
    input: R,
    blobs: HashMap<String, (u64, u64)>,
}

impl<R: Read + Seek> SliceReader<R> {
    pub fn new(input: R) -> io::Result<Self> {
        let mut archive = tar::Archive::new(input);
        let mut blobs = HashMap::new();
        for entry in archive.entries()? {
            let entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            blobs.insert(name, (entry.raw_file_position(), entry.size()));
        }
        Ok(Self {
            input: archive.into_inner(),
            blobs,
        })
    }

    fn blob(&mut self, name: &str) -> io::Result<io::Take<&mut R>> {
        let &(position, len) = self.blobs.get(name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("slice archive has no blob {name}"),
            )
        })?;
        self.input.seek(SeekFrom::Start(position))?;
        Ok((&mut self.input).take(len))
    }

    pub fn manifest(&mut self) -> io::Result<Manifest> {
        let blob = self.blob("manifest")?;
        serde_json::from_reader(blob).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Open one segment payload for reading.
    pub fn open_segment(&mut self, table_id: &str, index: usize) -> io::Result<impl Read + '_> {
        self.blob(&segment_name(table_id, index))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::manifest::{ManifestSegment, ManifestTable};

    fn sample_manifest() -> Manifest {
        Manifest {
            tables: vec![ManifestTable {
                id: "t".into(),
                schema: "public".into(),
                name: "things".into(),
                columns: vec!["id".into()],
                segments: vec![
                    ManifestSegment { row_count: 2 },
                    ManifestSegment { row_count: 1 },
                ],
            }],
        }
    }

    fn sample_archive() -> Cursor<Vec<u8>> {
        let mut writer = SliceWriter::new(Cursor::new(Vec::new()));
        writer
            .append_segment("t", 0, 8, &mut Cursor::new(&b"1\tx\n2\ty\n"[..]))
            .unwrap();
        writer
            .append_segment("t", 1, 4, &mut Cursor::new(&b"3\tz\n"[..]))
            .unwrap();
        let mut out = writer.finish(&sample_manifest()).unwrap();
        out.seek(SeekFrom::Start(0)).unwrap();
        out
    }

    #[test]
    fn roundtrip() {
        let mut reader = SliceReader::new(sample_archive()).unwrap();
        assert_eq!(reader.manifest().unwrap(), sample_manifest());

        let mut payload = String::new();
        reader
            .open_segment("t", 1)
            .unwrap()
            .read_to_string(&mut payload)
            .unwrap();
        assert_eq!(payload, "3\tz\n");

        payload.clear();
        reader
            .open_segment("t", 0)
            .unwrap()
            .read_to_string(&mut payload)
            .unwrap();
        assert_eq!(payload, "1\tx\n2\ty\n");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let mut reader = SliceReader::new(sample_archive()).unwrap();
        let err = reader.open_segment("t", 2).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err = reader.open_segment("other", 0).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn manifest_is_required() {
        let mut writer = SliceWriter::new(Cursor::new(Vec::new()));
        writer
            .append_segment("t", 0, 1, &mut Cursor::new(&b"x"[..]))
            .unwrap();
        // Abandon without finish(); the manifest blob never lands.
        let out = {
            let mut builder = writer.builder;
            builder.finish().unwrap();
            let mut out = builder.into_inner().unwrap();
            out.seek(SeekFrom::Start(0)).unwrap();
            out
        };
        let mut reader = SliceReader::new(out).unwrap();
        assert_eq!(reader.manifest().unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
