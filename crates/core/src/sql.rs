//! Linear SQL output: a UTF-8 stream of three sequential regions —
//! pre-data DDL, `COPY ... FROM stdin;` data frames, post-data DDL.
//!
//! The DDL regions are written verbatim by an external collaborator
//! (`pg_dump`); this writer only enforces region ordering and frames the
//! data payloads.

use std::io::{self, Read, Write};

use crate::pg;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Region {
    PreData,
    Data,
    PostData,
}

pub struct SqlWriter<W: Write> {
    out: W,
    region: Region,
}

impl<W: Write> SqlWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            region: Region::PreData,
        }
    }

    /// The pre-data region. Only available before the first data frame.
    pub fn predata_writer(&mut self) -> io::Result<&mut W> {
        if self.region != Region::PreData {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pre-data region already closed",
            ));
        }
        Ok(&mut self.out)
    }

    /// Write one data frame: `COPY <table> (<columns>) FROM stdin;`, the
    /// copy-format payload, and the `\.` terminator.
    pub fn write_frame(
        &mut self,
        schema: &str,
        name: &str,
        columns: &[String],
        payload: &mut impl Read,
    ) -> io::Result<u64> {
        if self.region == Region::PostData {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "data region already closed",
            ));
        }
        self.region = Region::Data;

        writeln!(
            self.out,
            "COPY {} ({}) FROM stdin;",
            pg::qualified(schema, name),
            pg::column_list(columns),
        )?;
        let copied = io::copy(payload, &mut self.out)?;
        self.out.write_all(b"\\.\n\n")?;
        Ok(copied)
    }

    /// The post-data region; closes the data region.
    pub fn postdata_writer(&mut self) -> io::Result<&mut W> {
        self.region = Region::PostData;
        Ok(&mut self.out)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn regions_in_order() {
        let mut writer = SqlWriter::new(Vec::new());
        writer
            .predata_writer()
            .unwrap()
            .write_all(b"CREATE TABLE a ();\n")
            .unwrap();
        writer
            .write_frame(
                "public",
                "a",
                &["id".into(), "label".into()],
                &mut Cursor::new(&b"1\tx\n"[..]),
            )
            .unwrap();
        writer
            .postdata_writer()
            .unwrap()
            .write_all(b"ALTER TABLE a ADD PRIMARY KEY (id);\n")
            .unwrap();

        let out = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(
            out,
            "CREATE TABLE a ();\n\
             COPY \"public\".\"a\" (\"id\", \"label\") FROM stdin;\n\
             1\tx\n\
             \\.\n\n\
             ALTER TABLE a ADD PRIMARY KEY (id);\n"
        );
    }

    #[test]
    fn predata_unavailable_after_first_frame() {
        let mut writer = SqlWriter::new(Vec::new());
        writer
            .write_frame("public", "a", &["id".into()], &mut Cursor::new(&b""[..]))
            .unwrap();
        assert!(writer.predata_writer().is_err());
    }

    #[test]
    fn frames_unavailable_after_postdata() {
        let mut writer = SqlWriter::new(Vec::new());
        writer.postdata_writer().unwrap();
        assert!(writer
            .write_frame("public", "a", &["id".into()], &mut Cursor::new(&b""[..]))
            .is_err());
    }
}
