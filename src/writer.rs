use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use bio::io::fastq;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

pub enum WriterMaybeGzip {
    GZIP(GzEncoder<File>),
    UNCOMPRESSED(File),
    NULL(io::Sink),
}

impl Write for WriterMaybeGzip {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriterMaybeGzip::GZIP(backer) => backer.write(buf),
            WriterMaybeGzip::UNCOMPRESSED(backer) => backer.write(buf),
            WriterMaybeGzip::NULL(backer) => backer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriterMaybeGzip::GZIP(backer) => backer.flush(),
            WriterMaybeGzip::UNCOMPRESSED(backer) => backer.flush(),
            WriterMaybeGzip::NULL(backer) => backer.flush(),
        }
    }
}

pub type FastqWriter = fastq::Writer<WriterMaybeGzip>;

/// Open a FASTQ writer, gzip-compressed when the path ends in `.gz` or `.gzip`.
///
/// Refuses to overwrite a nonempty file.
pub fn writer_maybe_gzip(path: &Path) -> io::Result<(FastqWriter, bool)> {
    if path.metadata().is_ok_and(|meta| meta.len() > 0) {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("refusing to overwrite nonempty file {}", path.display()),
        ));
    }

    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;

    if path.extension().is_some_and(|ext| ext == "gzip" || ext == "gz") {
        Ok((
            fastq::Writer::from_bufwriter(BufWriter::new(WriterMaybeGzip::GZIP(GzEncoder::new(
                file,
                Compression::default(),
            )))),
            true,
        ))
    } else {
        Ok((fastq::Writer::from_bufwriter(BufWriter::new(WriterMaybeGzip::UNCOMPRESSED(file))), false))
    }
}

pub fn writer_from_path(path: &Path) -> io::Result<FastqWriter> {
    let (writer, was_compressed) = writer_maybe_gzip(path)?;
    if was_compressed {
        debug!("writing {} as a gzip", path.display());
    }
    Ok(writer)
}

/// A writer that discards everything it is given.
pub fn null_writer() -> FastqWriter {
    fastq::Writer::from_bufwriter(BufWriter::new(WriterMaybeGzip::NULL(io::sink())))
}

pub fn make_writer_pair(output_paths: (&Path, &Path)) -> io::Result<(FastqWriter, FastqWriter)> {
    Ok((writer_from_path(output_paths.0)?, writer_from_path(output_paths.1)?))
}
