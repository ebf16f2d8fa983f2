use std::fs::File;
use std::io;
use std::io::{BufReader, Read};
use std::path::Path;

use bio::io::fastq;
use flate2::bufread::MultiGzDecoder;
use log::debug;

pub enum ReaderMaybeGzip {
    GZIP(MultiGzDecoder<BufReader<File>>),
    UNCOMPRESSED(BufReader<File>),
}

impl Read for ReaderMaybeGzip {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReaderMaybeGzip::GZIP(backer) => backer.read(buf),
            ReaderMaybeGzip::UNCOMPRESSED(backer) => backer.read(buf),
        }
    }
}

pub type FastqReader = fastq::Reader<BufReader<ReaderMaybeGzip>>;

/// Open `path` as a byte stream, decompressing it if it starts with the gzip magic.
pub fn open_maybe_gzip(path: &Path) -> io::Result<(ReaderMaybeGzip, bool)> {
    let mut magic = Vec::with_capacity(2);
    File::open(path)?.take(2).read_to_end(&mut magic)?;

    let reopen = BufReader::new(File::open(path)?);

    if magic == [0x1f, 0x8b] {
        Ok((ReaderMaybeGzip::GZIP(MultiGzDecoder::new(reopen)), true))
    } else {
        Ok((ReaderMaybeGzip::UNCOMPRESSED(reopen), false))
    }
}

pub fn reader_maybe_gzip(path: &Path) -> io::Result<(FastqReader, bool)> {
    let (stream, was_compressed) = open_maybe_gzip(path)?;
    Ok((fastq::Reader::from_bufread(BufReader::new(stream)), was_compressed))
}

pub fn reader_from_path(path: &Path) -> io::Result<FastqReader> {
    let (reader, was_compressed) = reader_maybe_gzip(path)?;
    if was_compressed {
        debug!("parsing {} as a gzip", path.display());
    }
    Ok(reader)
}

pub fn make_reader_pair(input_paths: (&Path, &Path)) -> io::Result<(FastqReader, FastqReader)> {
    Ok((reader_from_path(input_paths.0)?, reader_from_path(input_paths.1)?))
}

/// True when the file holds no data once decompressed.
pub fn is_empty_fastq(path: &Path) -> io::Result<bool> {
    let (mut stream, _) = open_maybe_gzip(path)?;
    let mut first = [0u8; 1];
    loop {
        match stream.read(&mut first) {
            Ok(n) => return Ok(n == 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
