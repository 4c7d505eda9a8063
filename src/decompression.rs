use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::Path;

use crate::error::PipelineError;

type ChainReader = Chain<Cursor<Vec<u8>>, File>;
type GzipReader = BufReader<MultiGzDecoder<ChainReader>>;
type ZstdReader = BufReader<zstd::Decoder<'static, BufReader<ChainReader>>>;
type PlainReader = BufReader<ChainReader>;

/// Compression detected from a source's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Plain,
    /// 1F 8B 08
    Gzip,
    /// 28 B5 2F FD
    Zstd,
}

impl Compression {
    pub fn detect(head: &[u8]) -> Self {
        if head.len() >= 3 && head[..3] == [0x1F, 0x8B, 0x08] {
            Compression::Gzip
        } else if head.len() >= 4 && head[..4] == [0x28, 0xB5, 0x2F, 0xFD] {
            Compression::Zstd
        } else {
            Compression::Plain
        }
    }
}

/// Streaming reader over a source file that transparently inflates gzip and
/// zstd input.
pub enum DecompressionReader {
    Gzip(GzipReader),
    /// zstd::Decoder wants BufRead input and hands back Read output
    Zstd(ZstdReader),
    Plain(PlainReader),
}

impl std::fmt::Debug for DecompressionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecompressionReader::{:?}", self.compression())
    }
}

impl BufRead for DecompressionReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            DecompressionReader::Gzip(reader) => reader.fill_buf(),
            DecompressionReader::Zstd(reader) => reader.fill_buf(),
            DecompressionReader::Plain(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            DecompressionReader::Gzip(reader) => reader.consume(amt),
            DecompressionReader::Zstd(reader) => reader.consume(amt),
            DecompressionReader::Plain(reader) => reader.consume(amt),
        }
    }
}

impl Read for DecompressionReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            DecompressionReader::Gzip(reader) => reader.read(buf),
            DecompressionReader::Zstd(reader) => reader.read(buf),
            DecompressionReader::Plain(reader) => reader.read(buf),
        }
    }
}

impl DecompressionReader {
    /// Open `path` as a record source.
    ///
    /// A missing path maps to `FileNotFound` and a zero-length file to
    /// `EmptyFile`. ZIP archives are rejected up front since they cannot be
    /// streamed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();

        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            if extension.eq_ignore_ascii_case("zip") {
                return Err(PipelineError::Io(format!(
                    "ZIP archives are not supported, only gzip and zstd sources can be streamed (extract first: unzip {})",
                    path.display()
                )));
            }
        }

        let mut file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(PipelineError::EmptyFile);
        }

        let mut head = [0u8; 4];
        let n = read_head(&mut file, &mut head)?;

        // Put the sniffed bytes back in front of the rest of the file
        let chained = Cursor::new(head[..n].to_vec()).chain(file);

        match Compression::detect(&head[..n]) {
            Compression::Gzip => Ok(DecompressionReader::Gzip(BufReader::new(
                MultiGzDecoder::new(chained),
            ))),
            Compression::Zstd => {
                let decoder = zstd::Decoder::new(chained)?;
                Ok(DecompressionReader::Zstd(BufReader::new(decoder)))
            }
            Compression::Plain => Ok(DecompressionReader::Plain(BufReader::new(chained))),
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            DecompressionReader::Gzip(_) => Compression::Gzip,
            DecompressionReader::Zstd(_) => Compression::Zstd,
            DecompressionReader::Plain(_) => Compression::Plain,
        }
    }
}

/// Fill `head` as far as the file allows; short files yield fewer bytes.
fn read_head(file: &mut File, head: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
