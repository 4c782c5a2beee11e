//! Streaming reader for the OSM PBF container.
//!
//! A PBF file is a sequence of fileblocks: a big-endian `u32` length, a
//! `BlobHeader`, and a `Blob` body that inflates into a `HeaderBlock` (at
//! most once, first) or a `PrimitiveBlock`. The reader yields blobs lazily
//! in file order; blobs decode independently, so a host may fan decoding
//! out to other threads.

pub mod decode;
pub mod proto;

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use prost::Message;

use crate::error::{Error, Result};

/// Framing cap for the BlobHeader message.
const MAX_BLOB_HEADER_SIZE: u32 = 64 * 1024;
/// Framing cap for a blob body.
const MAX_BLOB_MESSAGE_SIZE: i32 = 32 * 1024 * 1024;

/// Features this reader implements; anything else in `required_features`
/// aborts ingestion.
pub const SUPPORTED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes"];

/// The content type of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobKind {
    /// Contains a `HeaderBlock`.
    OsmHeader,
    /// Contains a `PrimitiveBlock`.
    OsmData,
    /// Anything else; parsers skip blob types they do not expect.
    Unknown(String),
}

/// One undecoded fileblock: its header plus the (possibly compressed) body.
#[derive(Debug)]
pub struct Blob {
    header: proto::BlobHeader,
    body: proto::Blob,
}

impl Blob {
    pub fn kind(&self) -> BlobKind {
        match self.header.r#type.as_str() {
            "OSMHeader" => BlobKind::OsmHeader,
            "OSMData" => BlobKind::OsmData,
            other => BlobKind::Unknown(other.to_string()),
        }
    }

    /// Inflate (or pass through) the payload bytes.
    fn payload(&self) -> Result<Vec<u8>> {
        if let Some(raw) = &self.body.raw {
            return Ok(raw.clone());
        }
        if let Some(zlib) = &self.body.zlib_data {
            let mut decoder = ZlibDecoder::new(zlib.as_slice());
            let capacity = self.body.raw_size.unwrap_or(0).max(0) as usize;
            let mut out = Vec::with_capacity(capacity);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompress(format!("zlib: {e}")))?;
            return Ok(out);
        }
        if self.body.lzma_data.is_some() {
            return Err(Error::Decompress("lzma blobs are not supported".to_string()));
        }
        if self.body.obsolete_bzip2_data.is_some() {
            return Err(Error::Decompress("bzip2 blobs are not supported".to_string()));
        }
        Err(Error::Decompress("blob has no payload field".to_string()))
    }

    /// Decode as a `HeaderBlock`, verifying `required_features`.
    pub fn decode_header(&self) -> Result<proto::HeaderBlock> {
        let bytes = self.payload()?;
        let header = proto::HeaderBlock::decode(bytes.as_slice())?;
        for feature in &header.required_features {
            if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(Error::UnknownRequiredFeature(feature.clone()));
            }
        }
        Ok(header)
    }

    /// Decode as a `PrimitiveBlock`.
    pub fn decode_primitive(&self) -> Result<proto::PrimitiveBlock> {
        let bytes = self.payload()?;
        Ok(proto::PrimitiveBlock::decode(bytes.as_slice())?)
    }
}

/// Iterator over the fileblocks of a PBF stream.
pub struct BlobReader<R: Read> {
    reader: R,
    finished: bool,
}

impl<R: Read> BlobReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, finished: false }
    }

    fn read_blob(&mut self) -> Result<Option<Blob>> {
        // A clean EOF before the length prefix ends the stream; EOF anywhere
        // later is a truncated file.
        let mut first = [0u8; 1];
        if self.reader.read(&mut first)? == 0 {
            return Ok(None);
        }
        let rest = self
            .reader
            .read_u24::<BigEndian>()
            .map_err(|_| Error::ShortRead("truncated fileblock length".to_string()))?;
        let header_size = (u32::from(first[0]) << 24) | rest;
        if header_size > MAX_BLOB_HEADER_SIZE {
            return Err(Error::BadMagic(format!(
                "blob header of {header_size} bytes exceeds the {MAX_BLOB_HEADER_SIZE} byte cap"
            )));
        }

        let mut header_bytes = vec![0u8; header_size as usize];
        self.reader
            .read_exact(&mut header_bytes)
            .map_err(|_| Error::ShortRead("truncated blob header".to_string()))?;
        let header = proto::BlobHeader::decode(header_bytes.as_slice())?;

        if header.datasize < 0 || header.datasize > MAX_BLOB_MESSAGE_SIZE {
            return Err(Error::Decode(format!("invalid blob size {}", header.datasize)));
        }
        let mut body_bytes = vec![0u8; header.datasize as usize];
        self.reader
            .read_exact(&mut body_bytes)
            .map_err(|_| Error::ShortRead("truncated blob body".to_string()))?;
        let body = proto::Blob::decode(body_bytes.as_slice())?;

        Ok(Some(Blob { header, body }))
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_blob() {
            Ok(Some(blob)) => Some(Ok(blob)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                // Stop after the first framing error.
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Builders that frame prost messages into PBF byte streams, so tests
    //! can exercise the full pipeline without fixture files.

    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub fn frame(kind: &str, payload: &[u8], compress: bool) -> Vec<u8> {
        let body = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload).unwrap();
            proto::Blob {
                raw: None,
                raw_size: Some(payload.len() as i32),
                zlib_data: Some(encoder.finish().unwrap()),
                lzma_data: None,
                obsolete_bzip2_data: None,
            }
        } else {
            proto::Blob {
                raw: Some(payload.to_vec()),
                raw_size: Some(payload.len() as i32),
                zlib_data: None,
                lzma_data: None,
                obsolete_bzip2_data: None,
            }
        };
        let body_bytes = body.encode_to_vec();
        let header = proto::BlobHeader {
            r#type: kind.to_string(),
            indexdata: None,
            datasize: body_bytes.len() as i32,
        };
        let header_bytes = header.encode_to_vec();

        let mut out = Vec::new();
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&body_bytes);
        out
    }

    pub fn header_block(required: &[&str], bbox_nano: Option<[i64; 4]>) -> proto::HeaderBlock {
        proto::HeaderBlock {
            bbox: bbox_nano.map(|[left, bottom, right, top]| proto::HeaderBBox {
                left,
                right,
                top,
                bottom,
            }),
            required_features: required.iter().map(|s| s.to_string()).collect(),
            optional_features: Vec::new(),
            writingprogram: Some("osmix-tests".to_string()),
            source: None,
            osmosis_replication_timestamp: None,
            osmosis_replication_sequence_number: None,
            osmosis_replication_base_url: None,
        }
    }
}
