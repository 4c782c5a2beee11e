//! Protobuf messages for the OSM PBF container, written out by hand against
//! the published `fileformat.proto` / `osmformat.proto` schemas. Field
//! numbers and types must match the wire format exactly; unknown fields are
//! skipped by the decoder.

/// Framing header preceding every blob. `r#type` is "OSMHeader" or "OSMData".
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobHeader {
    #[prost(string, required, tag = "1")]
    pub r#type: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub indexdata: Option<Vec<u8>>,
    #[prost(int32, required, tag = "3")]
    pub datasize: i32,
}

/// A blob body: exactly one of the payload fields is expected to be set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Blob {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub raw: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "2")]
    pub raw_size: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub zlib_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub lzma_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub obsolete_bzip2_data: Option<Vec<u8>>,
}

/// Dataset-wide bounding box in nanodegrees.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderBBox {
    #[prost(sint64, required, tag = "1")]
    pub left: i64,
    #[prost(sint64, required, tag = "2")]
    pub right: i64,
    #[prost(sint64, required, tag = "3")]
    pub top: i64,
    #[prost(sint64, required, tag = "4")]
    pub bottom: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderBlock {
    #[prost(message, optional, tag = "1")]
    pub bbox: Option<HeaderBBox>,
    #[prost(string, repeated, tag = "4")]
    pub required_features: Vec<String>,
    #[prost(string, repeated, tag = "5")]
    pub optional_features: Vec<String>,
    #[prost(string, optional, tag = "16")]
    pub writingprogram: Option<String>,
    #[prost(string, optional, tag = "17")]
    pub source: Option<String>,
    #[prost(int64, optional, tag = "32")]
    pub osmosis_replication_timestamp: Option<i64>,
    #[prost(int64, optional, tag = "33")]
    pub osmosis_replication_sequence_number: Option<i64>,
    #[prost(string, optional, tag = "34")]
    pub osmosis_replication_base_url: Option<String>,
}

/// Block-local string table; entry 0 is always the empty string.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringTable {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub s: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrimitiveBlock {
    #[prost(message, required, tag = "1")]
    pub stringtable: StringTable,
    #[prost(message, repeated, tag = "2")]
    pub primitivegroup: Vec<PrimitiveGroup>,
    /// Granularity of lat/lon values in nanodegrees.
    #[prost(int32, optional, tag = "17")]
    pub granularity_raw: Option<i32>,
    #[prost(int32, optional, tag = "18")]
    pub date_granularity: Option<i32>,
    #[prost(int64, optional, tag = "19")]
    pub lat_offset_raw: Option<i64>,
    #[prost(int64, optional, tag = "20")]
    pub lon_offset_raw: Option<i64>,
}

impl PrimitiveBlock {
    #[inline]
    pub fn granularity(&self) -> i64 {
        i64::from(self.granularity_raw.unwrap_or(100))
    }

    #[inline]
    pub fn lat_offset(&self) -> i64 {
        self.lat_offset_raw.unwrap_or(0)
    }

    #[inline]
    pub fn lon_offset(&self) -> i64 {
        self.lon_offset_raw.unwrap_or(0)
    }
}

/// Carries at most one of: dense nodes, sparse nodes, ways, relations.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrimitiveGroup {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<Node>,
    #[prost(message, optional, tag = "2")]
    pub dense: Option<DenseNodes>,
    #[prost(message, repeated, tag = "3")]
    pub ways: Vec<Way>,
    #[prost(message, repeated, tag = "4")]
    pub relations: Vec<Relation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Node {
    #[prost(sint64, required, tag = "1")]
    pub id: i64,
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    #[prost(sint64, required, tag = "8")]
    pub lat: i64,
    #[prost(sint64, required, tag = "9")]
    pub lon: i64,
}

/// Delta-encoded node pack. `keys_vals` is a run-length list of
/// (key, value) string ids terminated by 0 per node; empty when no node in
/// the block has tags.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DenseNodes {
    #[prost(sint64, repeated, tag = "1")]
    pub id: Vec<i64>,
    #[prost(sint64, repeated, tag = "8")]
    pub lat: Vec<i64>,
    #[prost(sint64, repeated, tag = "9")]
    pub lon: Vec<i64>,
    #[prost(int32, repeated, tag = "10")]
    pub keys_vals: Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Way {
    #[prost(int64, required, tag = "1")]
    pub id: i64,
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    /// Delta-encoded node refs.
    #[prost(sint64, repeated, tag = "8")]
    pub refs: Vec<i64>,
}

/// Member types on the wire: 0 = node, 1 = way, 2 = relation.
pub const MEMBER_NODE: i32 = 0;
pub const MEMBER_WAY: i32 = 1;
pub const MEMBER_RELATION: i32 = 2;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Relation {
    #[prost(int64, required, tag = "1")]
    pub id: i64,
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    #[prost(int32, repeated, tag = "8")]
    pub roles_sid: Vec<i32>,
    /// Delta-encoded member ids, parallel to `roles_sid` and `types`.
    #[prost(sint64, repeated, tag = "9")]
    pub memids: Vec<i64>,
    #[prost(int32, repeated, tag = "10")]
    pub types: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn blob_header_round_trip() {
        let header =
            BlobHeader { r#type: "OSMData".to_string(), indexdata: None, datasize: 1234 };
        let bytes = header.encode_to_vec();
        let decoded = BlobHeader::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn primitive_block_defaults() {
        let block = PrimitiveBlock::default();
        assert_eq!(block.granularity(), 100);
        assert_eq!(block.lat_offset(), 0);
        assert_eq!(block.lon_offset(), 0);
    }

    #[test]
    fn dense_nodes_round_trip() {
        let block = PrimitiveBlock {
            stringtable: StringTable {
                s: vec![b"".to_vec(), b"highway".to_vec(), b"crossing".to_vec()],
            },
            primitivegroup: vec![PrimitiveGroup {
                dense: Some(DenseNodes {
                    id: vec![100, 1, 1],
                    lat: vec![437_000_000, 1000, 1000],
                    lon: vec![74_000_000, -2000, 500],
                    keys_vals: vec![1, 2, 0, 0, 1, 2, 0],
                }),
                ..Default::default()
            }],
            granularity_raw: Some(100),
            ..Default::default()
        };
        let bytes = block.encode_to_vec();
        let decoded = PrimitiveBlock::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, block);
    }
}
