use std::io::Read;

use crate::column::{NodeColumn, RelationColumn, WayColumn};
use crate::entity::{Node, Relation, Tags, Way};
use crate::error::{Error, EntityKind, Result};
use crate::pbf::decode::{coord, DenseTagRuns, IntoDelta};
use crate::pbf::{proto, BlobKind, BlobReader};
use crate::progress::{CancelFlag, Progress};
use crate::spatial::Bbox;
use crate::store::{Store, StoreInfo};
use crate::strings::StringTable;
use crate::tags::TagScratch;

/// Ingestion options: per-kind entity filters, progress reporting, and
/// cancellation. Filters see fully materialized entities; supplying any
/// filter marks the resulting store partial.
#[derive(Default)]
pub struct BuildOptions {
    pub node_filter: Option<Box<dyn Fn(&Node) -> bool + Send>>,
    pub way_filter: Option<Box<dyn Fn(&Way) -> bool + Send>>,
    pub relation_filter: Option<Box<dyn Fn(&Relation) -> bool + Send>>,
    pub progress: Progress,
    pub cancel: CancelFlag,
}

/// Ingestion stage. A well-formed source emits all nodes before any way and
/// all ways before any relation; each transition finalizes the closing
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Nodes,
    Ways,
    Relations,
}

/// Incrementally assembles a store from already-materialized entities.
/// This is the construction path shared by changeset application, the
/// non-PBF format adapters, and tests.
pub struct StoreAssembler {
    info: StoreInfo,
    strings: StringTable,
    nodes: NodeColumn,
    ways: WayColumn,
    relations: RelationColumn,
}

impl StoreAssembler {
    pub fn new(partial: bool) -> Self {
        Self {
            info: StoreInfo { partial, ..StoreInfo::default() },
            strings: StringTable::new(),
            nodes: NodeColumn::new(),
            ways: WayColumn::new(),
            relations: RelationColumn::new(),
        }
    }

    pub fn with_info(info: StoreInfo) -> Self {
        Self {
            info,
            strings: StringTable::new(),
            nodes: NodeColumn::new(),
            ways: WayColumn::new(),
            relations: RelationColumn::new(),
        }
    }

    fn intern_tags(&mut self, tags: &Tags) -> TagScratch {
        tags.iter().map(|(k, v)| (self.strings.intern(k), self.strings.intern(v))).collect()
    }

    pub fn push_node(&mut self, node: &Node) {
        let mut scratch = self.intern_tags(&node.tags);
        self.nodes.push(node.id, node.lon, node.lat, &mut scratch);
    }

    pub fn push_way(&mut self, way: &Way) -> Result<()> {
        let mut scratch = self.intern_tags(&way.tags);
        self.ways.push(way.id, &way.refs, &mut scratch)
    }

    pub fn push_relation(&mut self, relation: &Relation) -> Result<()> {
        let mut scratch = self.intern_tags(&relation.tags);
        let members: Vec<(EntityKind, i64, u32)> = relation
            .members
            .iter()
            .map(|m| (m.kind, m.ref_id, self.strings.intern(&m.role)))
            .collect();
        self.relations.push(relation.id, &members, &mut scratch)
    }

    /// Finalize every column and freeze the store.
    pub fn finish(mut self) -> Result<Store> {
        let partial = self.info.partial;
        self.nodes.finalize()?;
        self.ways.finalize(&self.nodes, partial)?;
        self.relations.finalize(&self.nodes, &self.ways, partial)?;
        Ok(Store {
            info: self.info,
            strings: self.strings,
            nodes: self.nodes,
            ways: self.ways,
            relations: self.relations,
        })
    }
}

/// Streaming PBF ingestion: drives a [`BlobReader`], translates block-local
/// string ids into the global table, delta-decodes entity arrays, and
/// finalizes each column at its phase boundary.
pub(crate) fn build<R: Read>(reader: R, mut options: BuildOptions) -> Result<Store> {
    let mut builder = Builder::new(&options);
    let mut seen_header = false;
    let mut seen_data = false;
    let mut block_index = 0usize;

    for blob in BlobReader::new(reader) {
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let blob = blob?;
        match blob.kind() {
            BlobKind::OsmHeader => {
                if seen_header {
                    return Err(Error::corrupt("second OSMHeader blob"));
                }
                if seen_data {
                    return Err(Error::corrupt("OSMHeader blob after OSMData"));
                }
                seen_header = true;
                builder.ingest_header(&blob.decode_header()?);
            }
            BlobKind::OsmData => {
                seen_data = true;
                let block = blob.decode_primitive()?;
                builder.ingest_block(&block, block_index, &options)?;
                block_index += 1;
                options.progress.emit(&format!(
                    "ingested {} nodes, {} ways, {} relations",
                    builder.nodes.len(),
                    builder.ways.len(),
                    builder.relations.len()
                ));
            }
            BlobKind::Unknown(other) => {
                log::debug!("skipping unknown blob type {other:?}");
            }
        }
    }

    let store = builder.finish()?;
    options.progress.emit_now(&format!(
        "store ready: {} nodes, {} ways, {} relations, {} strings",
        store.nodes.len(),
        store.ways.len(),
        store.relations.len(),
        store.strings.len()
    ));
    Ok(store)
}

struct Builder {
    info: StoreInfo,
    strings: StringTable,
    nodes: NodeColumn,
    ways: WayColumn,
    relations: RelationColumn,
    phase: Phase,
}

impl Builder {
    fn new(options: &BuildOptions) -> Self {
        let filtered = options.node_filter.is_some()
            || options.way_filter.is_some()
            || options.relation_filter.is_some();
        Self {
            info: StoreInfo { partial: filtered, ..StoreInfo::default() },
            strings: StringTable::new(),
            nodes: NodeColumn::new(),
            ways: WayColumn::new(),
            relations: RelationColumn::new(),
            phase: Phase::Nodes,
        }
    }

    fn ingest_header(&mut self, header: &proto::HeaderBlock) {
        if let Some(bbox) = &header.bbox {
            // Nanodegrees; a declared bbox marks a clipped extract.
            self.info.bbox = Some(Bbox::new(
                bbox.left as f64 * 1e-9,
                bbox.bottom as f64 * 1e-9,
                bbox.right as f64 * 1e-9,
                bbox.top as f64 * 1e-9,
            ));
            self.info.partial = true;
        }
        self.info.required_features = header.required_features.clone();
        self.info.optional_features = header.optional_features.clone();
        self.info.writing_program = header.writingprogram.clone();
        self.info.source = header.source.clone();
        self.info.replication_timestamp = header.osmosis_replication_timestamp;
        self.info.replication_sequence = header.osmosis_replication_sequence_number;
    }

    /// Move to `target`, finalizing each column whose phase closes.
    fn advance_phase(&mut self, target: Phase, context: &str) -> Result<()> {
        if target < self.phase {
            return Err(Error::corrupt(format!(
                "{context}: {target:?} group after the source moved on to {:?}",
                self.phase
            )));
        }
        while self.phase < target {
            match self.phase {
                Phase::Nodes => {
                    self.nodes.finalize()?;
                    self.phase = Phase::Ways;
                }
                Phase::Ways => {
                    self.ways.finalize(&self.nodes, self.info.partial)?;
                    self.phase = Phase::Relations;
                }
                Phase::Relations => {}
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Store> {
        self.advance_phase(Phase::Relations, "finish")?;
        self.relations.finalize(&self.nodes, &self.ways, self.info.partial)?;
        Ok(Store {
            info: self.info,
            strings: self.strings,
            nodes: self.nodes,
            ways: self.ways,
            relations: self.relations,
        })
    }

    fn ingest_block(
        &mut self,
        block: &proto::PrimitiveBlock,
        block_index: usize,
        options: &BuildOptions,
    ) -> Result<()> {
        // Translate the block-local string table into the global one.
        let mut translate = Vec::with_capacity(block.stringtable.s.len());
        for bytes in &block.stringtable.s {
            let s = std::str::from_utf8(bytes).map_err(|e| {
                Error::Decode(format!("block {block_index}: string table is not UTF-8: {e}"))
            })?;
            translate.push(self.strings.intern(s));
        }

        for (group_index, group) in block.primitivegroup.iter().enumerate() {
            let context = format!("block {block_index}, group {group_index}");
            let has_nodes = group.dense.is_some() || !group.nodes.is_empty();
            let kinds_present = usize::from(has_nodes)
                + usize::from(!group.ways.is_empty())
                + usize::from(!group.relations.is_empty());
            if kinds_present > 1 {
                return Err(Error::corrupt(format!("{context}: mixed primitive group")));
            }

            if let Some(dense) = &group.dense {
                self.advance_phase(Phase::Nodes, &context)?;
                self.ingest_dense(dense, block, &translate, &context, options)?;
            } else if !group.nodes.is_empty() {
                self.advance_phase(Phase::Nodes, &context)?;
                self.ingest_nodes(&group.nodes, block, &translate, &context, options)?;
            } else if !group.ways.is_empty() {
                self.advance_phase(Phase::Ways, &context)?;
                self.ingest_ways(&group.ways, &translate, &context, options)?;
            } else if !group.relations.is_empty() {
                self.advance_phase(Phase::Relations, &context)?;
                self.ingest_relations(&group.relations, &translate, &context, options)?;
            }
        }
        Ok(())
    }

    fn ingest_dense(
        &mut self,
        dense: &proto::DenseNodes,
        block: &proto::PrimitiveBlock,
        translate: &[u32],
        context: &str,
        options: &BuildOptions,
    ) -> Result<()> {
        let count = dense.id.len();
        if dense.lat.len() != count || dense.lon.len() != count {
            return Err(Error::corrupt(format!(
                "{context}: dense arrays disagree ({count} ids, {} lats, {} lons)",
                dense.lat.len(),
                dense.lon.len()
            )));
        }
        let runs: Vec<&[i32]> = DenseTagRuns::new(&dense.keys_vals).collect();
        if !runs.is_empty() && runs.len() != count {
            return Err(Error::corrupt(format!(
                "{context}: {} keys_vals runs for {count} dense nodes",
                runs.len()
            )));
        }

        let ids = dense.id.iter().copied().delta();
        let lats = dense.lat.iter().copied().delta();
        let lons = dense.lon.iter().copied().delta();
        for (i, ((id, lat_raw), lon_raw)) in ids.zip(lats).zip(lons).enumerate() {
            let lon = coord(lon_raw, block.lon_offset(), block.granularity());
            let lat = coord(lat_raw, block.lat_offset(), block.granularity());

            let run = runs.get(i).copied().unwrap_or(&[]);
            if run.len() % 2 != 0 {
                return Err(Error::corrupt(format!("{context}: odd keys_vals run")));
            }
            let mut scratch = TagScratch::new();
            for pair in run.chunks_exact(2) {
                scratch.push((
                    translate_id(translate, pair[0] as u32, context)?,
                    translate_id(translate, pair[1] as u32, context)?,
                ));
            }

            if let Some(filter) = &options.node_filter {
                let node = Node {
                    id,
                    lon,
                    lat,
                    tags: self.scratch_tags(&scratch),
                };
                if !filter(&node) {
                    continue;
                }
            }
            self.nodes.push(id, lon, lat, &mut scratch);
        }
        Ok(())
    }

    fn ingest_nodes(
        &mut self,
        nodes: &[proto::Node],
        block: &proto::PrimitiveBlock,
        translate: &[u32],
        context: &str,
        options: &BuildOptions,
    ) -> Result<()> {
        for node in nodes {
            let lon = coord(node.lon, block.lon_offset(), block.granularity());
            let lat = coord(node.lat, block.lat_offset(), block.granularity());
            let mut scratch = self.tag_scratch(&node.keys, &node.vals, translate, context)?;

            if let Some(filter) = &options.node_filter {
                let entity = Node { id: node.id, lon, lat, tags: self.scratch_tags(&scratch) };
                if !filter(&entity) {
                    continue;
                }
            }
            self.nodes.push(node.id, lon, lat, &mut scratch);
        }
        Ok(())
    }

    fn ingest_ways(
        &mut self,
        ways: &[proto::Way],
        translate: &[u32],
        context: &str,
        options: &BuildOptions,
    ) -> Result<()> {
        for way in ways {
            let refs: Vec<i64> = way.refs.iter().copied().delta().collect();
            let mut scratch = self.tag_scratch(&way.keys, &way.vals, translate, context)?;

            if let Some(filter) = &options.way_filter {
                let entity =
                    Way { id: way.id, refs: refs.clone(), tags: self.scratch_tags(&scratch) };
                if !filter(&entity) {
                    continue;
                }
            }
            self.ways.push(way.id, &refs, &mut scratch)?;
        }
        Ok(())
    }

    fn ingest_relations(
        &mut self,
        relations: &[proto::Relation],
        translate: &[u32],
        context: &str,
        options: &BuildOptions,
    ) -> Result<()> {
        for relation in relations {
            let count = relation.memids.len();
            if relation.types.len() != count || relation.roles_sid.len() != count {
                return Err(Error::corrupt(format!(
                    "{context}: relation {} member arrays disagree",
                    relation.id
                )));
            }
            let mut members = Vec::with_capacity(count);
            let memids = relation.memids.iter().copied().delta();
            for ((memid, &ty), &role) in
                memids.zip(relation.types.iter()).zip(relation.roles_sid.iter())
            {
                let kind = match ty {
                    proto::MEMBER_NODE => EntityKind::Node,
                    proto::MEMBER_WAY => EntityKind::Way,
                    proto::MEMBER_RELATION => EntityKind::Relation,
                    other => {
                        return Err(Error::corrupt(format!(
                            "{context}: relation {} member type {other}",
                            relation.id
                        )))
                    }
                };
                let role = translate_id(translate, role as u32, context)?;
                members.push((kind, memid, role));
            }
            let mut scratch =
                self.tag_scratch(&relation.keys, &relation.vals, translate, context)?;

            if let Some(filter) = &options.relation_filter {
                let entity = Relation {
                    id: relation.id,
                    members: members
                        .iter()
                        .map(|&(kind, ref_id, role)| crate::entity::Member {
                            kind,
                            ref_id,
                            role: self.global_string(role).to_string(),
                        })
                        .collect(),
                    tags: self.scratch_tags(&scratch),
                };
                if !filter(&entity) {
                    continue;
                }
            }
            self.relations.push(relation.id, &members, &mut scratch)?;
        }
        Ok(())
    }

    fn tag_scratch(
        &self,
        keys: &[u32],
        vals: &[u32],
        translate: &[u32],
        context: &str,
    ) -> Result<TagScratch> {
        if keys.len() != vals.len() {
            return Err(Error::corrupt(format!("{context}: keys/vals arrays disagree")));
        }
        let mut scratch = TagScratch::with_capacity(keys.len());
        for (&k, &v) in keys.iter().zip(vals.iter()) {
            scratch
                .push((translate_id(translate, k, context)?, translate_id(translate, v, context)?));
        }
        Ok(scratch)
    }

    /// Global string for an id interned while translating this block.
    fn global_string(&self, id: u32) -> &str {
        self.strings.get(id).expect("translated string id resolves")
    }

    fn scratch_tags(&self, scratch: &TagScratch) -> Tags {
        scratch
            .iter()
            .map(|&(k, v)| (self.global_string(k).to_string(), self.global_string(v).to_string()))
            .collect()
    }
}

fn translate_id(translate: &[u32], local: u32, context: &str) -> Result<u32> {
    translate
        .get(local as usize)
        .copied()
        .ok_or_else(|| Error::corrupt(format!("{context}: string id {local} out of range")))
}
