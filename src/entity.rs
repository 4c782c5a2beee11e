use std::fmt;

use crate::error::EntityKind;

/// Canonical tag list: ordered (key, value) string pairs. Values arriving as
/// numbers or booleans are canonicalised to their display form on input and
/// never keep their original type.
pub type Tags = Vec<(String, String)>;

/// The tag key carrying an entity's upstream OSM version, when known.
pub const VERSION_KEY: &str = "ext:osm_version";

fn tag_of<'t>(tags: &'t Tags, key: &str) -> Option<&'t str> {
    tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn set_tag_in(tags: &mut Tags, key: String, value: String) {
    match tags.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => tags.push((key, value)),
    }
}

/// A point entity: stable id plus a WGS-84 position.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Node {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    pub tags: Tags,
}

impl Node {
    pub fn new(id: i64, lon: f64, lat: f64) -> Self {
        Self { id, lon, lat, tags: Tags::new() }
    }

    /// Attach a tag, coercing the value to its canonical string form.
    /// Replaces any existing value for the same key.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_tag(key, value);
        self
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        set_tag_in(&mut self.tags, key.into(), value.to_string());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        tag_of(&self.tags, key)
    }

    /// Upstream OSM version from the `ext:osm_version` tag; 0 when absent
    /// or non-numeric.
    pub fn version(&self) -> u32 {
        self.tag(VERSION_KEY).and_then(|v| v.parse().ok()).unwrap_or(0)
    }
}

/// An ordered polyline (or ring) of node references.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Way {
    pub id: i64,
    pub refs: Vec<i64>,
    pub tags: Tags,
}

impl Way {
    pub fn new(id: i64, refs: Vec<i64>) -> Self {
        Self { id, refs, tags: Tags::new() }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_tag(key, value);
        self
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        set_tag_in(&mut self.tags, key.into(), value.to_string());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        tag_of(&self.tags, key)
    }

    pub fn version(&self) -> u32 {
        self.tag(VERSION_KEY).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    /// A way is closed when it ends on the node it started from.
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 3 && self.refs.first() == self.refs.last()
    }
}

/// One relation member: a typed reference plus a free-form role.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Member {
    pub kind: EntityKind,
    pub ref_id: i64,
    pub role: String,
}

impl Member {
    pub fn node(ref_id: i64, role: impl Into<String>) -> Self {
        Self { kind: EntityKind::Node, ref_id, role: role.into() }
    }

    pub fn way(ref_id: i64, role: impl Into<String>) -> Self {
        Self { kind: EntityKind::Way, ref_id, role: role.into() }
    }

    pub fn relation(ref_id: i64, role: impl Into<String>) -> Self {
        Self { kind: EntityKind::Relation, ref_id, role: role.into() }
    }
}

/// A grouping entity over typed members.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

impl Relation {
    pub fn new(id: i64, members: Vec<Member>) -> Self {
        Self { id, members, tags: Tags::new() }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_tag(key, value);
        self
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        set_tag_in(&mut self.tags, key.into(), value.to_string());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        tag_of(&self.tags, key)
    }

    pub fn version(&self) -> u32 {
        self.tag(VERSION_KEY).and_then(|v| v.parse().ok()).unwrap_or(0)
    }
}

/// Any of the three entity kinds, for APIs that dispatch at the edges.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Way(_) => EntityKind::Way,
            Entity::Relation(_) => EntityKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::Node(n) => n.id,
            Entity::Way(w) => w.id,
            Entity::Relation(r) => r.id,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Entity::Node(n) => &n.tags,
            Entity::Way(w) => &w.tags,
            Entity::Relation(r) => &r.tags,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        tag_of(self.tags(), key)
    }
}

impl From<Node> for Entity {
    fn from(n: Node) -> Self {
        Entity::Node(n)
    }
}

impl From<Way> for Entity {
    fn from(w: Way) -> Self {
        Entity::Way(w)
    }
}

impl From<Relation> for Entity {
    fn from(r: Relation) -> Self {
        Entity::Relation(r)
    }
}
