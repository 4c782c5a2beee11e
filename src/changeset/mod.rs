mod dedup;
mod intersect;
mod osc;

pub use dedup::DedupStats;
pub use intersect::IntersectStats;
pub use osc::OscOptions;

use ahash::AHashMap;

use crate::entity::{Entity, Node, Relation, Way};
use crate::error::{EntityKind, Error, Result};
use crate::progress::CancelFlag;
use crate::store::{Store, StoreAssembler, StoreInfo};

/// What happened to an entity relative to the base store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// One change entry. `old` is captured the first time an existing entity is
/// touched and never overwritten; augmented OSC output relies on it.
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub new: Option<T>,
    pub old: Option<T>,
    pub origin: Option<String>,
    /// Back-pointers for hosts (which entities caused this change); carries
    /// no semantics here.
    pub related: Vec<(EntityKind, i64)>,
}

trait ChangeEntity: Clone {
    const KIND: EntityKind;
    fn entity_id(&self) -> i64;
}

impl ChangeEntity for Node {
    const KIND: EntityKind = EntityKind::Node;
    fn entity_id(&self) -> i64 {
        self.id
    }
}

impl ChangeEntity for Way {
    const KIND: EntityKind = EntityKind::Way;
    fn entity_id(&self) -> i64 {
        self.id
    }
}

impl ChangeEntity for Relation {
    const KIND: EntityKind = EntityKind::Relation;
    fn entity_id(&self) -> i64 {
        self.id
    }
}

/// A reversible description of creates/modifies/deletes against a base
/// store. At most one change exists per (kind, id); applying the changeset
/// produces a new independent store and leaves the base untouched.
pub struct Changeset<'a> {
    base: &'a Store,
    origin: Option<String>,
    cancel: CancelFlag,
    node_changes: AHashMap<i64, Change<Node>>,
    way_changes: AHashMap<i64, Change<Way>>,
    relation_changes: AHashMap<i64, Change<Relation>>,
}

impl<'a> Changeset<'a> {
    pub fn new(base: &'a Store) -> Self {
        Self {
            base,
            origin: None,
            cancel: CancelFlag::new(),
            node_changes: AHashMap::new(),
            way_changes: AHashMap::new(),
            relation_changes: AHashMap::new(),
        }
    }

    /// Stamp subsequent changes with the dataset they originate from.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Install a cancellation flag checked by the long-running operations.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    pub fn base(&self) -> &Store {
        self.base
    }

    /// Total number of pending changes.
    pub fn len(&self) -> usize {
        self.node_changes.len() + self.way_changes.len() + self.relation_changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_change(&self, id: i64) -> Option<&Change<Node>> {
        self.node_changes.get(&id)
    }

    pub fn way_change(&self, id: i64) -> Option<&Change<Way>> {
        self.way_changes.get(&id)
    }

    pub fn relation_change(&self, id: i64) -> Option<&Change<Relation>> {
        self.relation_changes.get(&id)
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Schedule a brand-new entity. The id must be unused in the base store
    /// and in the pending changes.
    pub fn create(&mut self, entity: impl Into<Entity>) -> Result<()> {
        match entity.into() {
            Entity::Node(node) => {
                let exists = self.base.nodes().index_of(node.id).is_some();
                Self::record_create(&mut self.node_changes, exists, node, &self.origin)
            }
            Entity::Way(way) => {
                let exists = self.base.ways().index_of(way.id).is_some();
                Self::record_create(&mut self.way_changes, exists, way, &self.origin)
            }
            Entity::Relation(relation) => {
                let exists = self.base.relations().index_of(relation.id).is_some();
                Self::record_create(&mut self.relation_changes, exists, relation, &self.origin)
            }
        }
    }

    /// Schedule deletion of a base entity. Deleting a pending create cancels
    /// it; repeating a delete is a no-op.
    pub fn delete(&mut self, kind: EntityKind, id: i64) -> Result<()> {
        match kind {
            EntityKind::Node => {
                let base = self.base.get(kind, id).map(|e| match e {
                    Entity::Node(n) => n,
                    _ => unreachable!("kind-matched get"),
                });
                Self::record_delete(&mut self.node_changes, base, id, &self.origin)
            }
            EntityKind::Way => {
                let base = self.base.get(kind, id).map(|e| match e {
                    Entity::Way(w) => w,
                    _ => unreachable!("kind-matched get"),
                });
                Self::record_delete(&mut self.way_changes, base, id, &self.origin)
            }
            EntityKind::Relation => {
                let base = self.base.get(kind, id).map(|e| match e {
                    Entity::Relation(r) => r,
                    _ => unreachable!("kind-matched get"),
                });
                Self::record_delete(&mut self.relation_changes, base, id, &self.origin)
            }
        }
    }

    /// Rewrite a node through `f`, which receives the most recent pending
    /// version (or the base version on first touch).
    pub fn modify_node(&mut self, id: i64, f: impl FnOnce(Node) -> Node) -> Result<()> {
        let base = self.base.nodes().index_of(id).map(|i| self.base.node_at(i));
        Self::record_modify(&mut self.node_changes, base, id, f, &self.origin)
    }

    pub fn modify_way(&mut self, id: i64, f: impl FnOnce(Way) -> Way) -> Result<()> {
        let base = self.base.ways().index_of(id).map(|i| self.base.way_at(i));
        Self::record_modify(&mut self.way_changes, base, id, f, &self.origin)
    }

    pub fn modify_relation(&mut self, id: i64, f: impl FnOnce(Relation) -> Relation) -> Result<()> {
        let base = self.base.relations().index_of(id).map(|i| self.base.relation_at(i));
        Self::record_modify(&mut self.relation_changes, base, id, f, &self.origin)
    }

    /// Attach related-entity back-pointers to an existing change entry.
    pub fn relate(&mut self, kind: EntityKind, id: i64, related: (EntityKind, i64)) {
        let slot = match kind {
            EntityKind::Node => self.node_changes.get_mut(&id).map(|c| &mut c.related),
            EntityKind::Way => self.way_changes.get_mut(&id).map(|c| &mut c.related),
            EntityKind::Relation => {
                self.relation_changes.get_mut(&id).map(|c| &mut c.related)
            }
        };
        if let Some(list) = slot {
            if !list.contains(&related) {
                list.push(related);
            }
        }
    }

    /// The live version of a node under this changeset: pending if touched,
    /// base otherwise, `None` once deleted.
    pub fn current_node(&self, id: i64) -> Option<Node> {
        match self.node_changes.get(&id) {
            Some(change) => match change.kind {
                ChangeKind::Delete => None,
                _ => change.new.clone(),
            },
            None => self.base.nodes().index_of(id).map(|i| self.base.node_at(i)),
        }
    }

    /// The live version of a way under this changeset.
    pub fn current_way(&self, id: i64) -> Option<Way> {
        match self.way_changes.get(&id) {
            Some(change) => match change.kind {
                ChangeKind::Delete => None,
                _ => change.new.clone(),
            },
            None => self.base.ways().index_of(id).map(|i| self.base.way_at(i)),
        }
    }

    /// Highest node id across the base store and pending creates; new node
    /// ids are allocated above it.
    pub fn max_node_id(&self) -> i64 {
        let pending =
            self.node_changes.keys().copied().max().unwrap_or(i64::MIN);
        self.base.max_node_id().unwrap_or(i64::MIN).max(pending).max(0)
    }

    fn record_create<T: ChangeEntity>(
        map: &mut AHashMap<i64, Change<T>>,
        exists_in_base: bool,
        entity: T,
        origin: &Option<String>,
    ) -> Result<()> {
        let id = entity.entity_id();
        if exists_in_base {
            return Err(Error::InconsistentChangeset(format!(
                "create {} {id} collides with the base store",
                T::KIND
            )));
        }
        if map.contains_key(&id) {
            return Err(Error::InconsistentChangeset(format!(
                "{} {id} already has a pending change",
                T::KIND
            )));
        }
        map.insert(
            id,
            Change {
                kind: ChangeKind::Create,
                new: Some(entity),
                old: None,
                origin: origin.clone(),
                related: Vec::new(),
            },
        );
        Ok(())
    }

    fn record_delete<T: ChangeEntity>(
        map: &mut AHashMap<i64, Change<T>>,
        base: Option<T>,
        id: i64,
        origin: &Option<String>,
    ) -> Result<()> {
        if let Some(kind) = map.get(&id).map(|change| change.kind) {
            match kind {
                ChangeKind::Create => {
                    // Deleting an entity this changeset invented nets out.
                    log::debug!("delete cancels pending create of {} {id}", T::KIND);
                    map.remove(&id);
                }
                ChangeKind::Delete => {
                    log::debug!("{} {id} is already deleted", T::KIND);
                }
                ChangeKind::Modify => {
                    if let Some(change) = map.get_mut(&id) {
                        change.kind = ChangeKind::Delete;
                        change.new = None;
                    }
                }
            }
            return Ok(());
        }
        let base = base.ok_or_else(|| {
            Error::InconsistentChangeset(format!(
                "delete targets missing {} {id}",
                T::KIND
            ))
        })?;
        map.insert(
            id,
            Change {
                kind: ChangeKind::Delete,
                new: None,
                old: Some(base),
                origin: origin.clone(),
                related: Vec::new(),
            },
        );
        Ok(())
    }

    fn record_modify<T: ChangeEntity>(
        map: &mut AHashMap<i64, Change<T>>,
        base: Option<T>,
        id: i64,
        f: impl FnOnce(T) -> T,
        origin: &Option<String>,
    ) -> Result<()> {
        if let Some(change) = map.get_mut(&id) {
            match change.kind {
                ChangeKind::Delete => {
                    // Modifying a deleted entity is not an error.
                    log::warn!("ignoring modify of deleted {} {id}", T::KIND);
                    return Ok(());
                }
                ChangeKind::Create | ChangeKind::Modify => {
                    let current = change.new.take().ok_or_else(|| {
                        Error::InconsistentChangeset(format!(
                            "{} {id} change entry has no current version",
                            T::KIND
                        ))
                    })?;
                    change.new = Some(f(current));
                    return Ok(());
                }
            }
        }
        let base = base.ok_or_else(|| {
            Error::InconsistentChangeset(format!(
                "modify targets missing {} {id}",
                T::KIND
            ))
        })?;
        map.insert(
            id,
            Change {
                kind: ChangeKind::Modify,
                new: Some(f(base.clone())),
                old: Some(base),
                origin: origin.clone(),
                related: Vec::new(),
            },
        );
        Ok(())
    }

    /// Fold this changeset over its base into a brand-new store. Base
    /// entities are visited in ascending id order, created entities append
    /// after them, and the result re-finalizes every index, so identical
    /// inputs produce identical stores.
    pub fn apply(&self, dataset: Option<&str>) -> Result<Store> {
        self.validate()?;
        let info = StoreInfo {
            partial: self.base.info().partial,
            dataset: dataset.map(str::to_string),
            ..StoreInfo::default()
        };
        let mut assembler = StoreAssembler::with_info(info);

        for index in 0..self.base.nodes().len() as u32 {
            let id = self.base.nodes().id(index);
            match self.node_changes.get(&id) {
                Some(change) => match (&change.kind, &change.new) {
                    (ChangeKind::Delete, _) => {}
                    (_, Some(node)) => assembler.push_node(node),
                    (_, None) => {
                        return Err(Error::InconsistentChangeset(format!(
                            "node {id} change entry has no current version"
                        )))
                    }
                },
                None => assembler.push_node(&self.base.node_at(index)),
            }
        }
        let mut created: Vec<&Change<Node>> = self
            .node_changes
            .values()
            .filter(|c| c.kind == ChangeKind::Create)
            .collect();
        created.sort_by_key(|c| c.new.as_ref().map(|n| n.id));
        for change in created {
            if let Some(node) = &change.new {
                assembler.push_node(node);
            }
        }
        self.check_cancelled()?;

        for index in 0..self.base.ways().len() as u32 {
            let id = self.base.ways().id(index);
            match self.way_changes.get(&id) {
                Some(change) => match (&change.kind, &change.new) {
                    (ChangeKind::Delete, _) => {}
                    (_, Some(way)) => assembler.push_way(way)?,
                    (_, None) => {
                        return Err(Error::InconsistentChangeset(format!(
                            "way {id} change entry has no current version"
                        )))
                    }
                },
                None => assembler.push_way(&self.base.way_at(index))?,
            }
        }
        let mut created: Vec<&Change<Way>> = self
            .way_changes
            .values()
            .filter(|c| c.kind == ChangeKind::Create)
            .collect();
        created.sort_by_key(|c| c.new.as_ref().map(|w| w.id));
        for change in created {
            if let Some(way) = &change.new {
                assembler.push_way(way)?;
            }
        }
        self.check_cancelled()?;

        for index in 0..self.base.relations().len() as u32 {
            let id = self.base.relations().id(index);
            match self.relation_changes.get(&id) {
                Some(change) => match (&change.kind, &change.new) {
                    (ChangeKind::Delete, _) => {}
                    (_, Some(relation)) => assembler.push_relation(relation)?,
                    (_, None) => {
                        return Err(Error::InconsistentChangeset(format!(
                            "relation {id} change entry has no current version"
                        )))
                    }
                },
                None => assembler.push_relation(&self.base.relation_at(index))?,
            }
        }
        let mut created: Vec<&Change<Relation>> = self
            .relation_changes
            .values()
            .filter(|c| c.kind == ChangeKind::Create)
            .collect();
        created.sort_by_key(|c| c.new.as_ref().map(|r| r.id));
        for change in created {
            if let Some(relation) = &change.new {
                assembler.push_relation(relation)?;
            }
        }
        self.check_cancelled()?;

        assembler.finish()
    }

    /// CS2/CS3 re-validation at apply time.
    fn validate(&self) -> Result<()> {
        for (&id, change) in &self.node_changes {
            let in_base = self.base.nodes().index_of(id).is_some();
            Self::validate_entry(EntityKind::Node, id, change.kind, in_base)?;
        }
        for (&id, change) in &self.way_changes {
            let in_base = self.base.ways().index_of(id).is_some();
            Self::validate_entry(EntityKind::Way, id, change.kind, in_base)?;
        }
        for (&id, change) in &self.relation_changes {
            let in_base = self.base.relations().index_of(id).is_some();
            Self::validate_entry(EntityKind::Relation, id, change.kind, in_base)?;
        }
        Ok(())
    }

    fn validate_entry(kind: EntityKind, id: i64, change: ChangeKind, in_base: bool) -> Result<()> {
        match change {
            ChangeKind::Create if in_base => Err(Error::InconsistentChangeset(format!(
                "create {kind} {id} collides with the base store"
            ))),
            ChangeKind::Modify | ChangeKind::Delete if !in_base => {
                Err(Error::InconsistentChangeset(format!(
                    "{change:?} targets missing {kind} {id}"
                )))
            }
            _ => Ok(()),
        }
    }
}
