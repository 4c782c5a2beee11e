use crate::changeset::{Change, ChangeKind, Changeset};
use crate::entity::{Member, Node, Relation, Tags, Way};
use crate::error::EntityKind;

/// OSC emission options. `augmented` wraps every modify in
/// `<old>…</old><new>…</new>` and every delete in `<old>…</old>`, per the
/// Overpass augmented-diff convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct OscOptions {
    pub augmented: bool,
}

/// Escape an XML attribute/text value.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn tags_xml(out: &mut String, tags: &Tags, indent: &str) {
    for (key, value) in tags {
        out.push_str(&format!("{indent}<tag k=\"{}\" v=\"{}\"/>\n", escape(key), escape(value)));
    }
}

fn node_xml(out: &mut String, node: &Node, indent: &str) {
    if node.tags.is_empty() {
        out.push_str(&format!(
            "{indent}<node id=\"{}\" lon=\"{}\" lat=\"{}\"/>\n",
            node.id, node.lon, node.lat
        ));
        return;
    }
    out.push_str(&format!(
        "{indent}<node id=\"{}\" lon=\"{}\" lat=\"{}\">\n",
        node.id, node.lon, node.lat
    ));
    tags_xml(out, &node.tags, &format!("{indent}  "));
    out.push_str(&format!("{indent}</node>\n"));
}

fn way_xml(out: &mut String, way: &Way, indent: &str) {
    out.push_str(&format!("{indent}<way id=\"{}\">\n", way.id));
    let inner = format!("{indent}  ");
    for ref_id in &way.refs {
        out.push_str(&format!("{inner}<nd ref=\"{ref_id}\"/>\n"));
    }
    tags_xml(out, &way.tags, &inner);
    out.push_str(&format!("{indent}</way>\n"));
}

fn member_type(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Node => "node",
        EntityKind::Way => "way",
        EntityKind::Relation => "relation",
    }
}

fn relation_xml(out: &mut String, relation: &Relation, indent: &str) {
    out.push_str(&format!("{indent}<relation id=\"{}\">\n", relation.id));
    let inner = format!("{indent}  ");
    for Member { kind, ref_id, role } in &relation.members {
        out.push_str(&format!(
            "{inner}<member type=\"{}\" ref=\"{ref_id}\" role=\"{}\"/>\n",
            member_type(*kind),
            escape(role)
        ));
    }
    tags_xml(out, &relation.tags, &inner);
    out.push_str(&format!("{indent}</relation>\n"));
}

/// Pending changes of one kind, ascending id, for one section.
fn section<'c, T>(
    map: &'c ahash::AHashMap<i64, Change<T>>,
    kind: ChangeKind,
) -> Vec<(i64, &'c Change<T>)> {
    let mut entries: Vec<(i64, &Change<T>)> =
        map.iter().filter(|(_, c)| c.kind == kind).map(|(&id, c)| (id, c)).collect();
    entries.sort_by_key(|&(id, _)| id);
    entries
}

impl Changeset<'_> {
    /// Serialize the pending changes as an `<osmChange version="0.6">`
    /// document. Output is deterministic: sections in create/modify/delete
    /// order, nodes before ways before relations, ascending ids.
    pub fn to_osc(&self, options: &OscOptions) -> String {
        let mut out = String::new();
        out.push_str("<osmChange version=\"0.6\" generator=\"osmix\">\n");

        // Creates are never augmented; there is no old version.
        let created_nodes = section(&self.node_changes, ChangeKind::Create);
        let created_ways = section(&self.way_changes, ChangeKind::Create);
        let created_relations = section(&self.relation_changes, ChangeKind::Create);
        if !created_nodes.is_empty() || !created_ways.is_empty() || !created_relations.is_empty()
        {
            out.push_str("  <create>\n");
            for (_, change) in &created_nodes {
                if let Some(node) = &change.new {
                    node_xml(&mut out, node, "    ");
                }
            }
            for (_, change) in &created_ways {
                if let Some(way) = &change.new {
                    way_xml(&mut out, way, "    ");
                }
            }
            for (_, change) in &created_relations {
                if let Some(relation) = &change.new {
                    relation_xml(&mut out, relation, "    ");
                }
            }
            out.push_str("  </create>\n");
        }

        if options.augmented {
            self.augmented_sections(&mut out);
        } else {
            self.plain_sections(&mut out);
        }

        out.push_str("</osmChange>\n");
        out
    }

    fn plain_sections(&self, out: &mut String) {
        let modified_nodes = section(&self.node_changes, ChangeKind::Modify);
        let modified_ways = section(&self.way_changes, ChangeKind::Modify);
        let modified_relations = section(&self.relation_changes, ChangeKind::Modify);
        if !modified_nodes.is_empty()
            || !modified_ways.is_empty()
            || !modified_relations.is_empty()
        {
            out.push_str("  <modify>\n");
            for (_, change) in &modified_nodes {
                if let Some(node) = &change.new {
                    node_xml(out, node, "    ");
                }
            }
            for (_, change) in &modified_ways {
                if let Some(way) = &change.new {
                    way_xml(out, way, "    ");
                }
            }
            for (_, change) in &modified_relations {
                if let Some(relation) = &change.new {
                    relation_xml(out, relation, "    ");
                }
            }
            out.push_str("  </modify>\n");
        }

        let deleted_nodes = section(&self.node_changes, ChangeKind::Delete);
        let deleted_ways = section(&self.way_changes, ChangeKind::Delete);
        let deleted_relations = section(&self.relation_changes, ChangeKind::Delete);
        if !deleted_nodes.is_empty() || !deleted_ways.is_empty() || !deleted_relations.is_empty()
        {
            out.push_str("  <delete>\n");
            for (_, change) in &deleted_nodes {
                if let Some(node) = &change.old {
                    node_xml(out, node, "    ");
                }
            }
            for (_, change) in &deleted_ways {
                if let Some(way) = &change.old {
                    way_xml(out, way, "    ");
                }
            }
            for (_, change) in &deleted_relations {
                if let Some(relation) = &change.old {
                    relation_xml(out, relation, "    ");
                }
            }
            out.push_str("  </delete>\n");
        }
    }

    /// One `<modify>`/`<delete>` element per entity, wrapping the captured
    /// old version (and the new one for modifies).
    fn augmented_sections(&self, out: &mut String) {
        for (_, change) in section(&self.node_changes, ChangeKind::Modify) {
            if let (Some(old), Some(new)) = (&change.old, &change.new) {
                out.push_str("  <modify>\n    <old>\n");
                node_xml(out, old, "      ");
                out.push_str("    </old>\n    <new>\n");
                node_xml(out, new, "      ");
                out.push_str("    </new>\n  </modify>\n");
            }
        }
        for (_, change) in section(&self.way_changes, ChangeKind::Modify) {
            if let (Some(old), Some(new)) = (&change.old, &change.new) {
                out.push_str("  <modify>\n    <old>\n");
                way_xml(out, old, "      ");
                out.push_str("    </old>\n    <new>\n");
                way_xml(out, new, "      ");
                out.push_str("    </new>\n  </modify>\n");
            }
        }
        for (_, change) in section(&self.relation_changes, ChangeKind::Modify) {
            if let (Some(old), Some(new)) = (&change.old, &change.new) {
                out.push_str("  <modify>\n    <old>\n");
                relation_xml(out, old, "      ");
                out.push_str("    </old>\n    <new>\n");
                relation_xml(out, new, "      ");
                out.push_str("    </new>\n  </modify>\n");
            }
        }

        for (_, change) in section(&self.node_changes, ChangeKind::Delete) {
            if let Some(old) = &change.old {
                out.push_str("  <delete>\n    <old>\n");
                node_xml(out, old, "      ");
                out.push_str("    </old>\n  </delete>\n");
            }
        }
        for (_, change) in section(&self.way_changes, ChangeKind::Delete) {
            if let Some(old) = &change.old {
                out.push_str("  <delete>\n    <old>\n");
                way_xml(out, old, "      ");
                out.push_str("    </old>\n  </delete>\n");
            }
        }
        for (_, change) in section(&self.relation_changes, ChangeKind::Delete) {
            if let Some(old) = &change.old {
                out.push_str("  <delete>\n    <old>\n");
                relation_xml(out, old, "      ");
                out.push_str("    </old>\n  </delete>\n");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreAssembler};

    fn base() -> Store {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0).with_tag("name", "A & B"));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_node(&Node::new(3, 2.0, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2])).unwrap();
        assembler.finish().unwrap()
    }

    fn one_of_each(store: &Store) -> Changeset<'_> {
        let mut changes = Changeset::new(store);
        changes.create(Node::new(9, 3.0, 0.0).with_tag("crossing", "yes")).unwrap();
        changes.modify_node(2, |node| node.with_tag("name", "renamed")).unwrap();
        changes.delete(EntityKind::Node, 3).unwrap();
        changes
    }

    #[test]
    fn plain_osc_has_three_sections() {
        let store = base();
        let changes = one_of_each(&store);
        let xml = changes.to_osc(&OscOptions::default());

        assert!(xml.starts_with("<osmChange version=\"0.6\""));
        assert!(xml.contains("<create>\n    <node id=\"9\""));
        assert!(xml.contains("<tag k=\"crossing\" v=\"yes\"/>"));
        assert!(xml.contains("<modify>\n    <node id=\"2\""));
        assert!(xml.contains("<delete>\n    <node id=\"3\""));
        assert!(xml.ends_with("</osmChange>\n"));
        // No augmented wrappers in plain mode.
        assert!(!xml.contains("<old>"));
    }

    #[test]
    fn augmented_osc_pairs_old_and_new() {
        let store = base();
        let changes = one_of_each(&store);
        let xml = changes.to_osc(&OscOptions { augmented: true });

        assert_eq!(xml.matches("<modify>").count(), 1);
        assert_eq!(xml.matches("<old>").count(), 2, "one for modify, one for delete");
        assert_eq!(xml.matches("<new>").count(), 1);
        // The delete wraps the base version of node 3, with no <new>.
        let delete_at = xml.find("<delete>").unwrap();
        assert!(xml[delete_at..].contains("<node id=\"3\""));
        assert!(!xml[delete_at..].contains("<new>"));
    }

    #[test]
    fn ways_and_relations_serialize_members() {
        let store = base();
        let mut changes = Changeset::new(&store);
        changes
            .modify_way(10, |way| way.with_tag("highway", "service"))
            .unwrap();
        changes
            .create(
                Relation::new(-1, vec![Member::way(10, "outer"), Member::node(1, "")])
                    .with_tag("type", "multipolygon"),
            )
            .unwrap();
        let xml = changes.to_osc(&OscOptions::default());

        assert!(xml.contains("<way id=\"10\">"));
        assert!(xml.contains("<nd ref=\"1\"/>"));
        assert!(xml.contains("<relation id=\"-1\">"));
        assert!(xml.contains("<member type=\"way\" ref=\"10\" role=\"outer\"/>"));
        assert!(xml.contains("<member type=\"node\" ref=\"1\" role=\"\"/>"));
    }

    #[test]
    fn attribute_values_are_escaped() {
        let store = base();
        let mut changes = Changeset::new(&store);
        changes
            .modify_node(1, |node| node.with_tag("name", "<\"Quote\" & 'Co'>"))
            .unwrap();
        let xml = changes.to_osc(&OscOptions::default());
        assert!(xml.contains("v=\"&lt;&quot;Quote&quot; &amp; &apos;Co&apos;&gt;\""));
    }

    #[test]
    fn empty_changeset_is_an_empty_document() {
        let store = base();
        let changes = Changeset::new(&store);
        let xml = changes.to_osc(&OscOptions::default());
        assert_eq!(xml, "<osmChange version=\"0.6\" generator=\"osmix\">\n</osmChange>\n");
    }
}
