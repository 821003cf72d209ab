//! The test plan: the selected, ordered and keyed instance tree for one
//! attempt.
//!
//! Nodes live in a pre-order arena, so every subtree occupies a contiguous
//! range `index..subtree_end(index)`. Parent and child links are arena
//! indices. Two indexes sit on top: key to node, and authored identifier to
//! every instance of that identifier in recording order.

use std::collections::HashMap;
use std::fmt;

use qti_core::{AbstractPart, AssessmentTest, PartType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::error;

use crate::control::EffectiveItemSessionControl;
use crate::error::PlanError;
use crate::key::TestPlanNodeKey;

/// Position of a node in the plan arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

/// One instance of one authored part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlanNode {
    pub key: TestPlanNodeKey,
    pub node_type: PartType,
    pub effective_control: EffectiveItemSessionControl,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    /// Position among the parent's children (or among test parts).
    pub sibling_index: usize,
    /// Resolved item system id; set on item nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_system_id: Option<String>,
}

impl TestPlanNode {
    pub fn identifier(&self) -> &str {
        self.key.identifier()
    }

    pub fn is_test_part(&self) -> bool {
        self.node_type == PartType::TestPart
    }

    pub fn is_section(&self) -> bool {
        self.node_type == PartType::AssessmentSection
    }

    pub fn is_item(&self) -> bool {
        self.node_type == PartType::AssessmentItemRef
    }
}

#[derive(Serialize, Deserialize)]
struct PlanData {
    test_identifier: String,
    nodes: Vec<TestPlanNode>,
}

/// An immutable test plan. Cheap to share across threads once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanData", into = "PlanData")]
pub struct TestPlan {
    test_identifier: String,
    nodes: Vec<TestPlanNode>,
    test_parts: Vec<NodeIndex>,
    by_key: HashMap<TestPlanNodeKey, NodeIndex>,
    by_identifier: HashMap<String, Vec<NodeIndex>>,
}

impl TestPlan {
    /// Build the indexes over a pre-order node arena and check its shape.
    pub fn from_nodes(
        test_identifier: impl Into<String>,
        nodes: Vec<TestPlanNode>,
    ) -> Result<Self, PlanError> {
        let mut by_key = HashMap::with_capacity(nodes.len());
        let mut by_identifier: HashMap<String, Vec<NodeIndex>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if by_key.insert(node.key.clone(), NodeIndex(i)).is_some() {
                error!(key = %node.key, "duplicate key in test plan");
                return Err(PlanError::DuplicateKey(node.key.clone()));
            }
            by_identifier
                .entry(node.identifier().to_string())
                .or_default()
                .push(NodeIndex(i));
        }
        let test_parts = check_shape(&nodes)?;
        Ok(Self {
            test_identifier: test_identifier.into(),
            nodes,
            test_parts,
            by_key,
            by_identifier,
        })
    }

    pub fn test_identifier(&self) -> &str {
        &self.test_identifier
    }

    /// All nodes in pre-order.
    pub fn nodes(&self) -> &[TestPlanNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &TestPlanNodeKey) -> Option<&TestPlanNode> {
        self.by_key.get(key).and_then(|i| self.nodes.get(i.0))
    }

    pub fn node_at(&self, index: NodeIndex) -> Option<&TestPlanNode> {
        self.nodes.get(index.0)
    }

    pub fn index_of(&self, key: &TestPlanNodeKey) -> Option<NodeIndex> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, key: &TestPlanNodeKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Like [`TestPlan::node`], but unknown keys are an error.
    pub fn require(&self, key: &TestPlanNodeKey) -> Result<&TestPlanNode, PlanError> {
        let index = self
            .by_key
            .get(key)
            .ok_or_else(|| PlanError::UnknownKey(key.clone()))?;
        self.nodes.get(index.0).ok_or_else(|| {
            error!(key = %key, "plan index points past the node arena");
            PlanError::DanglingKey(key.clone())
        })
    }

    /// Every instance of `identifier`, in pre-order.
    pub fn nodes_for_identifier(&self, identifier: &str) -> Vec<&TestPlanNode> {
        self.by_identifier
            .get(identifier)
            .map(|ids| ids.iter().filter_map(|i| self.nodes.get(i.0)).collect())
            .unwrap_or_default()
    }

    /// The `instance_number`-th instance of `identifier` (1-based).
    pub fn node_instance(&self, identifier: &str, instance_number: u32) -> Option<&TestPlanNode> {
        let index = instance_number.checked_sub(1)? as usize;
        let id = self.by_identifier.get(identifier)?.get(index)?;
        self.nodes.get(id.0)
    }

    pub fn test_parts(&self) -> impl Iterator<Item = &TestPlanNode> {
        self.test_parts.iter().filter_map(|i| self.nodes.get(i.0))
    }

    pub fn item_nodes(&self) -> impl Iterator<Item = &TestPlanNode> {
        self.nodes.iter().filter(|n| n.is_item())
    }

    pub fn parent(&self, key: &TestPlanNodeKey) -> Option<&TestPlanNode> {
        let parent = self.node(key)?.parent?;
        self.nodes.get(parent.0)
    }

    pub fn children(&self, key: &TestPlanNodeKey) -> impl Iterator<Item = &TestPlanNode> {
        self.node(key)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|i| self.nodes.get(i.0))
    }

    /// Ancestors of `key`, nearest first.
    pub fn ancestors(&self, key: &TestPlanNodeKey) -> Vec<&TestPlanNode> {
        let mut out = Vec::new();
        let mut current = self.node(key).and_then(|n| n.parent);
        while let Some(i) = current {
            let Some(node) = self.nodes.get(i.0) else {
                break;
            };
            out.push(node);
            current = node.parent;
        }
        out
    }

    pub fn enclosing_test_part(&self, key: &TestPlanNodeKey) -> Option<&TestPlanNode> {
        let node = self.node(key)?;
        if node.is_test_part() {
            return Some(node);
        }
        self.ancestors(key).into_iter().find(|n| n.is_test_part())
    }

    /// One past the last arena index of the subtree rooted at `index`.
    pub fn subtree_end(&self, index: NodeIndex) -> usize {
        let mut end = index.0 + 1;
        let mut current = index;
        while let Some(last) = self.nodes.get(current.0).and_then(|n| n.children.last()) {
            end = last.0 + 1;
            current = *last;
        }
        end.min(self.nodes.len())
    }

    /// The node at `key` followed by all of its descendants.
    pub fn subtree(&self, key: &TestPlanNodeKey) -> &[TestPlanNode] {
        match self.index_of(key) {
            Some(i) => &self.nodes[i.0..self.subtree_end(i)],
            None => &[],
        }
    }

    /// Item nodes under `key`, in pre-order.
    pub fn items_in(&self, key: &TestPlanNodeKey) -> impl Iterator<Item = &TestPlanNode> {
        self.subtree(key).iter().filter(|n| n.is_item())
    }

    /// Look up the authored part a node instantiates. The part at the key's
    /// global index must carry the key's identifier and, for a node of
    /// this plan, the node's type.
    pub fn resolve_abstract_part<'t>(
        &self,
        test: &'t AssessmentTest,
        key: &TestPlanNodeKey,
    ) -> Result<&'t AbstractPart, PlanError> {
        let part = test.part(key.part_id()).ok_or_else(|| {
            error!(key = %key, "plan node outside the test definition");
            PlanError::GlobalIndexOutOfBounds(key.global_index())
        })?;
        let type_differs = self
            .node(key)
            .is_some_and(|node| node.node_type != part.part_type());
        if part.identifier != key.identifier() || type_differs {
            error!(key = %key, found = %part, "plan node does not match the test definition");
            return Err(PlanError::PartMismatch {
                key: key.clone(),
                found: part.to_string(),
            });
        }
        Ok(part)
    }

    /// Check every node against `test`, failing on the first node that
    /// does not resolve to the part it was planned from.
    pub fn check_against(&self, test: &AssessmentTest) -> Result<(), PlanError> {
        if self.test_identifier != test.identifier() {
            return Err(PlanError::TestMismatch {
                planned: self.test_identifier.clone(),
                found: test.identifier().to_string(),
            });
        }
        for node in &self.nodes {
            self.resolve_abstract_part(test, &node.key)?;
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON form of the node arena, hex encoded.
    ///
    /// Two plans with the same selection and ordering outcome have the
    /// same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.test_identifier.as_bytes());
        for node in &self.nodes {
            // Node fields are plain data; serialization cannot fail.
            if let Ok(bytes) = serde_json::to_vec(node) {
                hasher.update(&bytes);
            }
        }
        hex_encode(&hasher.finalize())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Check the arena is a forest laid out in pre-order with consistent
/// parent, child and sibling links. Returns the root indexes.
fn check_shape(nodes: &[TestPlanNode]) -> Result<Vec<NodeIndex>, PlanError> {
    let malformed = |msg: String| {
        error!(reason = %msg, "malformed test plan");
        PlanError::MalformedPlan(msg)
    };
    let roots: Vec<NodeIndex> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.parent.is_none())
        .map(|(i, _)| NodeIndex(i))
        .collect();

    let mut expected = 0usize;
    let mut stack: Vec<NodeIndex> = roots.iter().rev().copied().collect();
    while let Some(index) = stack.pop() {
        if index.0 != expected {
            return Err(malformed(format!(
                "node {} visited at pre-order position {expected}",
                index.0
            )));
        }
        expected += 1;
        let node = &nodes[index.0];
        if node.parent.is_none() != node.is_test_part() {
            return Err(malformed(format!(
                "{} node {} has parent {:?}",
                node.node_type, node.key, node.parent
            )));
        }
        if node.is_item() && !node.children.is_empty() {
            return Err(malformed(format!("item node {} has children", node.key)));
        }
        for (pos, child) in node.children.iter().enumerate() {
            let Some(child_node) = nodes.get(child.0) else {
                return Err(malformed(format!(
                    "node {} lists child {} beyond {} nodes",
                    node.key,
                    child.0,
                    nodes.len()
                )));
            };
            if child_node.parent != Some(index) || child_node.sibling_index != pos {
                return Err(malformed(format!(
                    "child {} does not link back to {}",
                    child_node.key, node.key
                )));
            }
        }
        stack.extend(node.children.iter().rev().copied());
    }
    if expected != nodes.len() {
        return Err(malformed(format!(
            "{} of {} nodes unreachable from the test parts",
            nodes.len() - expected,
            nodes.len()
        )));
    }
    for (pos, root) in roots.iter().enumerate() {
        if nodes[root.0].sibling_index != pos {
            return Err(malformed(format!(
                "test part {} has sibling index {}, expected {pos}",
                nodes[root.0].key, nodes[root.0].sibling_index
            )));
        }
    }
    Ok(roots)
}

impl TryFrom<PlanData> for TestPlan {
    type Error = PlanError;

    fn try_from(data: PlanData) -> Result<Self, Self::Error> {
        TestPlan::from_nodes(data.test_identifier, data.nodes)
    }
}

impl From<TestPlan> for PlanData {
    fn from(plan: TestPlan) -> Self {
        PlanData {
            test_identifier: plan.test_identifier,
            nodes: plan.nodes,
        }
    }
}

impl fmt::Display for TestPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "test plan for {}", self.test_identifier)?;
        for node in &self.nodes {
            let depth = {
                let mut d = 0;
                let mut p = node.parent;
                while let Some(i) = p {
                    d += 1;
                    p = self.nodes.get(i.0).and_then(|n| n.parent);
                }
                d
            };
            write!(f, "{:indent$}{} [{}]", "", node.key, node.node_type, indent = depth * 2)?;
            if let Some(system_id) = &node.item_system_id {
                write!(f, " -> {system_id}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(id: &str, index: usize, instance: u32) -> TestPlanNodeKey {
        TestPlanNodeKey::new(id, index, instance).unwrap()
    }

    fn node(
        k: TestPlanNodeKey,
        node_type: PartType,
        parent: Option<usize>,
        children: &[usize],
        sibling_index: usize,
    ) -> TestPlanNode {
        TestPlanNode {
            item_system_id: (node_type == PartType::AssessmentItemRef)
                .then(|| format!("sys:{}", k.identifier())),
            key: k,
            node_type,
            effective_control: EffectiveItemSessionControl::default(),
            parent: parent.map(NodeIndex),
            children: children.iter().copied().map(NodeIndex).collect(),
            sibling_index,
        }
    }

    /// P / S{Q, Q'} / R, where Q' is a second instance of Q.
    fn sample() -> Vec<TestPlanNode> {
        vec![
            node(key("P", 0, 1), PartType::TestPart, None, &[1, 4], 0),
            node(key("S", 1, 1), PartType::AssessmentSection, Some(0), &[2, 3], 0),
            node(key("Q", 2, 1), PartType::AssessmentItemRef, Some(1), &[], 0),
            node(key("Q", 2, 2), PartType::AssessmentItemRef, Some(1), &[], 1),
            node(key("R", 3, 1), PartType::AssessmentItemRef, Some(0), &[], 1),
        ]
    }

    #[test]
    fn lookups() {
        let plan = TestPlan::from_nodes("T", sample()).unwrap();
        assert_eq!(plan.len(), 5);
        assert_eq!(plan.test_parts().count(), 1);
        assert_eq!(plan.item_nodes().count(), 3);
        assert_eq!(plan.nodes_for_identifier("Q").len(), 2);
        assert_eq!(plan.node_instance("Q", 2).unwrap().key, key("Q", 2, 2));
        assert!(plan.node_instance("Q", 0).is_none());
        assert!(plan.node_instance("Q", 3).is_none());
        assert_eq!(plan.parent(&key("Q", 2, 2)).unwrap().identifier(), "S");
        assert_eq!(
            plan.children(&key("P", 0, 1)).map(|n| n.identifier()).collect::<Vec<_>>(),
            vec!["S", "R"]
        );
        assert_eq!(plan.subtree(&key("S", 1, 1)).len(), 3);
        assert_eq!(plan.items_in(&key("P", 0, 1)).count(), 3);
        assert_eq!(
            plan.enclosing_test_part(&key("Q", 2, 1)).unwrap().identifier(),
            "P"
        );
        assert_eq!(plan.ancestors(&key("Q", 2, 1)).len(), 2);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let plan = TestPlan::from_nodes("T", sample()).unwrap();
        assert_eq!(
            plan.require(&key("Z", 9, 1)),
            Err(PlanError::UnknownKey(key("Z", 9, 1)))
        );
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut nodes = sample();
        nodes[3].key = key("Q", 2, 1);
        assert_eq!(
            TestPlan::from_nodes("T", nodes),
            Err(PlanError::DuplicateKey(key("Q", 2, 1)))
        );
    }

    #[test]
    fn broken_links_rejected() {
        let mut nodes = sample();
        nodes[3].sibling_index = 0;
        assert!(matches!(
            TestPlan::from_nodes("T", nodes),
            Err(PlanError::MalformedPlan(_))
        ));

        let mut nodes = sample();
        nodes[1].children.push(NodeIndex(42));
        assert!(matches!(
            TestPlan::from_nodes("T", nodes),
            Err(PlanError::MalformedPlan(_))
        ));

        let mut nodes = sample();
        nodes.swap(2, 3);
        assert!(matches!(
            TestPlan::from_nodes("T", nodes),
            Err(PlanError::MalformedPlan(_))
        ));
    }

    #[test]
    fn serde_rebuilds_indexes() {
        let plan = TestPlan::from_nodes("T", sample()).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let back: TestPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_instance("Q", 2), plan.node_instance("Q", 2));
        assert_eq!(back.fingerprint(), plan.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = TestPlan::from_nodes("T", sample()).unwrap();
        let mut nodes = sample();
        nodes[4].item_system_id = Some("other".into());
        let b = TestPlan::from_nodes("T", nodes).unwrap();
        assert_eq!(a.fingerprint().len(), 64);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn display_indents_by_depth() {
        let text = TestPlan::from_nodes("T", sample()).unwrap().to_string();
        assert!(text.contains("\n    Q:2:2 [assessmentItemRef] -> sys:Q"));
        assert!(text.contains("\n  R:3:1 [assessmentItemRef]"));
    }
}
