//! Test plan construction.
//!
//! The planner walks the authored hierarchy once per attempt. Each section
//! resolves its own selection and ordering, recursing into every drawn
//! instance; invisible sections are then dissolved into their parent, and
//! the surviving tree is numbered and flattened into a [`TestPlan`].

use std::collections::HashMap;

use qti_core::{AbstractPart, AssessmentTest, PartId};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::control::ControlResolver;
use crate::error::PlanError;
use crate::key::TestPlanNodeKey;
use crate::plan::{NodeIndex, TestPlan, TestPlanNode};
use crate::selection::{select_children, shuffle_preserving_fixed};

/// Resolves item references to item system ids.
///
/// Returning `None` drops the reference from the plan.
pub trait ItemResolver {
    fn resolve(&self, item_ref: &AbstractPart, href: &str) -> Option<String>;
}

/// Maps `href` to system id.
impl ItemResolver for HashMap<String, String> {
    fn resolve(&self, _item_ref: &AbstractPart, href: &str) -> Option<String> {
        self.get(href).cloned()
    }
}

/// Uses each `href` verbatim as the system id.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl ItemResolver for IdentityResolver {
    fn resolve(&self, _item_ref: &AbstractPart, href: &str) -> Option<String> {
        Some(href.to_string())
    }
}

/// An instance tree before numbering.
#[derive(Debug)]
struct BuildNode {
    part: PartId,
    system_id: Option<String>,
    children: Vec<BuildNode>,
}

pub struct TestPlanner<'a, R: ItemResolver + ?Sized> {
    test: &'a AssessmentTest,
    resolver: &'a R,
}

impl<'a, R: ItemResolver + ?Sized> TestPlanner<'a, R> {
    pub fn new(test: &'a AssessmentTest, resolver: &'a R) -> Self {
        Self { test, resolver }
    }

    /// Build a plan, drawing every selection and shuffle from `rng`.
    pub fn plan<G: Rng + ?Sized>(&self, rng: &mut G) -> Result<TestPlan, PlanError> {
        let mut roots = Vec::new();
        for test_part in self.test.test_parts() {
            let children = self.build_children(test_part, rng)?;
            roots.push(BuildNode {
                part: test_part.id,
                system_id: None,
                children,
            });
        }

        let mut emitter = Emitter {
            test: self.test,
            nodes: Vec::new(),
            instances: HashMap::new(),
            controls: ControlResolver::new(),
        };
        for (i, root) in roots.into_iter().enumerate() {
            emitter.emit(root, None, i)?;
        }
        let plan = TestPlan::from_nodes(self.test.identifier(), emitter.nodes)?;
        info!(
            test = %plan.test_identifier(),
            nodes = plan.len(),
            items = plan.item_nodes().count(),
            "test plan built"
        );
        Ok(plan)
    }

    fn build_part<G: Rng + ?Sized>(
        &self,
        id: PartId,
        rng: &mut G,
    ) -> Result<Option<BuildNode>, PlanError> {
        let part = self
            .test
            .part(id)
            .ok_or(PlanError::GlobalIndexOutOfBounds(id.index()))?;
        if let Some(item) = part.as_item_ref() {
            return Ok(match self.resolver.resolve(part, &item.href) {
                Some(system_id) => Some(BuildNode {
                    part: id,
                    system_id: Some(system_id),
                    children: Vec::new(),
                }),
                None => {
                    warn!(
                        item = %part.identifier,
                        href = %item.href,
                        "item reference did not resolve, dropping it from the plan"
                    );
                    None
                }
            });
        }
        Ok(Some(BuildNode {
            part: id,
            system_id: None,
            children: self.build_children(part, rng)?,
        }))
    }

    /// Select, build and order the children of `parent`, then dissolve
    /// invisible sections into the result.
    fn build_children<G: Rng + ?Sized>(
        &self,
        parent: &AbstractPart,
        rng: &mut G,
    ) -> Result<Vec<BuildNode>, PlanError> {
        let mut built = Vec::new();
        for id in select_children(self.test, parent, rng) {
            if let Some(node) = self.build_part(id, rng)? {
                built.push(node);
            }
        }

        if parent.shuffles() {
            // Loose invisible sections mix with their siblings; the rest
            // move as one block.
            built = self.dissolve_invisible(built, |keep_together| !keep_together);
            built = shuffle_preserving_fixed(
                built,
                |n| self.test.part(n.part).is_some_and(|p| p.is_fixed()),
                rng,
            );
        }
        let built = self.dissolve_invisible(built, |_| true);
        debug!(
            part = %parent.identifier,
            children = built.len(),
            "children resolved"
        );
        Ok(built)
    }

    /// Replace every invisible section whose `keep_together` flag passes
    /// `filter` by its children.
    fn dissolve_invisible(
        &self,
        nodes: Vec<BuildNode>,
        filter: impl Fn(bool) -> bool,
    ) -> Vec<BuildNode> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            let dissolve = self
                .test
                .part(node.part)
                .and_then(|p| p.as_section())
                .is_some_and(|s| !s.visible && filter(s.keep_together));
            if dissolve {
                out.extend(node.children);
            } else {
                out.push(node);
            }
        }
        out
    }
}

struct Emitter<'a> {
    test: &'a AssessmentTest,
    nodes: Vec<TestPlanNode>,
    instances: HashMap<String, u32>,
    controls: ControlResolver,
}

impl Emitter<'_> {
    /// Append `build` and its subtree in pre-order.
    fn emit(
        &mut self,
        build: BuildNode,
        parent: Option<NodeIndex>,
        sibling_index: usize,
    ) -> Result<NodeIndex, PlanError> {
        let part = self
            .test
            .part(build.part)
            .ok_or(PlanError::GlobalIndexOutOfBounds(build.part.index()))?;
        let count = self.instances.entry(part.identifier.clone()).or_insert(0);
        *count += 1;
        let key = TestPlanNodeKey::new(part.identifier.clone(), part.global_index(), *count)?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(TestPlanNode {
            key,
            node_type: part.part_type(),
            effective_control: self.controls.resolve(self.test, part.id),
            parent,
            children: Vec::with_capacity(build.children.len()),
            sibling_index,
            item_system_id: build.system_id,
        });
        for (i, child) in build.children.into_iter().enumerate() {
            let child_index = self.emit(child, Some(index), i)?;
            self.nodes[index.0].children.push(child_index);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};
    use qti_core::ItemSessionControl;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn identifiers(plan: &TestPlan) -> Vec<String> {
        plan.nodes().iter().map(|n| n.identifier().to_string()).collect()
    }

    #[test]
    fn plain_test_keeps_document_order() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .section(
                        SectionBuilder::new("S")
                            .item(ItemRefBuilder::new("Q1", "q1"))
                            .item(ItemRefBuilder::new("Q2", "q2")),
                    )
                    .item(ItemRefBuilder::new("Q3", "q3")),
            )
            .build()
            .unwrap();
        let plan = TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(identifiers(&plan), vec!["P", "S", "Q1", "Q2", "Q3"]);
        let q2 = plan.node_instance("Q2", 1).unwrap();
        assert_eq!(q2.key.global_index(), 3);
        assert_eq!(q2.item_system_id.as_deref(), Some("q2"));
        assert_eq!(q2.sibling_index, 1);
    }

    #[test]
    fn unresolved_items_are_dropped() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .item(ItemRefBuilder::new("Q1", "known"))
                    .item(ItemRefBuilder::new("Q2", "missing")),
            )
            .build()
            .unwrap();
        let resolver: HashMap<String, String> =
            [("known".to_string(), "item-1".to_string())].into_iter().collect();
        let plan = TestPlanner::new(&test, &resolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(identifiers(&plan), vec!["P", "Q1"]);
        assert!(plan.nodes_for_identifier("Q2").is_empty());
    }

    #[test]
    fn duplicate_identifiers_get_distinct_keys() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .section(SectionBuilder::new("A").item(ItemRefBuilder::new("Q", "q1")))
                    .section(SectionBuilder::new("B").item(ItemRefBuilder::new("Q", "q2"))),
            )
            .build()
            .unwrap();
        let plan = TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        let qs = plan.nodes_for_identifier("Q");
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].key.to_string(), "Q:2:1");
        assert_eq!(qs[1].key.to_string(), "Q:4:2");
    }

    #[test]
    fn invisible_section_is_flattened() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P").section(
                    SectionBuilder::new("S")
                        .item(ItemRefBuilder::new("Q1", "q1"))
                        .section(
                            SectionBuilder::new("Hidden")
                                .invisible(true)
                                .item(ItemRefBuilder::new("Q2", "q2"))
                                .item(ItemRefBuilder::new("Q3", "q3")),
                        )
                        .item(ItemRefBuilder::new("Q4", "q4")),
                ),
            )
            .build()
            .unwrap();
        let plan = TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(identifiers(&plan), vec!["P", "S", "Q1", "Q2", "Q3", "Q4"]);
        assert_eq!(plan.parent(&plan.node_instance("Q2", 1).unwrap().key).unwrap().identifier(), "S");
    }

    #[test]
    fn kept_together_block_stays_contiguous_under_shuffle() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P").section(
                    SectionBuilder::new("S")
                        .shuffle()
                        .item(ItemRefBuilder::new("Q1", "q1"))
                        .section(
                            SectionBuilder::new("Block")
                                .invisible(true)
                                .item(ItemRefBuilder::new("B1", "b1"))
                                .item(ItemRefBuilder::new("B2", "b2")),
                        )
                        .item(ItemRefBuilder::new("Q2", "q2"))
                        .item(ItemRefBuilder::new("Q3", "q3")),
                ),
            )
            .build()
            .unwrap();
        for seed in 0..30 {
            let plan = TestPlanner::new(&test, &IdentityResolver)
                .plan(&mut StdRng::seed_from_u64(seed))
                .unwrap();
            let ids = identifiers(&plan);
            let b1 = ids.iter().position(|i| i == "B1").unwrap();
            assert_eq!(ids[b1 + 1], "B2", "seed {seed}: {ids:?}");
            assert!(!ids.contains(&"Block".to_string()));
        }
    }

    #[test]
    fn effective_control_is_cascaded() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .control(ItemSessionControl::default().with_allow_comment(true))
                    .item(
                        ItemRefBuilder::new("Q", "q")
                            .control(ItemSessionControl::default().with_max_attempts(3)),
                    ),
            )
            .build()
            .unwrap();
        let plan = TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        let q = plan.node_instance("Q", 1).unwrap().effective_control;
        assert_eq!(q.max_attempts, 3);
        assert!(q.allow_comment);
        assert_eq!(plan.node_instance("P", 1).unwrap().effective_control.max_attempts, 1);
    }
}
