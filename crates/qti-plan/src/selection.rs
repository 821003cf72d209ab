//! Selection and ordering of a section's children.
//!
//! Selection decides which children take part in an attempt and how many
//! instances of each; ordering optionally shuffles the result while fixed
//! children hold their positions. Both draw from a caller-supplied RNG, so
//! a seeded RNG reproduces the same outcome.

use qti_core::{AbstractPart, AssessmentTest, PartId};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

/// Apply `section`'s selection. The result is in document order, with each
/// child repeated once per drawn instance.
///
/// Out-of-range requests are corrected rather than rejected: a `select`
/// below the number of required children is raised to it, and without
/// replacement a `select` above the child count selects every child.
pub fn select_children<R: Rng + ?Sized>(
    test: &AssessmentTest,
    section: &AbstractPart,
    rng: &mut R,
) -> Vec<PartId> {
    let children = &section.children;
    let Some(selection) = section.selection() else {
        return children.clone();
    };
    let child_count = children.len();
    if child_count == 0 {
        return Vec::new();
    }
    let mut requested = selection.select as usize;

    if !selection.with_replacement && requested > child_count {
        warn!(
            section = %section.identifier,
            requested,
            child_count,
            "selection without replacement exceeds child count, selecting all children"
        );
        return children.clone();
    }

    let required_mask: Vec<bool> = children
        .iter()
        .map(|c| test.part(*c).is_some_and(|p| p.is_required()))
        .collect();
    let required_count = required_mask.iter().filter(|r| **r).count();
    if required_count > requested {
        warn!(
            section = %section.identifier,
            requested,
            required_count,
            "selection smaller than required children, selecting all required children"
        );
        requested = required_count;
    }

    let mut per_child: Vec<usize> = required_mask.iter().map(|r| usize::from(*r)).collect();
    let remaining = requested - required_count;
    if selection.with_replacement {
        for _ in 0..remaining {
            per_child[rng.gen_range(0..child_count)] += 1;
        }
    } else {
        let pool: Vec<usize> = (0..child_count).filter(|i| !required_mask[*i]).collect();
        for i in pool.choose_multiple(rng, remaining) {
            per_child[*i] += 1;
        }
    }

    let result: Vec<PartId> = children
        .iter()
        .zip(&per_child)
        .flat_map(|(id, n)| std::iter::repeat(*id).take(*n))
        .collect();
    debug!(
        section = %section.identifier,
        selected = result.len(),
        "selection resolved"
    );
    result
}

/// Shuffle `entries`, leaving every fixed entry at its original position.
pub fn shuffle_preserving_fixed<T, R: Rng + ?Sized>(
    entries: Vec<T>,
    is_fixed: impl Fn(&T) -> bool,
    rng: &mut R,
) -> Vec<T> {
    let mut slots: Vec<Option<T>> = Vec::with_capacity(entries.len());
    let mut movable = Vec::new();
    for entry in entries {
        if is_fixed(&entry) {
            slots.push(Some(entry));
        } else {
            slots.push(None);
            movable.push(entry);
        }
    }
    movable.shuffle(rng);
    let mut shuffled = movable.into_iter();
    slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| shuffled.next()))
        .collect()
}
