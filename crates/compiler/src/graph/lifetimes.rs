//! Render target allocation and lifetime management
//!
//! Pass outputs that only live within one frame can share an offscreen target with
//! another output once that one has been consumed for the last time. Outputs that must
//! survive into later frames (history producers, passes that skip frames) keep a
//! dedicated target.

use super::sizing::SizeExpr;
use crate::preset::TargetFormat;
use serde::Serialize;
use std::collections::BTreeMap;

/// Represents the lifetime of a pass output within one frame
#[derive(Debug, Clone)]
pub struct TargetLifetime {
    pub pass_index: usize,
    pub format: TargetFormat,
    pub size: SizeExpr,
    /// Execution step that writes the output
    pub created_at: usize,
    /// Last execution step that reads it
    pub last_used_at: usize,
    /// Contents must survive the frame
    pub persistent: bool,
}

/// An offscreen target the renderer allocates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalTarget {
    pub id: u32,
    pub format: TargetFormat,
    pub size: SizeExpr,
    pub persistent: bool,
    /// Passes writing into this target, in execution order
    pub passes: Vec<usize>,
}

/// Assigns physical targets to pass output lifetimes, reusing a target when the
/// previous occupant has been read for the last time and format and size agree.
///
/// # Arguments
/// * `lifetimes` - Output lifetimes in execution order
///
/// # Returns
/// * `Vec<PhysicalTarget>` - Unique physical targets, ordered by id
/// * `BTreeMap<usize, u32>` - Physical target id of each pass
pub fn assign_physical_targets(lifetimes: &[TargetLifetime]) -> (Vec<PhysicalTarget>, BTreeMap<usize, u32>) {
    let mut targets: Vec<PhysicalTarget> = Vec::new();
    let mut assignments = BTreeMap::new();
    // Latest occupant of each target
    let mut slots: Vec<&TargetLifetime> = Vec::new();

    for lifetime in lifetimes {
        let reusable = if lifetime.persistent {
            None
        } else {
            slots
                .iter()
                .position(|existing| !existing.persistent && existing.last_used_at < lifetime.created_at && existing.format == lifetime.format && existing.size == lifetime.size)
        };

        let id = match reusable {
            Some(id) => {
                slots[id] = lifetime;
                targets[id].passes.push(lifetime.pass_index);
                id
            }
            None => {
                slots.push(lifetime);
                targets.push(PhysicalTarget {
                    id: targets.len() as u32,
                    format: lifetime.format,
                    size: lifetime.size.clone(),
                    persistent: lifetime.persistent,
                    passes: vec![lifetime.pass_index],
                });
                targets.len() - 1
            }
        };
        assignments.insert(lifetime.pass_index, id as u32);
    }

    (targets, assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sizing::{AxisExpr, SizeBase};
    use crate::preset::ScaleFactor;

    fn size(factor: u32) -> SizeExpr {
        let axis = AxisExpr {
            base: SizeBase::Original,
            factors: if factor == 1 { vec![] } else { vec![ScaleFactor::new(factor, 1)] },
        };
        SizeExpr { x: axis.clone(), y: axis }
    }

    fn lifetime(pass_index: usize, created_at: usize, last_used_at: usize) -> TargetLifetime {
        TargetLifetime {
            pass_index,
            format: TargetFormat::Rgba8Unorm,
            size: size(2),
            created_at,
            last_used_at,
            persistent: false,
        }
    }

    #[test]
    fn test_empty_lifetimes() {
        let (targets, assignments) = assign_physical_targets(&[]);
        assert!(targets.is_empty());
        assert!(assignments.is_empty());
    }

    #[test]
    fn test_chain_alternates_two_targets() {
        // Each output is read only by the next pass
        let lifetimes = [lifetime(0, 0, 1), lifetime(1, 1, 2), lifetime(2, 2, 3), lifetime(3, 3, 4)];
        let (targets, assignments) = assign_physical_targets(&lifetimes);
        assert_eq!(targets.len(), 2);
        assert_eq!(assignments[&0], 0);
        assert_eq!(assignments[&1], 1);
        assert_eq!(assignments[&2], 0);
        assert_eq!(assignments[&3], 1);
        assert_eq!(targets[0].passes, vec![0, 2]);
    }

    #[test]
    fn test_overlapping_lifetimes() {
        // Pass 0 is still read by pass 3
        let lifetimes = [lifetime(0, 0, 3), lifetime(1, 1, 2), lifetime(2, 2, 3)];
        let (targets, assignments) = assign_physical_targets(&lifetimes);
        assert_eq!(targets.len(), 3);
        assert_ne!(assignments[&0], assignments[&2]);
    }

    #[test]
    fn test_incompatible_format_and_size() {
        let mut float = lifetime(1, 2, 3);
        float.format = TargetFormat::Rgba16Float;
        let mut larger = lifetime(2, 4, 5);
        larger.size = size(4);
        let lifetimes = [lifetime(0, 0, 1), float, larger];
        let (targets, _) = assign_physical_targets(&lifetimes);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[1].format, TargetFormat::Rgba16Float);
        assert_eq!(targets[2].size, size(4));
    }

    #[test]
    fn test_persistent_targets_are_never_shared() {
        let mut history = lifetime(0, 0, 1);
        history.persistent = true;
        let mut feedback = lifetime(2, 2, 3);
        feedback.persistent = true;
        let lifetimes = [history, lifetime(1, 1, 2), feedback, lifetime(3, 3, 4)];
        let (targets, assignments) = assign_physical_targets(&lifetimes);
        assert_eq!(targets.len(), 3);
        assert!(targets[0].persistent);
        assert_eq!(assignments[&3], assignments[&1]);
        assert_eq!(targets.iter().filter(|t| t.persistent).count(), 2);
    }
}
