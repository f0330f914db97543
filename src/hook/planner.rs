//! Invocation planning over the required-hook DAG
//!
//! Pure function from the attached hook set to a total invocation order
//! plus foreground/background bucket assignments. Rebuilt by the operator
//! on every attach or detach; workers only ever read the resulting plan.
//!
//! Ordering rules:
//! - every used required hook precedes its dependents;
//! - among unordered hooks, smaller `invoke_priority` runs first;
//! - priority ties break by insertion order.
//!
//! Bucket rules: foreground hooks get target 0. Each background hook first
//! reached in visit order opens a fresh strictly-positive bucket id, which
//! propagates to its transitively required background hooks that no
//! foreground hook also requires, so one bucket is a self-contained
//! dependency closure dispatched as a single background task. A background
//! hook required by a foreground hook is promoted to foreground.

use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Planner view of one attached hook
#[derive(Debug, Clone)]
pub struct PlannerHook {
    /// Arena id of the hook
    pub id: u32,
    pub priority: i32,
    pub background: bool,
    /// Attach-order tie-break
    pub insertion: u32,
    /// Arena ids of the used required hooks
    pub required: Vec<u32>,
}

/// Planner output for one hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSlot {
    /// Position in the total invocation order
    pub index: u32,
    /// 0 = foreground; otherwise the background bucket id
    pub target: u32,
}

/// Compute the invocation plan for the given hook set
///
/// # Errors
///
/// [`Error::DependencyViolation`] when the required-hook edges contain a
/// cycle. Edges referring to ids outside the set are ignored.
pub fn plan_invocations(hooks: &[PlannerHook]) -> Result<HashMap<u32, PlannedSlot>> {
    let by_id: HashMap<u32, &PlannerHook> = hooks.iter().map(|h| (h.id, h)).collect();

    // required -> dependents adjacency, restricted to attached ids
    let mut dependents: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut indegree: HashMap<u32, usize> = hooks.iter().map(|h| (h.id, 0)).collect();
    for hook in hooks {
        for req in &hook.required {
            if !by_id.contains_key(req) {
                continue;
            }
            dependents.entry(*req).or_default().push(hook.id);
            *indegree.entry(hook.id).or_default() += 1;
        }
    }

    // Kahn's walk with a priority-ordered ready set
    let mut ready: BinaryHeap<Reverse<(i32, u32, u32)>> = hooks
        .iter()
        .filter(|h| indegree[&h.id] == 0)
        .map(|h| Reverse((h.priority, h.insertion, h.id)))
        .collect();

    let mut visit_order = Vec::with_capacity(hooks.len());
    while let Some(Reverse((_, _, id))) = ready.pop() {
        visit_order.push(id);
        for dep in dependents.get(&id).cloned().unwrap_or_default() {
            let Some(remaining) = indegree.get_mut(&dep) else {
                continue;
            };
            *remaining -= 1;
            if *remaining == 0 {
                let hook = by_id[&dep];
                ready.push(Reverse((hook.priority, hook.insertion, hook.id)));
            }
        }
    }

    if visit_order.len() != hooks.len() {
        return Err(Error::DependencyViolation(
            "required-hook edges contain a cycle".to_string(),
        ));
    }

    // Foreground closure: everything a foreground hook transitively
    // requires must run synchronously before it
    let mut foreground: HashSet<u32> = HashSet::new();
    let mut stack: Vec<u32> = hooks.iter().filter(|h| !h.background).map(|h| h.id).collect();
    while let Some(id) = stack.pop() {
        if !foreground.insert(id) {
            continue;
        }
        for req in &by_id[&id].required {
            if by_id.contains_key(req) {
                stack.push(*req);
            }
        }
    }

    // Bucket roots are background hooks no other background hook depends
    // on; each root floods its required closure so the bucket dispatches as
    // one self-contained task. A dependency shared between buckets stays
    // with the first root that claimed it.
    let mut background_dependents: HashMap<u32, usize> = HashMap::new();
    for hook in hooks {
        if foreground.contains(&hook.id) {
            continue;
        }
        for req in &hook.required {
            if by_id.contains_key(req) {
                *background_dependents.entry(*req).or_default() += 1;
            }
        }
    }

    let mut targets: HashMap<u32, u32> = HashMap::new();
    let mut next_bucket = 1u32;
    for &id in &visit_order {
        if foreground.contains(&id) || background_dependents.get(&id).copied().unwrap_or(0) > 0 {
            continue;
        }
        let bucket = next_bucket;
        next_bucket += 1;
        let mut closure = vec![id];
        while let Some(member) = closure.pop() {
            if foreground.contains(&member) || targets.contains_key(&member) {
                continue;
            }
            targets.insert(member, bucket);
            for req in &by_id[&member].required {
                if by_id.contains_key(req) {
                    closure.push(*req);
                }
            }
        }
    }

    Ok(visit_order
        .iter()
        .enumerate()
        .map(|(index, id)| {
            let target = targets.get(id).copied().unwrap_or(0);
            (
                *id,
                PlannedSlot {
                    index: index as u32,
                    target,
                },
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(id: u32, priority: i32, background: bool, required: &[u32]) -> PlannerHook {
        PlannerHook {
            id,
            priority,
            background,
            insertion: id,
            required: required.to_vec(),
        }
    }

    fn indices(plan: &HashMap<u32, PlannedSlot>, ids: &[u32]) -> Vec<u32> {
        ids.iter().map(|id| plan[id].index).collect()
    }

    #[test]
    fn test_priority_orders_independent_hooks() {
        // A(priority 10), B(priority 0), C(priority 5, requires A)
        let plan = plan_invocations(&[
            hook(1, 10, false, &[]),
            hook(2, 0, false, &[]),
            hook(3, 5, false, &[1]),
        ])
        .unwrap();

        // Expected order: B, A, C
        assert_eq!(indices(&plan, &[2, 1, 3]), vec![0, 1, 2]);
    }

    #[test]
    fn test_required_precedes_dependent() {
        let plan = plan_invocations(&[hook(1, 0, false, &[2]), hook(2, 100, false, &[])]).unwrap();
        assert!(plan[&2].index < plan[&1].index);
    }

    #[test]
    fn test_tie_break_by_insertion() {
        let plan = plan_invocations(&[
            hook(1, 5, false, &[]),
            hook(2, 5, false, &[]),
            hook(3, 5, false, &[]),
        ])
        .unwrap();
        assert_eq!(indices(&plan, &[1, 2, 3]), vec![0, 1, 2]);
    }

    #[test]
    fn test_cycle_rejected() {
        let result = plan_invocations(&[hook(1, 0, false, &[2]), hook(2, 0, false, &[1])]);
        assert!(matches!(
            result,
            Err(crate::error::Error::DependencyViolation(_))
        ));
    }

    #[test]
    fn test_foreground_hooks_get_target_zero() {
        let plan = plan_invocations(&[hook(1, 0, false, &[]), hook(2, 1, false, &[])]).unwrap();
        assert_eq!(plan[&1].target, 0);
        assert_eq!(plan[&2].target, 0);
    }

    #[test]
    fn test_background_buckets_are_distinct() {
        let plan = plan_invocations(&[hook(1, 0, true, &[]), hook(2, 1, true, &[])]).unwrap();
        assert!(plan[&1].target > 0);
        assert!(plan[&2].target > 0);
        assert_ne!(plan[&1].target, plan[&2].target);
    }

    #[test]
    fn test_background_closure_shares_bucket() {
        // 2 (bg) requires 1 (bg): one self-contained bucket
        let plan = plan_invocations(&[hook(1, 0, true, &[]), hook(2, 0, true, &[1])]).unwrap();
        assert!(plan[&1].target > 0);
        assert_eq!(plan[&1].target, plan[&2].target);
        assert!(plan[&1].index < plan[&2].index);
    }

    #[test]
    fn test_background_promoted_when_foreground_requires_it() {
        // 2 (fg) requires 1 (bg): 1 must be foreground
        let plan = plan_invocations(&[hook(1, 0, true, &[]), hook(2, 0, false, &[1])]).unwrap();
        assert_eq!(plan[&1].target, 0);
        assert_eq!(plan[&2].target, 0);
    }

    #[test]
    fn test_promotion_is_transitive() {
        // 3 (fg) -> 2 (bg) -> 1 (bg): both promoted
        let plan = plan_invocations(&[
            hook(1, 0, true, &[]),
            hook(2, 0, true, &[1]),
            hook(3, 0, false, &[2]),
        ])
        .unwrap();
        assert_eq!(plan[&1].target, 0);
        assert_eq!(plan[&2].target, 0);
        assert_eq!(plan[&3].target, 0);
    }

    #[test]
    fn test_shared_background_dependency_lands_in_first_bucket() {
        // Two bg hooks share a bg dependency; first-reached bucket wins
        let plan = plan_invocations(&[
            hook(1, 0, true, &[]),
            hook(2, 1, true, &[1]),
            hook(3, 2, true, &[1]),
        ])
        .unwrap();
        assert_eq!(plan[&1].target, plan[&2].target);
        assert_ne!(plan[&2].target, plan[&3].target);
    }

    #[test]
    fn test_dangling_required_edge_ignored() {
        let plan = plan_invocations(&[hook(1, 0, false, &[99])]).unwrap();
        assert_eq!(plan[&1].index, 0);
    }

    #[test]
    fn test_empty_set() {
        assert!(plan_invocations(&[]).unwrap().is_empty());
    }
}
