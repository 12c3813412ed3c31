//! Dependency graph builder - orders catalog steps into a plan

use crate::catalog::Catalog;
use crate::error::{CatalogError, CycleError};
use crate::step::Step;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// An immutable execution order satisfying every prerequisite
#[derive(Debug, Clone)]
pub struct Plan {
    identity: String,
    label: String,
    env: BTreeMap<String, String>,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    /// Narrowed by [`Plan::select`]; unselected steps keep their records
    selected: bool,
}

/// Order a catalog's steps topologically.
///
/// When several steps are ready at once, the one declared first in the
/// catalog goes first, so the same catalog always yields the same plan.
pub fn build_plan(catalog: &Catalog) -> Result<Plan, CycleError> {
    let steps = catalog.steps();
    let n = steps.len();

    let mut remaining = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, step) in steps.iter().enumerate() {
        let unique: BTreeSet<usize> = step
            .prerequisites
            .iter()
            .filter_map(|p| catalog.position(p))
            .collect();
        remaining[i] = unique.len();
        for p in unique {
            dependents[p].push(i);
        }
    }

    // Ready set keyed by declaration position gives the tie-break for free
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &d in &dependents[next] {
            remaining[d] -= 1;
            if remaining[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != n {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let stuck = (0..n)
            .filter(|i| !placed.contains(i))
            .map(|i| steps[i].id.clone())
            .collect();
        return Err(CycleError { remaining: stuck });
    }

    let ordered: Vec<Step> = order.into_iter().map(|i| steps[i].clone()).collect();
    Ok(Plan::from_ordered(
        catalog.identity().to_string(),
        catalog.label(),
        catalog.env().clone(),
        ordered,
    ))
}

impl Plan {
    fn from_ordered(
        identity: String,
        label: String,
        env: BTreeMap<String, String>,
        steps: Vec<Step>,
    ) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self {
            identity,
            label,
            env,
            steps,
            index,
            selected: false,
        }
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Position of a step in the plan
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Identity of the catalog this plan came from
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Environment shared by every step
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Whether this plan covers only part of its catalog
    pub fn is_selection(&self) -> bool {
        self.selected
    }

    /// Step ids in execution order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Restrict the plan to `targets` and their transitive prerequisites.
    ///
    /// Plan order is preserved. The identity is kept so the narrowed plan
    /// shares recorded state with the full one.
    pub fn select(&self, targets: &[String]) -> Result<Plan, CatalogError> {
        let mut keep = HashSet::new();
        let mut pending: Vec<&str> = Vec::new();

        for target in targets {
            if !self.index.contains_key(target) {
                return Err(CatalogError::UnknownStep { id: target.clone() });
            }
            pending.push(target);
        }

        while let Some(id) = pending.pop() {
            if keep.insert(id.to_string())
                && let Some(step) = self.get(id)
            {
                pending.extend(step.prerequisites.iter().map(String::as_str));
            }
        }

        let steps = self
            .steps
            .iter()
            .filter(|s| keep.contains(&s.id))
            .cloned()
            .collect();
        let mut narrowed = Plan::from_ordered(
            self.identity.clone(),
            self.label.clone(),
            self.env.clone(),
            steps,
        );
        narrowed.selected = true;
        Ok(narrowed)
    }

    /// Group plan positions into waves that may run concurrently.
    ///
    /// A wave is a run of consecutive `parallel_safe` steps none of which
    /// directly depends on another member. Because waves are contiguous in
    /// plan order, any indirect dependency would pass through a member, so
    /// direct edges are enough. With `max_jobs <= 1` every wave has one step.
    pub fn waves(&self, max_jobs: usize) -> Vec<Vec<usize>> {
        let mut waves = Vec::new();
        let mut current: Vec<usize> = Vec::new();

        for (i, step) in self.steps.iter().enumerate() {
            let joins = max_jobs > 1
                && step.parallel_safe
                && !current.is_empty()
                && current.iter().all(|&j| {
                    let member = &self.steps[j];
                    member.parallel_safe && !step.depends_on(&member.id)
                });

            if !joins && !current.is_empty() {
                waves.push(std::mem::take(&mut current));
            }
            current.push(i);
        }

        if !current.is_empty() {
            waves.push(current);
        }
        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Category;

    fn step(id: &str, after: &[&str]) -> Step {
        Step::new(id, Category::Build, "true").after(after.iter().copied())
    }

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.ids().collect()
    }

    fn assert_topological(plan: &Plan) {
        for (pos, step) in plan.steps().iter().enumerate() {
            for prereq in &step.prerequisites {
                let p = plan.position(prereq).expect("prerequisite in plan");
                assert!(
                    p < pos,
                    "{} at {} runs before its prerequisite {} at {}",
                    step.id,
                    pos,
                    prereq,
                    p
                );
            }
        }
    }

    #[test]
    fn test_declaration_order_tie_break() {
        let catalog =
            Catalog::from_steps(vec![step("c", &[]), step("a", &[]), step("b", &[])]).unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(ids(&plan), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_prerequisite_declared_later() {
        let catalog = Catalog::from_steps(vec![
            step("docker-build", &["docker"]),
            step("apt", &[]),
            step("docker", &["apt"]),
        ])
        .unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(ids(&plan), vec!["apt", "docker", "docker-build"]);
    }

    #[test]
    fn test_diamond() {
        let catalog = Catalog::from_steps(vec![
            step("top", &["left", "right"]),
            step("right", &["base"]),
            step("left", &["base"]),
            step("base", &[]),
        ])
        .unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(ids(&plan), vec!["base", "right", "left", "top"]);
        assert_topological(&plan);
    }

    #[test]
    fn test_duplicate_prerequisite_entries() {
        let catalog =
            Catalog::from_steps(vec![step("a", &[]), step("b", &["a", "a"])]).unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(ids(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_unchecked_cycle_fails_ordering() {
        let catalog = Catalog::from_steps_unchecked(vec![
            step("ok", &[]),
            step("x", &["y"]),
            step("y", &["x"]),
        ])
        .unwrap();
        let err = build_plan(&catalog).unwrap_err();
        assert_eq!(err.remaining, vec!["x", "y"]);
    }

    /// Small xorshift so generated catalogs are reproducible
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    #[test]
    fn test_generated_catalogs_are_topological() {
        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);

        for _ in 0..50 {
            let n = 2 + rng.below(20);
            // Edges only point from higher to lower rank, so the graph is acyclic
            let mut steps: Vec<Step> = (0..n)
                .map(|rank| {
                    let mut prereqs = Vec::new();
                    for lower in 0..rank {
                        if rng.below(4) == 0 {
                            prereqs.push(format!("s{lower}"));
                        }
                    }
                    Step::new(format!("s{rank}"), Category::Build, "true").after(prereqs)
                })
                .collect();

            // Shuffle declaration order
            for i in (1..steps.len()).rev() {
                let j = rng.below(i + 1);
                steps.swap(i, j);
            }

            let catalog = Catalog::from_steps(steps).unwrap();
            let plan = build_plan(&catalog).unwrap();
            assert_eq!(plan.len(), n);
            assert_topological(&plan);
        }
    }

    #[test]
    fn test_select_pulls_in_prerequisites() {
        let catalog = Catalog::from_steps(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("unrelated", &[]),
            step("c", &["b"]),
        ])
        .unwrap();
        let plan = build_plan(&catalog).unwrap();
        let narrowed = plan.select(&["c".to_string()]).unwrap();
        assert_eq!(ids(&narrowed), vec!["a", "b", "c"]);
        assert_eq!(narrowed.identity(), plan.identity());
        assert!(narrowed.is_selection());
        assert!(!plan.is_selection());
    }

    #[test]
    fn test_select_unknown_target() {
        let catalog = Catalog::from_steps(vec![step("a", &[])]).unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert!(matches!(
            plan.select(&["nope".to_string()]),
            Err(CatalogError::UnknownStep { .. })
        ));
    }

    #[test]
    fn test_waves_sequential_with_one_job() {
        let catalog = Catalog::from_steps(vec![
            step("a", &[]).parallel_safe(),
            step("b", &[]).parallel_safe(),
        ])
        .unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(plan.waves(1), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_waves_group_independent_parallel_steps() {
        let catalog = Catalog::from_steps(vec![
            step("apt", &[]),
            step("fetch-a", &["apt"]).parallel_safe(),
            step("fetch-b", &["apt"]).parallel_safe(),
            step("unpack-a", &["fetch-a"]).parallel_safe(),
            step("service", &[]),
        ])
        .unwrap();
        let plan = build_plan(&catalog).unwrap();
        assert_eq!(
            ids(&plan),
            vec!["apt", "fetch-a", "fetch-b", "unpack-a", "service"]
        );
        assert_eq!(
            plan.waves(4),
            vec![vec![0], vec![1, 2], vec![3], vec![4]]
        );
    }
}
