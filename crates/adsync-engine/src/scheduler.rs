//! Platform scheduler: dependency-aware execution groups.
//!
//! Kahn's topological sort over the platform dependency DAG. Each group is
//! the frontier of zero-in-degree platforms at one iteration; all of a
//! group's dependencies live in earlier groups, so members may run in
//! parallel. Priority (then name) breaks ties for deterministic output.

use std::collections::{BTreeMap, HashMap, HashSet};

use adsync_types::EtlError;
use tracing::debug;

use crate::config::types::PlatformEntry;

/// Scheduler over one run's enabled platform set.
pub struct PlatformScheduler {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    priorities: HashMap<String, i32>,
}

impl PlatformScheduler {
    /// Build the dependency graph for the given platforms. Dependencies on
    /// platforms outside the set (disabled or unknown) are ignored for
    /// grouping; the validator has already rejected truly unknown names.
    #[must_use]
    pub fn new(platforms: &[&PlatformEntry]) -> Self {
        let names: HashSet<&str> = platforms.iter().map(|p| p.name.as_str()).collect();
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut priorities = HashMap::new();

        for platform in platforms {
            let deps: Vec<String> = platform
                .depends_on
                .iter()
                .filter(|d| names.contains(d.as_str()))
                .cloned()
                .collect();
            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(platform.name.clone());
            }
            dependencies.insert(platform.name.clone(), deps);
            priorities.insert(platform.name.clone(), platform.priority);
        }

        Self {
            dependencies,
            dependents,
            priorities,
        }
    }

    /// Produce ordered execution groups.
    ///
    /// # Errors
    ///
    /// Returns a config error naming a platform on a dependency cycle.
    pub fn schedule(&self) -> Result<Vec<Vec<String>>, EtlError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut frontier: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(name, _)| *name)
            .collect();
        self.sort_by_priority(&mut frontier);

        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut scheduled = 0usize;

        while !frontier.is_empty() {
            let group: Vec<String> = frontier.iter().map(ToString::to_string).collect();
            let mut next: Vec<&str> = Vec::new();
            for name in &frontier {
                scheduled += 1;
                for dependent in self.dependents.get(*name).into_iter().flatten() {
                    let degree = in_degree
                        .get_mut(dependent.as_str())
                        .expect("dependent is in the platform set");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent.as_str());
                    }
                }
            }
            self.sort_by_priority(&mut next);
            groups.push(group);
            frontier = next;
        }

        if scheduled != self.dependencies.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(name, _)| *name)
                .collect();
            return Err(EtlError::config(
                "CIRCULAR_DEPENDENCY",
                format!("circular dependency involving platform(s): {}", stuck.join(", ")),
            ));
        }

        debug!(groups = groups.len(), "scheduled platforms into execution groups");
        Ok(groups)
    }

    /// Whether every dependency of `platform` is in the completed set.
    #[must_use]
    pub fn can_execute(&self, platform: &str, completed: &HashSet<String>) -> bool {
        self.dependencies
            .get(platform)
            .is_none_or(|deps| deps.iter().all(|d| completed.contains(d)))
    }

    /// Direct dependencies of a platform.
    #[must_use]
    pub fn dependencies_of(&self, platform: &str) -> &[String] {
        self.dependencies.get(platform).map_or(&[], Vec::as_slice)
    }

    /// Every platform that transitively depends on `platform`.
    #[must_use]
    pub fn transitive_dependents(&self, platform: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut stack: Vec<&str> = vec![platform];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents.get(current).into_iter().flatten() {
                if result.insert(dependent.clone()) {
                    stack.push(dependent.as_str());
                }
            }
        }
        result
    }

    fn sort_by_priority(&self, names: &mut [&str]) {
        names.sort_by_key(|name| (self.priorities.get(*name).copied().unwrap_or(i32::MAX), *name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, priority: i32, deps: &[&str]) -> PlatformEntry {
        PlatformEntry {
            name: name.to_string(),
            enabled: true,
            priority,
            timeout: None,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            retry: crate::config::types::RetryPolicy::default(),
        }
    }

    #[test]
    fn independent_platforms_form_a_single_group() {
        let platforms = [
            entry("microsoft", 10, &[]),
            entry("linkedin", 20, &[]),
            entry("facebook", 30, &[]),
        ];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let groups = PlatformScheduler::new(&refs).schedule().unwrap();
        assert_eq!(groups, vec![vec!["microsoft", "linkedin", "facebook"]]);
    }

    #[test]
    fn dependents_land_in_later_groups() {
        let platforms = [
            entry("microsoft", 10, &[]),
            entry("linkedin", 20, &[]),
            entry("facebook", 30, &[]),
            entry("google", 5, &["microsoft"]),
        ];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let groups = PlatformScheduler::new(&refs).schedule().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["microsoft", "linkedin", "facebook"]);
        assert_eq!(groups[1], vec!["google"]);

        // Topological property: every platform's group index is strictly
        // greater than each dependency's.
        let group_of = |name: &str| groups.iter().position(|g| g.iter().any(|n| n == name));
        assert!(group_of("google") > group_of("microsoft"));
    }

    #[test]
    fn priority_breaks_ties_deterministically() {
        let platforms = [
            entry("zeta", 1, &[]),
            entry("alpha", 2, &[]),
            entry("mid", 1, &[]),
        ];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let groups = PlatformScheduler::new(&refs).schedule().unwrap();
        // Priority first, then name.
        assert_eq!(groups[0], vec!["mid", "zeta", "alpha"]);

        // Same dependency set always yields the same group list.
        let again = PlatformScheduler::new(&refs).schedule().unwrap();
        assert_eq!(groups, again);
    }

    #[test]
    fn cycle_is_a_config_error() {
        let platforms = [entry("a", 1, &["b"]), entry("b", 1, &["a"])];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let err = PlatformScheduler::new(&refs).schedule().unwrap_err();
        assert_eq!(err.code, "CIRCULAR_DEPENDENCY");
        assert!(err.message.contains('a') && err.message.contains('b'));
    }

    #[test]
    fn can_execute_tracks_completed_dependencies() {
        let platforms = [entry("campaign", 1, &[]), entry("insights", 1, &["campaign"])];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let scheduler = PlatformScheduler::new(&refs);

        let mut completed = HashSet::new();
        assert!(scheduler.can_execute("campaign", &completed));
        assert!(!scheduler.can_execute("insights", &completed));
        completed.insert("campaign".to_string());
        assert!(scheduler.can_execute("insights", &completed));
        // Unknown platforms have no recorded dependencies.
        assert!(scheduler.can_execute("unknown", &completed));
    }

    #[test]
    fn transitive_dependents_cover_chains() {
        let platforms = [
            entry("a", 1, &[]),
            entry("b", 1, &["a"]),
            entry("c", 1, &["b"]),
            entry("d", 1, &[]),
        ];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let scheduler = PlatformScheduler::new(&refs);
        let dependents = scheduler.transitive_dependents("a");
        assert_eq!(dependents, HashSet::from(["b".to_string(), "c".to_string()]));
        assert!(scheduler.transitive_dependents("d").is_empty());
    }

    #[test]
    fn dependencies_on_disabled_platforms_are_ignored_for_grouping() {
        // "google" depends on a platform not in the enabled set.
        let platforms = [entry("google", 1, &["microsoft"])];
        let refs: Vec<&PlatformEntry> = platforms.iter().collect();
        let groups = PlatformScheduler::new(&refs).schedule().unwrap();
        assert_eq!(groups, vec![vec!["google"]]);
    }
}
