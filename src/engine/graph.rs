//! Dependency resolution: module set + selection + OS → execution plan.
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::error::ResolveError;
use crate::module::Module;
use crate::platform::Os;

/// Ordered, cycle-free list of modules to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Modules in execution order; every dependency precedes its dependents.
    pub order: Vec<Module>,
    /// Requested (or pulled-in) modules that do not support the target OS.
    pub skipped_os: Vec<Module>,
    /// `(module, dependency)` edges dropped because the dependency was
    /// skipped for OS incompatibility.
    pub dropped_edges: Vec<(String, String)>,
}

impl ExecutionPlan {
    /// Module names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|m| m.name.as_str()).collect()
    }

    /// Render the plan as one line per module, for dry-run output.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, m) in self.order.iter().enumerate() {
            writeln!(out, "{}. {} ({})", i + 1, m.name, m.version).unwrap_or(());
        }
        for m in &self.skipped_os {
            writeln!(out, "-  {} (not supported on this OS)", m.name).unwrap_or(());
        }
        out
    }
}

/// Resolve `requested` (empty ⇒ all) against `modules` for `os`.
///
/// # Errors
///
/// Returns [`ResolveError`] for an unknown requested module, a dependency
/// on a module that does not exist, or a dependency cycle.
pub fn resolve(
    modules: &[Module],
    requested: &[String],
    os: Os,
) -> Result<ExecutionPlan, ResolveError> {
    let by_name: HashMap<&str, &Module> = modules.iter().map(|m| (m.name.as_str(), m)).collect();

    let roots: Vec<&str> = if requested.is_empty() {
        let mut all: Vec<&str> = by_name.keys().copied().collect();
        all.sort_unstable();
        all
    } else {
        requested.iter().map(String::as_str).collect()
    };
    for name in &roots {
        if !by_name.contains_key(name) {
            return Err(ResolveError::UnknownModule((*name).to_string()));
        }
    }

    let expanded = expand(&by_name, &roots)?;

    let (compatible, skipped): (Vec<&Module>, Vec<&Module>) = expanded
        .iter()
        .filter_map(|name| by_name.get(name.as_str()).copied())
        .partition(|m| os.matches_any(&m.os));
    let compatible_names: HashSet<&str> = compatible.iter().map(|m| m.name.as_str()).collect();

    let mut dropped_edges = Vec::new();
    for m in &compatible {
        for dep in &m.dependencies {
            if !compatible_names.contains(dep.as_str()) {
                dropped_edges.push((m.name.clone(), dep.clone()));
            }
        }
    }

    let order = topo_sort(&compatible, &compatible_names)?;

    let mut skipped_os: Vec<Module> = skipped.into_iter().cloned().collect();
    skipped_os.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ExecutionPlan {
        order: order.into_iter().cloned().collect(),
        skipped_os,
        dropped_edges,
    })
}

/// Breadth-first closure of `roots` over declared dependencies.
fn expand(
    by_name: &HashMap<&str, &Module>,
    roots: &[&str],
) -> Result<BTreeSet<String>, ResolveError> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.iter().copied().collect();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.to_string()) {
            continue;
        }
        let Some(module) = by_name.get(name) else {
            continue;
        };
        for dep in &module.dependencies {
            if !by_name.contains_key(dep.as_str()) {
                return Err(ResolveError::MissingDependency {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            }
            queue.push_back(dep.as_str());
        }
    }
    Ok(seen)
}

/// Level-wise Kahn's algorithm; each frontier is sorted by (priority, name).
fn topo_sort<'a>(
    modules: &[&'a Module],
    included: &HashSet<&str>,
) -> Result<Vec<&'a Module>, ResolveError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&'a Module>> = HashMap::new();

    for &m in modules {
        let deps: BTreeSet<&str> = m
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| included.contains(d))
            .collect();
        in_degree.insert(m.name.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(m);
        }
    }

    let sort_level = |level: &mut Vec<&'a Module>| {
        level.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    };

    let mut frontier: Vec<&'a Module> = modules
        .iter()
        .copied()
        .filter(|m| in_degree.get(m.name.as_str()) == Some(&0))
        .collect();
    let mut result: Vec<&'a Module> = Vec::with_capacity(modules.len());

    while !frontier.is_empty() {
        sort_level(&mut frontier);
        let mut next = Vec::new();
        for m in &frontier {
            if let Some(children) = dependents.get(m.name.as_str()) {
                for child in children {
                    if let Some(count) = in_degree.get_mut(child.name.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*child);
                        }
                    }
                }
            }
        }
        result.append(&mut frontier);
        frontier = next;
    }

    if result.len() != modules.len() {
        let placed: HashSet<&str> = result.iter().map(|m| m.name.as_str()).collect();
        let blocked: Vec<&Module> = modules
            .iter()
            .copied()
            .filter(|m| !placed.contains(m.name.as_str()))
            .collect();
        return Err(ResolveError::Cycle(cycle_path(&blocked)));
    }

    Ok(result)
}

/// Walk the blocked subgraph from its smallest name, always following the
/// smallest blocked dependency, until a name repeats.
fn cycle_path(blocked: &[&Module]) -> String {
    let by_name: HashMap<&str, &Module> = blocked.iter().map(|m| (m.name.as_str(), *m)).collect();
    let Some(start) = by_name.keys().min().copied() else {
        return String::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<&str> = path.split_off(pos);
            cycle.push(current);
            return cycle.join(" -> ");
        }
        path.push(current);

        let next = by_name.get(current).and_then(|m| {
            m.dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| by_name.contains_key(d))
                .min()
        });
        match next {
            Some(n) => current = n,
            None => return path.join(" -> "),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use std::path::Path;

    fn m(name: &str, deps: &[&str]) -> Module {
        Module::new(name, Path::new("/repo/modules")).with_dependencies(deps)
    }

    fn names(plan: &ExecutionPlan) -> Vec<&str> {
        plan.names()
    }

    fn all() -> Vec<String> {
        Vec::new()
    }

    fn req(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn assert_topological(plan: &ExecutionPlan) {
        let pos: HashMap<&str, usize> = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.as_str(), i))
            .collect();
        for module in &plan.order {
            for dep in &module.dependencies {
                if let Some(&d) = pos.get(dep.as_str()) {
                    assert!(
                        d < pos[module.name.as_str()],
                        "{dep} must precede {}",
                        module.name
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // ordering
    // -----------------------------------------------------------------------

    #[test]
    fn requesting_leaf_pulls_in_chain() {
        let modules = vec![m("C", &["B"]), m("A", &[]), m("B", &["A"])];
        let plan = resolve(&modules, &req(&["C"]), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["A", "B", "C"]);
    }

    #[test]
    fn equal_priority_orders_by_name_regardless_of_declaration() {
        let forward = vec![m("X", &[]).with_priority(10), m("Y", &[]).with_priority(10)];
        let backward = vec![m("Y", &[]).with_priority(10), m("X", &[]).with_priority(10)];
        assert_eq!(names(&resolve(&forward, &all(), Os::Linux).unwrap()), vec!["X", "Y"]);
        assert_eq!(names(&resolve(&backward, &all(), Os::Linux).unwrap()), vec!["X", "Y"]);
    }

    #[test]
    fn priority_wins_over_name_within_a_level() {
        let modules = vec![m("a", &[]).with_priority(90), m("z", &[]).with_priority(5)];
        let plan = resolve(&modules, &all(), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["z", "a"]);
    }

    #[test]
    fn priority_never_overrides_dependencies() {
        let modules = vec![
            m("base", &[]).with_priority(99),
            m("app", &["base"]).with_priority(1),
        ];
        let plan = resolve(&modules, &all(), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["base", "app"]);
    }

    #[test]
    fn diamond_is_topological_and_deduplicated() {
        let modules = vec![
            m("top", &["left", "right"]),
            m("left", &["root"]),
            m("right", &["root"]),
            m("root", &[]),
        ];
        let plan = resolve(&modules, &req(&["top"]), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["root", "left", "right", "top"]);
        assert_topological(&plan);
    }

    #[test]
    fn larger_graph_is_topological() {
        let modules = vec![
            m("a", &[]),
            m("b", &["a"]),
            m("c", &["a", "b"]),
            m("d", &["c"]),
            m("e", &["b", "d"]).with_priority(1),
            m("f", &[]).with_priority(100),
            m("g", &["f", "a"]),
        ];
        let plan = resolve(&modules, &all(), Os::Linux).unwrap();
        assert_eq!(plan.order.len(), modules.len());
        assert_topological(&plan);
    }

    #[test]
    fn unrequested_modules_are_left_out() {
        let modules = vec![m("a", &[]), m("b", &[]), m("c", &["a"])];
        let plan = resolve(&modules, &req(&["c"]), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["a", "c"]);
    }

    // -----------------------------------------------------------------------
    // errors
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_requested_module() {
        let err = resolve(&[m("a", &[])], &req(&["nope"]), Os::Linux).unwrap_err();
        assert_eq!(err, ResolveError::UnknownModule("nope".to_string()));
    }

    #[test]
    fn missing_dependency_names_both_modules() {
        let err = resolve(&[m("app", &["ghost"])], &all(), Os::Linux).unwrap_err();
        let msg = err.to_string();
        assert_eq!(msg, "module app depends on ghost, which does not exist");
    }

    #[test]
    fn two_node_cycle_reports_path() {
        let modules = vec![m("A", &["B"]), m("B", &["A"])];
        let err = resolve(&modules, &all(), Os::Linux).unwrap_err();
        assert_eq!(err, ResolveError::Cycle("A -> B -> A".to_string()));
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn cycle_path_skips_acyclic_prefix() {
        // "a" is blocked only because it depends on the b/c cycle.
        let modules = vec![m("a", &["b"]), m("b", &["c"]), m("c", &["b"]), m("ok", &[])];
        let err = resolve(&modules, &all(), Os::Linux).unwrap_err();
        assert_eq!(err, ResolveError::Cycle("b -> c -> b".to_string()));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = resolve(&[m("loop", &["loop"])], &all(), Os::Linux).unwrap_err();
        assert_eq!(err, ResolveError::Cycle("loop -> loop".to_string()));
    }

    #[test]
    fn cycle_path_alternates_through_real_edges() {
        let modules = vec![m("p", &["q"]), m("q", &["r"]), m("r", &["p"])];
        let ResolveError::Cycle(path) = resolve(&modules, &all(), Os::Linux).unwrap_err() else {
            panic!("expected cycle");
        };
        let hops: Vec<&str> = path.split(" -> ").collect();
        assert_eq!(hops.first(), hops.last());
        for pair in hops.windows(2) {
            let from = modules.iter().find(|x| x.name == pair[0]).unwrap();
            assert!(from.dependencies.iter().any(|d| d == pair[1]), "{path}");
        }
    }

    // -----------------------------------------------------------------------
    // OS filtering
    // -----------------------------------------------------------------------

    #[test]
    fn os_incompatible_modules_are_skipped_and_edges_dropped() {
        let modules = vec![
            m("brew", &[]).with_os(&["macos"]),
            m("tools", &["brew"]),
            m("apt", &[]).with_os(&["linux"]),
        ];
        let plan = resolve(&modules, &all(), Os::Linux).unwrap();
        assert_eq!(names(&plan), vec!["apt", "tools"]);
        assert_eq!(plan.skipped_os.len(), 1);
        assert_eq!(plan.skipped_os[0].name, "brew");
        assert_eq!(
            plan.dropped_edges,
            vec![("tools".to_string(), "brew".to_string())]
        );
    }

    #[test]
    fn os_aliases_match() {
        let modules = vec![m("mac", &[]).with_os(&["darwin"])];
        let plan = resolve(&modules, &all(), Os::MacOs).unwrap();
        assert_eq!(names(&plan), vec!["mac"]);
    }

    #[test]
    fn render_lists_order_and_skips() {
        let modules = vec![
            m("git", &[]),
            m("zsh", &["git"]),
            m("brew", &[]).with_os(&["macos"]),
        ];
        let plan = resolve(&modules, &all(), Os::Linux).unwrap();
        insta::assert_snapshot!(plan.render(), @r"
        1. git (0.0.0)
        2. zsh (0.0.0)
        -  brew (not supported on this OS)
        ");
    }
}
