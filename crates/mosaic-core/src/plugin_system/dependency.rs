use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::plugin_system::manifest::PluginManifest;

/// A node of the dependency graph. Edges are name lists, never pointers.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    /// Plugins this one requires (outgoing edges).
    pub dependencies: Vec<String>,
    /// Plugins that require this one (incoming edges).
    pub dependents: Vec<String>,
    pub load_order: u32,
    pub critical: bool,
}

/// A plugin excluded from the load order and the dependency that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedDependency {
    pub plugin: String,
    pub dependency: String,
}

/// The computed load plan: surviving plugins in batches, plus everything
/// that was excluded and why.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    /// Linear topological order (batches flattened).
    pub order: Vec<String>,
    /// Level batches; no batch contains two plugins with an edge between
    /// them.
    pub batches: Vec<Vec<String>>,
    /// Excluded: dependency missing, or dependent of an excluded plugin.
    pub unsatisfied: Vec<UnsatisfiedDependency>,
    /// Excluded: members of each dependency cycle, reported per cycle.
    pub cycles: Vec<Vec<String>>,
}

impl LoadPlan {
    /// Every plugin excluded from the order, with duplicates removed.
    pub fn excluded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .unsatisfied
            .iter()
            .map(|u| u.plugin.clone())
            .chain(self.cycles.iter().flatten().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Dependency graph over a set of discovered manifests.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
}

impl DependencyGraph {
    /// Build the graph: one node per plugin, an edge `a -> b` whenever `a`
    /// declares `b` as a dependency.
    pub fn build<'a, I>(manifests: I) -> Self
    where
        I: IntoIterator<Item = &'a PluginManifest>,
    {
        let mut nodes: HashMap<String, GraphNode> = HashMap::new();
        let mut edges: Vec<(String, String)> = Vec::new();

        for manifest in manifests {
            edges.extend(
                manifest
                    .dependencies
                    .iter()
                    .map(|dep| (manifest.name.clone(), dep.clone())),
            );
            nodes.insert(
                manifest.name.clone(),
                GraphNode {
                    name: manifest.name.clone(),
                    dependencies: manifest.dependencies.clone(),
                    dependents: Vec::new(),
                    load_order: manifest.load_order,
                    critical: manifest.critical,
                },
            );
        }
        for (from, to) in edges {
            if let Some(node) = nodes.get_mut(&to) {
                node.dependents.push(from);
            }
        }
        Self { nodes }
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The transitive downstream closure of `seeds`: every plugin that
    /// depends, directly or not, on one of them. Seeds are not included.
    pub fn dependents_closure<'a, I>(&self, seeds: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut closure = HashSet::new();
        let mut queue: VecDeque<&str> = seeds.into_iter().collect();
        let seeds_set: HashSet<&str> = queue.iter().copied().collect();

        while let Some(name) = queue.pop_front() {
            if let Some(node) = self.nodes.get(name) {
                for dependent in &node.dependents {
                    if !seeds_set.contains(dependent.as_str())
                        && closure.insert(dependent.clone())
                    {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        closure
    }

    /// Compute the load plan: exclude unsatisfied plugins and cycles, then
    /// emit the topological order and its level batches.
    pub fn plan(&self) -> LoadPlan {
        let mut plan = LoadPlan::default();

        // 1. Unsatisfied dependencies, cascaded to dependents.
        let mut excluded: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<UnsatisfiedDependency> = VecDeque::new();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    queue.push_back(UnsatisfiedDependency {
                        plugin: node.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        while let Some(unsatisfied) = queue.pop_front() {
            if !excluded.insert(unsatisfied.plugin.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&unsatisfied.plugin) {
                for dependent in &node.dependents {
                    queue.push_back(UnsatisfiedDependency {
                        plugin: dependent.clone(),
                        dependency: unsatisfied.plugin.clone(),
                    });
                }
            }
            plan.unsatisfied.push(unsatisfied);
        }

        // 2. Cycles among the survivors.
        let survivors: Vec<&GraphNode> = {
            let mut s: Vec<&GraphNode> = self
                .nodes
                .values()
                .filter(|n| !excluded.contains(&n.name))
                .collect();
            // Deterministic traversal order.
            s.sort_by(|a, b| a.name.cmp(&b.name));
            s
        };
        let cycles = find_cycles(&survivors);
        for cycle in &cycles {
            for member in cycle {
                excluded.insert(member.clone());
            }
        }
        plan.cycles = cycles;

        // Dependents of cycle members cannot load either.
        let cycle_members: Vec<String> = plan.cycles.iter().flatten().cloned().collect();
        let mut cascade: VecDeque<String> = cycle_members.iter().cloned().collect();
        while let Some(name) = cascade.pop_front() {
            if let Some(node) = self.nodes.get(&name) {
                for dependent in &node.dependents {
                    if excluded.insert(dependent.clone()) {
                        plan.unsatisfied.push(UnsatisfiedDependency {
                            plugin: dependent.clone(),
                            dependency: name.clone(),
                        });
                        cascade.push_back(dependent.clone());
                    }
                }
            }
        }

        // 3 + 4. Level batches over the remaining nodes; ties within a
        // level break by ascending load_order, then name.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for node in self.nodes.values() {
            if excluded.contains(&node.name) {
                continue;
            }
            let degree = node
                .dependencies
                .iter()
                .filter(|d| self.nodes.contains_key(*d) && !excluded.contains(*d))
                .count();
            in_degree.insert(node.name.as_str(), degree);
        }

        let mut remaining: HashSet<&str> = in_degree.keys().copied().collect();
        while !remaining.is_empty() {
            let mut level: Vec<&GraphNode> = remaining
                .iter()
                .filter(|name| in_degree.get(**name).copied() == Some(0))
                .filter_map(|name| self.nodes.get(*name))
                .collect();
            if level.is_empty() {
                // Cannot happen once cycles are excluded; guard anyway.
                debug!("load plan stalled with {} nodes remaining", remaining.len());
                break;
            }
            level.sort_by(|a, b| {
                a.load_order
                    .cmp(&b.load_order)
                    .then_with(|| a.name.cmp(&b.name))
            });

            let batch: Vec<String> = level.iter().map(|n| n.name.clone()).collect();
            for node in &level {
                remaining.remove(node.name.as_str());
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                    }
                }
            }
            plan.order.extend(batch.iter().cloned());
            plan.batches.push(batch);
        }

        plan
    }
}

/// Strongly connected components with more than one member, or single nodes
/// with a self-edge, found by an iterative depth-first search (Tarjan).
fn find_cycles(nodes: &[&GraphNode]) -> Vec<Vec<String>> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();
    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|n| {
            n.dependencies
                .iter()
                .filter_map(|d| index_of.get(d.as_str()).copied())
                .collect()
        })
        .collect();

    let n = nodes.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![usize::MAX; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut cycles = Vec::new();

    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        // (node, next child offset)
        let mut call_stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, child)) = call_stack.last() {
            if child == 0 && index[v] == usize::MAX {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if child < adjacency[v].len() {
                call_stack.last_mut().expect("frame present").1 += 1;
                let w = adjacency[v][child];
                if index[w] == usize::MAX {
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(nodes[w].name.clone());
                        if w == v {
                            break;
                        }
                    }
                    let self_loop = component.len() == 1
                        && adjacency[v].contains(&v);
                    if component.len() > 1 || self_loop {
                        component.sort();
                        cycles.push(component);
                    }
                }
            }
        }
    }
    cycles.sort();
    cycles
}
