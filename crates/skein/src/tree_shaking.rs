//! Declaration-level tree shaking.
//!
//! Reachability over the graph's reference edges, rooted at the entry
//! invocation. Whatever the walk does not reach is dropped — including
//! declarations whose only referrer was a macro that expansion already
//! detached from the tree.

use log::debug;
use petgraph::{graph::NodeIndex, visit::Dfs};
use rustc_hash::FxHashSet;

use crate::{declaration::CanonicalName, source_graph::SourceGraph};

#[derive(Debug)]
pub struct TreeShaker {
    reachable: FxHashSet<NodeIndex>,
    dropped: Vec<CanonicalName>,
}

impl TreeShaker {
    /// Compute the surviving set for a fully expanded graph.
    pub fn analyze(graph: &SourceGraph) -> Self {
        let mut reachable = FxHashSet::default();
        let mut dfs = Dfs::new(&graph.graph, graph.root);
        while let Some(nx) = dfs.next(&graph.graph) {
            reachable.insert(nx);
        }

        let mut dropped = Vec::new();
        for nx in graph.graph.node_indices() {
            if !reachable.contains(&nx) {
                dropped.push(graph.graph[nx].canonical());
            }
        }

        debug!(
            "tree shaking kept {} of {} declarations",
            reachable.len(),
            graph.graph.node_count()
        );
        for name in &dropped {
            debug!("dropped unreachable declaration {name}");
        }

        Self { reachable, dropped }
    }

    pub fn is_reachable(&self, node: NodeIndex) -> bool {
        self.reachable.contains(&node)
    }

    pub fn survivors(&self) -> &FxHashSet<NodeIndex> {
        &self.reachable
    }

    pub fn dropped(&self) -> &[CanonicalName] {
        &self.dropped
    }

    /// Surviving emittable declarations, for reporting.
    pub fn surviving_count(&self, graph: &SourceGraph) -> usize {
        self.reachable
            .iter()
            .filter(|&&nx| graph.graph[nx].declaration.is_emittable())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, module_registry::ModuleRegistry};

    fn shaken(files: &[(&str, &str)], entry: &str) -> (SourceGraph, TreeShaker) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, source) in files {
            std::fs::write(dir.path().join(name), source).expect("write");
        }
        let entry_uri = dir
            .path()
            .join(entry)
            .to_str()
            .expect("utf-8 path")
            .to_string();
        let registry = ModuleRegistry::new(Config {
            cache_dir: dir.path().join(".cache"),
            ..Config::default()
        })
        .expect("registry");
        let graph = SourceGraph::load(&entry_uri, registry).expect("graph");
        let shaker = TreeShaker::analyze(&graph);
        (graph, shaker)
    }

    #[test]
    fn unreferenced_declarations_are_not_in_the_graph_at_all() {
        let (graph, shaker) = shaken(
            &[
                (
                    "entry.ts",
                    "import { used } from \"./utils.ts\";\nexport default function () { return used(); }",
                ),
                (
                    "utils.ts",
                    "export function used() { return 1; }\nexport function unused() { return 2; }",
                ),
            ],
            "entry.ts",
        );
        // The demand-driven walk never loads `unused`; everything loaded
        // is reachable.
        assert_eq!(shaker.dropped().len(), 0);
        assert!(graph
            .graph
            .node_indices()
            .all(|nx| shaker.is_reachable(nx)));
    }

    #[test]
    fn circular_references_survive_together() {
        let (graph, shaker) = shaken(
            &[(
                "entry.ts",
                r#"
function ping(n: number): number { return n === 0 ? 0 : pong(n - 1); }
function pong(n: number): number { return n === 0 ? 1 : ping(n - 1); }
export default function () { return ping(9); }
"#,
            )],
            "entry.ts",
        );
        let ping = graph
            .graph
            .node_indices()
            .find(|&nx| graph.graph[nx].name == "ping")
            .expect("ping");
        let pong = graph
            .graph
            .node_indices()
            .find(|&nx| graph.graph[nx].name == "pong")
            .expect("pong");
        assert!(shaker.is_reachable(ping));
        assert!(shaker.is_reachable(pong));
    }
}
