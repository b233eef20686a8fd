use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tracing::debug;

use pagecraft_core::error::ConfigError;

use super::edge::{Edge, EdgeCondition, Target};
use super::node::Node;
use crate::router::Router;

const DEFAULT_MAX_LOOPS: u32 = 3;
const DEFAULT_MAX_TRANSITIONS: u32 = 64;

/// A validated pipeline graph. Only [`GraphBuilder::build`] creates one.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    router: Router,
    entry: String,
    max_loops: u32,
    timeout: Option<Duration>,
    max_transitions: u32,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_transitions(&self) -> u32 {
        self.max_transitions
    }
}

/// Collects nodes and edges and validates them into a [`Graph`].
///
/// Every configuration problem is reported here, before any step runs.
pub struct GraphBuilder {
    entry: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    max_loops: u32,
    timeout: Option<Duration>,
    max_transitions: u32,
}

impl GraphBuilder {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            max_loops: DEFAULT_MAX_LOOPS,
            timeout: None,
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = max_loops;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_transitions(mut self, max_transitions: u32) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    pub fn build(self) -> Result<Graph, ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut index = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), i).is_some() {
                return Err(ConfigError::DuplicateNode(node.name().to_string()));
            }
        }
        let lookup = |name: &str| index.get(name).map(|&i| &self.nodes[i]);

        if lookup(&self.entry).is_none() {
            return Err(ConfigError::UnknownNode {
                node: self.entry.clone(),
                referenced_by: "entry".into(),
            });
        }
        for edge in &self.edges {
            let label = || format!("edge {} -> {}", edge.from, edge.to);
            if lookup(&edge.from).is_none() {
                return Err(ConfigError::UnknownNode {
                    node: edge.from.clone(),
                    referenced_by: label(),
                });
            }
            if let Target::Node(to) = &edge.to {
                if lookup(to).is_none() {
                    return Err(ConfigError::UnknownNode {
                        node: to.clone(),
                        referenced_by: label(),
                    });
                }
            }
        }

        for node in &self.nodes {
            node.retry()
                .validate()
                .map_err(|reason| ConfigError::InvalidRetry {
                    node: node.name().to_string(),
                    reason,
                })?;
        }

        let members = self.check_groups(&lookup)?;
        self.check_gates(&lookup, &members)?;
        let writers = self.check_writes()?;
        self.check_reads(&writers)?;
        self.check_routing(&members)?;
        self.check_acyclic()?;
        self.check_reachable(&lookup)?;

        debug!(
            entry = %self.entry,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "Graph validated"
        );

        Ok(Graph {
            router: Router::new(self.edges.iter().cloned()),
            nodes: self.nodes,
            index,
            edges: self.edges,
            entry: self.entry,
            max_loops: self.max_loops,
            timeout: self.timeout,
            max_transitions: self.max_transitions,
        })
    }

    /// Returns member name -> owning group.
    fn check_groups<'a>(
        &'a self,
        lookup: &impl Fn(&str) -> Option<&'a Node>,
    ) -> Result<HashMap<&'a str, &'a str>, ConfigError> {
        let mut members: HashMap<&str, &str> = HashMap::new();
        for group in self.nodes.iter().filter(|n| n.is_parallel()) {
            let invalid = |reason: String| ConfigError::InvalidGroup {
                group: group.name().to_string(),
                reason,
            };
            if group.members().is_empty() {
                return Err(invalid("has no members".into()));
            }
            for member in group.members() {
                let node = lookup(member).ok_or_else(|| ConfigError::UnknownNode {
                    node: member.clone(),
                    referenced_by: group.name().to_string(),
                })?;
                if node.is_gate() || node.is_parallel() {
                    return Err(invalid(format!(
                        "member '{}' is a {}; only steps may be grouped",
                        member,
                        node.kind_label()
                    )));
                }
                if let Some(other) = members.insert(member, group.name()) {
                    return Err(invalid(format!(
                        "member '{}' already belongs to '{}'",
                        member, other
                    )));
                }
                if *member == self.entry {
                    return Err(invalid(format!("member '{}' is the entry node", member)));
                }
            }
        }

        for edge in &self.edges {
            let routed = std::iter::once(edge.from.as_str()).chain(edge.to.node());
            for name in routed {
                if let Some(group) = members.get(name) {
                    return Err(ConfigError::InvalidGroup {
                        group: group.to_string(),
                        reason: format!(
                            "member '{}' is routed by edge {} -> {}",
                            name, edge.from, edge.to
                        ),
                    });
                }
            }
        }
        Ok(members)
    }

    fn check_gates<'a>(
        &'a self,
        lookup: &impl Fn(&str) -> Option<&'a Node>,
        members: &HashMap<&str, &str>,
    ) -> Result<(), ConfigError> {
        for gate in &self.nodes {
            let Some(entry) = gate.retry_entry() else {
                continue;
            };
            let invalid = |reason: String| ConfigError::InvalidGate {
                gate: gate.name().to_string(),
                reason,
            };
            if lookup(entry).is_none() {
                return Err(invalid(format!("retry entry '{}' is not a node", entry)));
            }
            if entry == gate.name() {
                return Err(invalid("retry entry is the gate itself".into()));
            }
            if let Some(group) = members.get(entry) {
                return Err(invalid(format!(
                    "retry entry '{}' is a member of parallel group '{}'",
                    entry, group
                )));
            }
        }
        Ok(())
    }

    /// Single-writer rule. Returns key -> writing node.
    fn check_writes(&self) -> Result<HashMap<&str, &str>, ConfigError> {
        let mut writers: HashMap<&str, &str> = HashMap::new();
        for node in self.nodes.iter().filter(|n| !n.is_parallel()) {
            for key in node.writes() {
                if let Some(first) = writers.insert(key, node.name()) {
                    return Err(ConfigError::OverlappingWrites {
                        key: key.clone(),
                        first: first.to_string(),
                        second: node.name().to_string(),
                    });
                }
            }
        }
        Ok(writers)
    }

    fn check_reads(&self, writers: &HashMap<&str, &str>) -> Result<(), ConfigError> {
        for node in &self.nodes {
            if let Some(key) = node.reads().iter().find(|k| !writers.contains_key(k.as_str())) {
                return Err(ConfigError::DanglingRead {
                    node: node.name().to_string(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_routing(&self, members: &HashMap<&str, &str>) -> Result<(), ConfigError> {
        for node in &self.nodes {
            let outgoing: Vec<&Edge> = self.edges.iter().filter(|e| e.from == node.name()).collect();
            if node.is_gate() {
                if let Some(edge) = outgoing
                    .iter()
                    .find(|e| e.condition != EdgeCondition::OnFailure)
                {
                    return Err(ConfigError::InvalidEdge {
                        from: edge.from.clone(),
                        to: edge.to.to_string(),
                        reason: "a gate routes success and reject itself; only on_failure edges are allowed".into(),
                    });
                }
                continue;
            }
            if members.contains_key(node.name()) {
                continue;
            }
            if !outgoing.iter().any(|e| e.condition.covers_success()) {
                return Err(ConfigError::UnroutedSignal {
                    node: node.name().to_string(),
                    signal: "success".into(),
                });
            }
        }
        Ok(())
    }

    /// Declared edges must form a DAG; the only cycles allowed are gate
    /// back-edges, which are not declared edges.
    fn check_acyclic(&self) -> Result<(), ConfigError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut succ: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            if let Some(to) = edge.to.node() {
                succ.entry(edge.from.as_str()).or_default().push(to);
            }
        }

        let mut marks: HashMap<&str, Mark> =
            self.nodes.iter().map(|n| (n.name(), Mark::New)).collect();

        fn visit<'a>(
            node: &'a str,
            succ: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::Active);
            path.push(node);
            for &next in succ.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                match marks.get(next).copied().unwrap_or(Mark::New) {
                    Mark::Active => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(next, succ, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        for node in &self.nodes {
            if marks.get(node.name()) == Some(&Mark::New) {
                let mut path = Vec::new();
                if let Some(cycle) = visit(node.name(), &succ, &mut marks, &mut path) {
                    return Err(ConfigError::UnboundedCycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn check_reachable<'a>(
        &'a self,
        lookup: &impl Fn(&str) -> Option<&'a Node>,
    ) -> Result<(), ConfigError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([self.entry.as_str()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            let Some(node) = lookup(name) else {
                continue;
            };
            queue.extend(node.members().iter().map(String::as_str));
            queue.extend(node.retry_entry());
            queue.extend(
                self.edges
                    .iter()
                    .filter(|e| e.from == name)
                    .filter_map(|e| e.to.node()),
            );
        }
        match self.nodes.iter().find(|n| !seen.contains(n.name())) {
            Some(node) => Err(ConfigError::Unreachable(node.name().to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use pagecraft_core::types::Delta;
    use pagecraft_test_utils::{ScriptedGate, ScriptedStep};

    fn step(name: &str, writes: &[&str]) -> Node {
        Node::step(name, ScriptedStep::succeed(Delta::new())).with_writes(writes.iter().copied())
    }

    fn linear() -> GraphBuilder {
        GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .node(step("b", &["y"]).with_reads(["x"]))
            .edge(Edge::on_success("a", "b"))
            .edge(Edge::on_success("b", Target::Complete))
    }

    #[test]
    fn builds_a_linear_graph() {
        let graph = linear().max_loops(2).build().unwrap();
        assert_eq!(graph.entry(), "a");
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.max_loops(), 2);
        assert!(graph.node("b").is_some());
        assert_eq!(graph.router().outgoing("a").len(), 1);
    }

    #[test]
    fn rejects_empty_and_duplicates() {
        assert_eq!(GraphBuilder::new("a").build().unwrap_err(), ConfigError::Empty);
        let err = linear().node(step("a", &[])).build().unwrap_err();
        assert_eq!(err, ConfigError::DuplicateNode("a".into()));
    }

    #[test]
    fn rejects_unknown_entry_and_edge_targets() {
        let err = GraphBuilder::new("missing")
            .node(step("a", &[]))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { ref node, .. } if node == "missing"));

        let err = linear().edge(Edge::on_failure("a", "ghost")).build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNode { ref node, .. } if node == "ghost"));
    }

    #[test]
    fn rejects_overlapping_writes() {
        let err = GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .node(step("b", &["x"]))
            .edge(Edge::on_success("a", "b"))
            .edge(Edge::on_success("b", Target::Complete))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::OverlappingWrites {
                key: "x".into(),
                first: "a".into(),
                second: "b".into(),
            }
        );
    }

    #[test]
    fn rejects_dangling_reads() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]).with_reads(["nobody_writes_this"]))
            .edge(Edge::on_success("a", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DanglingRead { ref key, .. } if key == "nobody_writes_this"));
    }

    #[test]
    fn rejects_unrouted_success() {
        let err = GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .node(step("b", &[]))
            .edge(Edge::on_success("a", "b"))
            .edge(Edge::on_failure("b", Target::Abort))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnroutedSignal {
                node: "b".into(),
                signal: "success".into(),
            }
        );
    }

    #[test]
    fn conditional_edges_alone_do_not_cover_success() {
        let err = GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .edge(Edge::conditional("a", Target::Complete, "x exists"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnroutedSignal { .. }));
    }

    #[test]
    fn rejects_unbounded_cycles() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(step("b", &[]))
            .edge(Edge::on_success("a", "b"))
            .edge(Edge::on_success("b", "a"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnboundedCycle(vec!["a".into(), "b".into(), "a".into()])
        );
        assert_eq!(err.to_string(), "Unbounded cycle through: a -> b -> a");
    }

    #[test]
    fn gate_back_edge_is_not_a_cycle() {
        let graph = GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .node(Node::gate("gate", ScriptedGate::accept(), "a").with_reads(["x"]))
            .edge(Edge::on_success("a", "gate"))
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn gate_may_only_declare_failure_edges() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(Node::gate("gate", ScriptedGate::accept(), "a"))
            .edge(Edge::on_success("a", "gate"))
            .edge(Edge::on_success("gate", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEdge { .. }));
    }

    #[test]
    fn rejects_bad_gate_retry_entry() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(Node::gate("gate", ScriptedGate::accept(), "nowhere"))
            .edge(Edge::on_success("a", "gate"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGate { .. }));
    }

    #[test]
    fn rejects_invalid_groups() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(Node::parallel("pages", Vec::<String>::new()))
            .edge(Edge::on_success("a", "pages"))
            .edge(Edge::on_success("pages", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGroup { .. }));

        // Routed member.
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(step("m", &[]))
            .node(Node::parallel("pages", ["m"]))
            .edge(Edge::on_success("a", "pages"))
            .edge(Edge::on_success("pages", Target::Complete))
            .edge(Edge::on_success("m", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGroup { .. }));

        // Gate as member.
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(Node::gate("g", ScriptedGate::accept(), "a"))
            .node(Node::parallel("pages", ["g"]))
            .edge(Edge::on_success("a", "pages"))
            .edge(Edge::on_success("pages", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGroup { .. }));
    }

    #[test]
    fn rejects_overlapping_member_writes() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]))
            .node(step("m1", &["page"]))
            .node(step("m2", &["page"]))
            .node(Node::parallel("pages", ["m1", "m2"]))
            .edge(Edge::on_success("a", "pages"))
            .edge(Edge::on_success("pages", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingWrites { ref key, .. } if key == "page"));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let err = linear().node(step("island", &[])).build();
        // island has no success route either; routing is checked first.
        assert!(err.is_err());

        let err = linear()
            .node(step("island", &[]))
            .edge(Edge::on_success("island", Target::Complete))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::Unreachable("island".into()));
    }

    #[test]
    fn rejects_invalid_retry_policy() {
        let err = GraphBuilder::new("a")
            .node(step("a", &[]).with_retry(RetryPolicy::new(0)))
            .edge(Edge::on_success("a", Target::Complete))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRetry { .. }));
    }

    #[test]
    fn group_members_are_reachable_through_the_group() {
        let graph = GraphBuilder::new("a")
            .node(step("a", &["x"]))
            .node(step("m1", &["p1"]).with_reads(["x"]))
            .node(step("m2", &["p2"]).with_reads(["x"]))
            .node(Node::parallel("pages", ["m1", "m2"]))
            .edge(Edge::on_success("a", "pages"))
            .edge(Edge::on_success("pages", Target::Complete))
            .build()
            .unwrap();
        assert_eq!(graph.node("pages").unwrap().members().len(), 2);
    }
}
