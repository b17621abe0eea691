//! Side-effect free exports of a built process graph, for documentation.

use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use petgraph::{
    dot::Dot,
    stable_graph::{NodeIndex, StableGraph},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    process::Process,
    router::{RouteSource, Subscription},
    step::StepDefinition,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GraphNode {
    Input,
    Step(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GraphEdge {
    event: String,
    function: Option<String>,
}

/// The steps of a process as nodes, its subscriptions as edges.
#[derive(Debug, Clone)]
pub(crate) struct ProcessGraph {
    graph: StableGraph<GraphNode, GraphEdge>,
}

impl ProcessGraph {
    pub(crate) fn new(steps: &[StepDefinition], subscriptions: &[Subscription]) -> Self {
        let mut graph = StableGraph::new();
        let input = graph.add_node(GraphNode::Input);
        let nodes = steps
            .iter()
            .map(|step| {
                let id = step.id().to_owned();
                (id.clone(), graph.add_node(GraphNode::Step(id)))
            })
            .collect::<HashMap<String, NodeIndex>>();

        for subscription in subscriptions {
            let from = match &subscription.origin {
                RouteSource::Input => Some(input),
                RouteSource::Step(id) => nodes.get(id).copied(),
            };
            let to = nodes.get(&subscription.target.step).copied();
            if let (Some(from), Some(to)) = (from, to) {
                graph.add_edge(
                    from,
                    to,
                    GraphEdge {
                        event: subscription.event.clone(),
                        function: subscription.target.function.clone(),
                    },
                );
            }
        }

        Self { graph }
    }

    fn to_dot(&self) -> String {
        Dot::new(&self.graph).to_string()
    }

    fn to_mermaid(&self) -> String {
        Mermaid(&self.graph).to_string()
    }
}

/// Mermaid `flowchart LR` rendering of a process graph.
struct Mermaid<'a>(&'a StableGraph<GraphNode, GraphEdge>);

impl Mermaid<'_> {
    fn node_id(&self, index: NodeIndex) -> String {
        match &self.0[index] {
            GraphNode::Input => "input".to_owned(),
            GraphNode::Step(_) => format!("step{}", index.index()),
        }
    }
}

impl Display for Mermaid<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let graph = self.0;
        writeln!(f, "flowchart LR")?;
        for index in graph.node_indices() {
            match &graph[index] {
                GraphNode::Input => writeln!(f, "    input((Input))")?,
                GraphNode::Step(id) => {
                    writeln!(f, "    {}[\"{}\"]", self.node_id(index), escape_mermaid(id))?
                }
            }
        }
        for edge in graph.edge_indices() {
            if let Some((source, target)) = graph.edge_endpoints(edge) {
                writeln!(
                    f,
                    "    {} -->|\"{}\"| {}",
                    self.node_id(source),
                    escape_mermaid(&graph[edge].to_string()),
                    self.node_id(target)
                )?;
            }
        }
        Ok(())
    }
}

fn escape_mermaid(text: &str) -> String {
    text.replace('"', "#quot;")
}

impl Display for GraphNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNode::Input => write!(f, "Input"),
            GraphNode::Step(id) => write!(f, "{id}"),
        }
    }
}

impl Display for GraphEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{} → {function}", self.event),
            None => write!(f, "{}", self.event),
        }
    }
}

/// Serializable overview of a process: steps, their functions and routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescription {
    /// Name of the process
    pub name: String,
    /// Description from the process config
    pub description: Option<String>,
    /// Fingerprint of the process definition
    pub fingerprint: u64,
    /// Steps in declaration order
    pub steps: Vec<StepDescription>,
    /// Routing edges in registration order
    pub routes: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescription {
    /// Id of the step
    pub id: String,
    /// Whether the step declares per-run state
    pub stateful: bool,
    /// Functions the step exposes
    pub functions: Vec<FunctionDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescription {
    /// Name of the function
    pub name: String,
    /// Name of the input type, `Value` for raw JSON functions
    pub input_type: String,
    /// JSON Schema of the input, for typed functions
    pub input_schema: Option<Value>,
}

impl Process {
    /// Graphviz DOT rendering of the process graph.
    pub fn to_dot(&self) -> String {
        self.graph().to_dot()
    }

    /// Mermaid flowchart rendering of the process graph.
    pub fn to_mermaid(&self) -> String {
        self.graph().to_mermaid()
    }

    pub fn describe(&self) -> ProcessDescription {
        ProcessDescription {
            name: self.name().to_owned(),
            description: self.config().description.clone(),
            fingerprint: self.fingerprint(),
            steps: self
                .steps()
                .iter()
                .map(|step| StepDescription {
                    id: step.id().to_owned(),
                    stateful: step.initial_state().is_some(),
                    functions: step
                        .functions()
                        .iter()
                        .map(|function| FunctionDescription {
                            name: function.name().to_owned(),
                            input_type: function.input_type().to_owned(),
                            input_schema: function.input_schema().cloned(),
                        })
                        .collect(),
                })
                .collect(),
            routes: self.router().subscriptions().to_vec(),
        }
    }
}
