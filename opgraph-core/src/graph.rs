use std::{
    collections::BTreeMap,
    env,
    fmt::Display,
    fs,
    path::Path,
    process::Command,
    sync::{Arc, RwLock, RwLockReadGuard},
};

use crate::{op::Op, shape::TensorDescriptor, DType, Error, Result};

use petgraph::Graph as PetGraph;
use petgraph::{
    dot::{Config, Dot},
    graph::NodeIndex,
};

/// Index of a node in its graph's arena. Ids follow creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(usize);

impl NodeId {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// An operator together with the descriptor of the value it produces.
#[derive(Debug, Clone)]
pub struct GraphNode<T: DType> {
    pub id: NodeId,
    pub op: Op<T>,
    pub desc: TensorDescriptor,
}

impl<T: DType> GraphNode<T> {
    /// Stable name derived from the kind and id, e.g. `add_3`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.op.name(), self.id.0)
    }
}

/// An append-only arena of operator nodes.
///
/// Edges only point to nodes that already exist, so the graph is acyclic by
/// construction. Cloning yields another handle to the same graph; concurrent
/// construction must be serialized by the caller, since creation order
/// defines node ids.
#[derive(Clone)]
pub struct Graph<T: DType> {
    data: Arc<RwLock<Vec<GraphNode<T>>>>,
}

impl<T: DType> Graph<T> {
    /// Create an empty Graph
    pub fn empty() -> Self {
        Self {
            data: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Read-only access to the list of nodes
    pub fn get_nodes(&self) -> Result<RwLockReadGuard<'_, Vec<GraphNode<T>>>> {
        Ok(self.data.read()?)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.get_nodes()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether both handles refer to the same graph.
    pub fn same_graph(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Validate `op` against its inputs and append it.
    ///
    /// Fails with [`Error::UnknownNode`] for a dangling input and
    /// [`Error::Shape`] for incompatible shapes; the graph is unchanged on error.
    pub fn add_node(&self, op: Op<T>) -> Result<NodeId> {
        Ok(self.push(op)?.id)
    }

    pub(crate) fn push(&self, op: Op<T>) -> Result<GraphNode<T>> {
        let mut nodes = self.data.write()?;
        let inputs = op.inputs();
        let mut descs = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let node = nodes.get(input.0).ok_or(Error::UnknownNode(*input))?;
            descs.push(&node.desc);
        }
        if let Op::Assign { variable, .. } = &op {
            if !matches!(nodes[variable.0].op, Op::Variable { .. }) {
                return Err(Error::shape(
                    op.kind(),
                    format!("target {variable} is not a variable"),
                ));
            }
        }
        let shape = op.infer_shape(&descs)?;
        let node = GraphNode {
            id: NodeId(nodes.len()),
            desc: TensorDescriptor::contiguous(T::ELEMENT_TYPE, shape),
            op,
        };
        tracing::trace!(
            "added {} with shape {} from {:?}",
            node.name(),
            node.desc.shape,
            inputs
        );
        nodes.push(node.clone());
        Ok(node)
    }

    /// The transitive dependencies of `outputs`, in creation order.
    ///
    /// Creation order is a topological order because edges only point backwards.
    pub fn topological_order(&self, outputs: &[NodeId]) -> Result<Vec<NodeId>> {
        let nodes = self.get_nodes()?;
        let mut reached = vec![false; nodes.len()];
        let mut stack = Vec::new();
        for out in outputs {
            if out.0 >= nodes.len() {
                return Err(Error::UnknownNode(*out));
            }
            stack.push(*out);
        }
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut reached[id.0], true) {
                continue;
            }
            stack.extend(nodes[id.0].op.inputs());
        }
        Ok(reached
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| r.then_some(NodeId(i)))
            .collect())
    }

    /// Consumers of each node of `order`, restricted to nodes in `order`.
    pub fn consumers(&self, order: &[NodeId]) -> Result<BTreeMap<NodeId, Vec<NodeId>>> {
        let nodes = self.get_nodes()?;
        let mut consumers: BTreeMap<NodeId, Vec<NodeId>> =
            order.iter().map(|id| (*id, Vec::new())).collect();
        for id in order {
            let node = nodes.get(id.0).ok_or(Error::UnknownNode(*id))?;
            for input in node.op.inputs() {
                if let Some(users) = consumers.get_mut(&input) {
                    if !users.contains(id) {
                        users.push(*id);
                    }
                }
            }
        }
        Ok(consumers)
    }

    pub fn to_petgraph(&self) -> Result<PetGraph<String, ()>> {
        let nodes = self.get_nodes()?;
        let mut g = PetGraph::<String, ()>::new();
        let idx_map: Vec<NodeIndex> = nodes
            .iter()
            .map(|node| g.add_node(format!("{}{}", node.name(), node.desc.shape)))
            .collect();
        for (dst, node) in nodes.iter().enumerate() {
            for src in node.op.inputs() {
                g.add_edge(idx_map[src.0], idx_map[dst], ());
            }
        }
        Ok(g)
    }

    /// Produce a DOT format string of this graph.
    pub fn to_dot(&self) -> Result<String> {
        let g = self.to_petgraph()?;
        Ok(format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel])))
    }

    /// Visualize the graph by saving it to this file.
    ///
    /// Install graphvis:
    /// - brew install graphviz
    /// - apt install graphviz
    pub fn visualize<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let path = filename.as_ref();
        let dot_path = env::temp_dir().join("opgraph.dot");

        fs::write(&dot_path, self.to_dot()?)?;
        let status = Command::new("dot")
            .args([
                "-Tpng",
                &dot_path.display().to_string(),
                "-o",
                &path.display().to_string(),
            ])
            .status()?;
        if !status.success() {
            crate::bail!("Graphviz failed with {status}");
        }

        Ok(())
    }
}

impl<T: DType> Default for Graph<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{op::BinaryOpType, Shape};

    fn placeholder(graph: &Graph<f32>, dims: &[usize]) -> NodeId {
        graph
            .add_node(Op::Placeholder {
                shape: Shape::from(dims),
            })
            .unwrap()
    }

    #[test]
    fn dangling_input_is_rejected() {
        let graph = Graph::<f32>::empty();
        let x = placeholder(&graph, &[2]);
        let err = graph
            .add_node(Op::BinaryOp {
                l_id: x,
                r_id: NodeId::from(7),
                operator: BinaryOpType::Add,
            })
            .unwrap_err();
        assert!(matches!(err.inner(), Error::UnknownNode(id) if id.get() == 7));
        assert_eq!(graph.len().unwrap(), 1);
    }

    #[test]
    fn shape_error_leaves_graph_usable() {
        let graph = Graph::<f32>::empty();
        let x = placeholder(&graph, &[2]);
        let y = placeholder(&graph, &[3]);
        let err = graph
            .add_node(Op::BinaryOp {
                l_id: x,
                r_id: y,
                operator: BinaryOpType::Mul,
            })
            .unwrap_err();
        assert!(matches!(err.inner(), Error::Shape { .. }));
        assert_eq!(graph.len().unwrap(), 2);

        let z = graph
            .add_node(Op::BinaryOp {
                l_id: x,
                r_id: x,
                operator: BinaryOpType::Mul,
            })
            .unwrap();
        assert_eq!(z.get(), 2);
    }

    #[test]
    fn topological_order_covers_only_dependencies() {
        let graph = Graph::<f32>::empty();
        let a = placeholder(&graph, &[2]);
        let unused = placeholder(&graph, &[2]);
        let b = placeholder(&graph, &[2]);
        let sum = graph
            .add_node(Op::BinaryOp {
                l_id: b,
                r_id: a,
                operator: BinaryOpType::Add,
            })
            .unwrap();
        let order = graph.topological_order(&[sum]).unwrap();
        assert_eq!(order, vec![a, b, sum]);
        assert!(!order.contains(&unused));

        let consumers = graph.consumers(&order).unwrap();
        assert_eq!(consumers[&a], vec![sum]);
        assert!(consumers[&sum].is_empty());
    }

    #[test]
    fn dot_lists_every_node() {
        let graph = Graph::<f32>::empty();
        let a = placeholder(&graph, &[2]);
        graph
            .add_node(Op::BinaryOp {
                l_id: a,
                r_id: a,
                operator: BinaryOpType::Add,
            })
            .unwrap();
        let dot = graph.to_dot().unwrap();
        assert!(dot.contains("placeholder_0(2)"));
        assert!(dot.contains("add_1(2)"));
    }
}
