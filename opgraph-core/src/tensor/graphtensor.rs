use std::{
    ops::{Add, Div, Mul, Neg, Sub},
    sync::Arc,
};

use crate::{
    graph::{Graph, GraphNode, NodeId},
    op::{BinaryOpType, CustomOp, Initializer, Op, ReduceOpType, UnaryOpType},
    shape::TensorDescriptor,
    DType, Error, Result, Shape,
};

/// A tensor representing an intermediary result of a graph. Performing operations
/// on this tensor will not cause any computations.
#[derive(Clone)]
pub struct GraphTensor<T: DType> {
    id: NodeId,
    desc: TensorDescriptor,
    graph: Graph<T>,
}

impl<T: DType> std::fmt::Debug for GraphTensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphTensor")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

impl<T: DType> GraphTensor<T> {
    fn from_node(graph: &Graph<T>, node: GraphNode<T>) -> Self {
        Self {
            id: node.id,
            desc: node.desc,
            graph: graph.clone(),
        }
    }

    fn append(&self, op: Op<T>) -> Result<Self> {
        let node = self.graph.push(op)?;
        Ok(Self::from_node(&self.graph, node))
    }

    /// Fails with [`Error::UnknownNode`] when `other` lives in another graph.
    fn check_same_graph(&self, other: &Self) -> Result<()> {
        if !self.graph.same_graph(&other.graph) {
            return Err(Error::UnknownNode(other.id));
        }
        Ok(())
    }

    /// A value supplied by the caller on every compute call.
    pub fn placeholder(graph: &Graph<T>, shape: impl Into<Shape>) -> Result<Self> {
        let node = graph.push(Op::Placeholder {
            shape: shape.into(),
        })?;
        Ok(Self::from_node(graph, node))
    }

    /// A literal constant. A single value is repeated over the whole shape.
    pub fn constant(graph: &Graph<T>, shape: impl Into<Shape>, values: Vec<T>) -> Result<Self> {
        let node = graph.push(Op::Constant {
            shape: shape.into(),
            values,
        })?;
        Ok(Self::from_node(graph, node))
    }

    /// A scalar constant.
    pub fn scalar(graph: &Graph<T>, v: T) -> Result<Self> {
        Self::constant(graph, Shape::scalar(), vec![v])
    }

    /// Create a tensor filled with some value.
    pub fn fill(graph: &Graph<T>, shape: impl Into<Shape>, v: T) -> Result<Self> {
        Self::constant(graph, shape, vec![v])
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(graph: &Graph<T>, shape: impl Into<Shape>) -> Result<Self> {
        Self::fill(graph, shape, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(graph: &Graph<T>, shape: impl Into<Shape>) -> Result<Self> {
        Self::fill(graph, shape, T::ONE)
    }

    /// A persistent tensor whose value is produced by `init` when a computation is initialized.
    pub fn variable(
        graph: &Graph<T>,
        shape: impl Into<Shape>,
        init: Initializer<T>,
    ) -> Result<Self> {
        let node = graph.push(Op::Variable {
            shape: shape.into(),
            init,
        })?;
        Ok(Self::from_node(graph, node))
    }

    /// Add a node of a user-defined kind.
    pub fn custom(op: Arc<dyn CustomOp<T>>, inputs: &[&GraphTensor<T>]) -> Result<Self> {
        let Some(first) = inputs.first() else {
            crate::bail!("custom op {} needs at least one input", op.name());
        };
        for input in &inputs[1..] {
            first.check_same_graph(input)?;
        }
        first.append(Op::Custom {
            inputs: inputs.iter().map(|t| t.id).collect(),
            op,
        })
    }

    /// Retrieve the graph for this `GraphTensor`.
    pub fn graph(&self) -> &Graph<T> {
        &self.graph
    }

    /// Get the graph tensor ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn desc(&self) -> &TensorDescriptor {
        &self.desc
    }

    fn binary(&self, rhs: &Self, operator: BinaryOpType) -> Result<Self> {
        self.check_same_graph(rhs)?;
        self.append(Op::BinaryOp {
            l_id: self.id,
            r_id: rhs.id,
            operator,
        })
    }

    fn unary(&self, operator: UnaryOpType) -> Result<Self> {
        self.append(Op::UnaryOp {
            v_id: self.id,
            operator,
        })
    }

    /// Elementwise maximum.
    pub fn maximum(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOpType::Maximum)
    }

    /// Elementwise minimum.
    pub fn minimum(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOpType::Minimum)
    }

    /// `ONE` where `self > rhs`, `ZERO` elsewhere.
    pub fn greater(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOpType::Greater)
    }

    /// `ONE` where `self < rhs`, `ZERO` elsewhere.
    pub fn less(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOpType::Less)
    }

    /// Elementwise unary square root.
    pub fn sqrt(&self) -> Result<Self> {
        self.unary(UnaryOpType::Sqrt)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary(UnaryOpType::Exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.unary(UnaryOpType::Log)
    }

    pub fn reciprocal(&self) -> Result<Self> {
        self.unary(UnaryOpType::Reciprocal)
    }

    pub fn relu(&self) -> Result<Self> {
        self.unary(UnaryOpType::Relu)
    }

    /// Broadcast to `shape`; `axes` are the positions of `shape` absent from `self`.
    pub fn broadcast(&self, shape: impl Into<Shape>, axes: &[usize]) -> Result<Self> {
        self.append(Op::Broadcast {
            v_id: self.id,
            shape: shape.into(),
            axes: axes.to_vec(),
        })
    }

    /// Permute axes: output axis `i` is input axis `order[i]`.
    pub fn reorder_axes(&self, order: &[usize]) -> Result<Self> {
        self.append(Op::ReorderAxes {
            v_id: self.id,
            order: order.to_vec(),
        })
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        self.append(Op::Reshape {
            v_id: self.id,
            shape: shape.into(),
        })
    }

    /// Sum over `axes`, removing them.
    pub fn sum(&self, axes: &[usize]) -> Result<Self> {
        self.append(Op::Reduce {
            v_id: self.id,
            axes: axes.to_vec(),
            operator: ReduceOpType::Sum,
        })
    }

    /// Maximum over `axes`, removing them.
    pub fn max(&self, axes: &[usize]) -> Result<Self> {
        self.append(Op::Reduce {
            v_id: self.id,
            axes: axes.to_vec(),
            operator: ReduceOpType::Max,
        })
    }

    /// Tensor contraction of the last `reduction_axes` axes of `self` with the first of `rhs`.
    pub fn dot(&self, rhs: &Self, reduction_axes: usize) -> Result<Self> {
        self.check_same_graph(rhs)?;
        self.append(Op::Dot {
            l_id: self.id,
            r_id: rhs.id,
            reduction_axes,
        })
    }

    /// Matrix product of two rank-2 tensors.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if self.shape().rank() != 2 || rhs.shape().rank() != 2 {
            return Err(Error::shape(
                "dot",
                format!("matmul needs matrices, got {} and {}", self.shape(), rhs.shape()),
            ));
        }
        self.dot(rhs, 1)
    }

    /// One-hot encode class indices, inserting an axis of length `depth` at `axis`.
    pub fn one_hot(&self, depth: usize, axis: usize) -> Result<Self> {
        self.append(Op::OneHot {
            v_id: self.id,
            depth,
            axis,
        })
    }

    /// Max pooling over the spatial axes of an `(N, C, spatial..)` tensor.
    pub fn max_pool(&self, window_shape: impl Into<Shape>, window_strides: &[usize]) -> Result<Self> {
        self.append(Op::MaxPool {
            v_id: self.id,
            window_shape: window_shape.into(),
            window_strides: window_strides.to_vec(),
        })
    }

    /// Max pooling with unit strides.
    pub fn max_pool_unit_strides(&self, window_shape: impl Into<Shape>) -> Result<Self> {
        let window_shape = window_shape.into();
        let strides = vec![1; window_shape.rank()];
        self.max_pool(window_shape, &strides)
    }

    /// Update the variable `self` with `value` at the end of every compute call.
    ///
    /// The returned tensor is the updated variable. It may be requested as a
    /// computation output but not used as the input of another node. A
    /// computation holds at most one assignment per variable.
    pub fn assign(&self, value: &Self) -> Result<Self> {
        self.check_same_graph(value)?;
        self.append(Op::Assign {
            variable: self.id,
            value: value.id,
        })
    }
}

macro_rules! graphtensor_binop {
    ($trait:ident, $fn_name:ident) => {
        impl<T: DType> $trait<&GraphTensor<T>> for &GraphTensor<T> {
            type Output = Result<GraphTensor<T>>;
            /// Add an elementwise operation to the graph.
            fn $fn_name(self, rhs: &GraphTensor<T>) -> Self::Output {
                self.binary(rhs, BinaryOpType::$trait)
            }
        }

        impl<T: DType> $trait for GraphTensor<T> {
            type Output = Result<GraphTensor<T>>;
            /// Add an elementwise operation to the graph.
            fn $fn_name(self, rhs: Self) -> Self::Output {
                self.binary(&rhs, BinaryOpType::$trait)
            }
        }
    };
}

graphtensor_binop!(Add, add);
graphtensor_binop!(Div, div);
graphtensor_binop!(Mul, mul);
graphtensor_binop!(Sub, sub);

impl<T: DType> Neg for &GraphTensor<T> {
    type Output = Result<GraphTensor<T>>;
    /// Add an elementwise negation to the graph.
    fn neg(self) -> Self::Output {
        self.unary(UnaryOpType::Neg)
    }
}

impl<T: DType> Neg for GraphTensor<T> {
    type Output = Result<GraphTensor<T>>;
    /// Add an elementwise negation to the graph.
    fn neg(self) -> Self::Output {
        self.unary(UnaryOpType::Neg)
    }
}
