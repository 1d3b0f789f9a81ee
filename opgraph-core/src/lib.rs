//! opgraph is a computation-graph compiler for tensor programs.
//!
//! Programs are written against a [`Graph`] of operator nodes and only run once a
//! [`Transformer`] has compiled a slice of that graph into a [`Computation`].
//!
//! Compilation plans storage up front: every value is mapped to a view into a
//! storage buffer, views and reshapes alias their input, and elementwise nodes
//! overwrite intermediates nobody reads anymore. The compiled computation then
//! walks a fixed list of compute steps without allocating.
//!
//! ## A quick guide
//! - First, create a [`Graph`]. It holds every operator node.
//! - Tensors are modelled with a [`GraphTensor`]. These represent the operation but do not perform any computation.
//!   Shapes are checked as soon as a node is added.
//! - Create a [`Transformer`] and call [`Transformer::computation`] with the outputs you need and the
//!   placeholders to bind. This plans, allocates and initializes a [`Computation`].
//! - Run it with [`Computation::call`], which takes and returns host [`Tensor`]s.
//! - [`Transformer::close`] (or dropping the transformer) releases all buffers.
//!
//! ## What can you do with it?
//! ```
//! use opgraph_core::{Graph, GraphTensor, Tensor, Transformer};
//!
//! let graph = Graph::<f32>::empty();
//! let x = GraphTensor::placeholder(&graph, ()).unwrap();
//! let one = GraphTensor::scalar(&graph, 1.0).unwrap();
//! let x_plus_one = (&x + &one).unwrap();
//!
//! let mut transformer = Transformer::new();
//! let computation = transformer.computation(&[&x_plus_one], &[&x]).unwrap();
//!
//! let out = computation.call(&[Tensor::scalar(2.0)]).unwrap().one().unwrap();
//! assert_eq!(out.to_scalar().unwrap(), 3.0);
//!
//! transformer.close();
//! ```

mod codegen;
mod computation;
mod cpu_storage;
mod dtype;
mod error;
mod graph;
mod kernels;
mod op;
mod planner;
mod shape;
mod storage;
mod tensor;
mod transformer;

pub use computation::{CompiledComputation, ComputationState, ComputeStep};
pub use cpu_storage::{BufferPool, CpuDevice, CpuStorage, PoolMetrics};
pub use dtype::{DType, ElementType};
pub use error::{Context, Error, Result};
pub use graph::{Graph, GraphNode, NodeId};
pub use op::{
    BinaryOpType, CustomOp, Initializer, Op, ReduceOpType, UnaryOpType, ViewRef,
};
pub use planner::{
    AllocationPlan, AllocationPlanner, BufferKind, BufferSpec, InPlace, TensorView,
};
pub use shape::{Shape, TensorDescriptor};
pub use storage::{BackendDevice, BackendStorage};
pub use tensor::{GraphTensor, Tensor};
pub use transformer::{Computation, Outputs, Transformer, TransformerConfig};
