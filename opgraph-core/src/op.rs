use std::{cmp::Ordering, fmt::Debug, sync::Arc};

use crate::{graph::NodeId, shape::TensorDescriptor, DType, Error, Result, Shape};

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum BinaryOpType {
    Add,
    Div,
    Sub,
    Mul,
    Maximum,
    Minimum,
    Greater,
    Less,
}

impl BinaryOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Div => "divide",
            Self::Sub => "subtract",
            Self::Mul => "multiply",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::Greater => "greater",
            Self::Less => "less",
        }
    }

    /// Comparisons produce `ONE` where the predicate holds and `ZERO` elsewhere.
    ///
    /// Yields `None` only for an integral division without a result.
    pub fn as_closure<T: DType>(&self) -> fn(T, T) -> Option<T> {
        match self {
            Self::Add => |x: T, y| Some(x.elem_add(y)),
            Self::Div => |x: T, y| x.elem_div(y),
            Self::Sub => |x: T, y| Some(x.elem_sub(y)),
            Self::Mul => |x: T, y| Some(x.elem_mul(y)),
            Self::Maximum => |x, y| Some(if y > x { y } else { x }),
            Self::Minimum => |x, y| Some(if y < x { y } else { x }),
            Self::Greater => |x, y| Some(if x > y { T::ONE } else { T::ZERO }),
            Self::Less => |x, y| Some(if x < y { T::ONE } else { T::ZERO }),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum UnaryOpType {
    Neg,
    Sqrt,
    Exp,
    Log,
    Reciprocal,
    Relu,
}

impl UnaryOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Neg => "negative",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Reciprocal => "reciprocal",
            Self::Relu => "relu",
        }
    }

    pub fn to_closure<T: DType>(&self) -> fn(T) -> T {
        match self {
            Self::Neg => |x: T| x.elem_neg(),
            Self::Sqrt => |x: T| T::from_f64(x.to_f64().sqrt()),
            Self::Exp => |x: T| T::from_f64(x.to_f64().exp()),
            Self::Log => |x: T| T::from_f64(x.to_f64().ln()),
            Self::Reciprocal => |x: T| T::from_f64(1.0 / x.to_f64()),
            Self::Relu => |x| if x > T::ZERO { x } else { T::ZERO },
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ReduceOpType {
    Sum,
    Max,
}

impl ReduceOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
        }
    }

    pub fn identity<T: DType>(&self) -> T {
        match self {
            Self::Sum => T::ZERO,
            Self::Max => T::LOWEST,
        }
    }

    pub fn as_closure<T: DType>(&self) -> fn(T, T) -> T {
        match self {
            Self::Sum => |acc: T, x| acc.elem_add(x),
            Self::Max => |acc, x| if x > acc { x } else { acc },
        }
    }
}

/// One-time value population for a variable, run by `init`.
#[derive(PartialEq, Debug, Clone)]
pub enum Initializer<T: DType> {
    Fill(T),
    /// `start + i * step` for the i-th row-major element.
    Arange { start: T, step: T },
    /// Uniform samples in `[low, high)`, seeded per computation.
    Uniform { low: f64, high: f64 },
    /// Gaussian samples, seeded per computation.
    Normal { mean: f64, std: f64 },
}

impl<T: DType> Initializer<T> {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Uniform { low, high }
                if low.partial_cmp(high) != Some(Ordering::Less) || !(high - low).is_finite() =>
            {
                Err(Error::shape(
                    "variable",
                    format!("uniform initializer needs finite low < high, got [{low}, {high})"),
                ))
            }
            Self::Normal { mean, std } if !(std.is_finite() && *std >= 0. && mean.is_finite()) => {
                Err(Error::shape(
                    "variable",
                    format!("normal initializer needs finite mean and std >= 0, got N({mean}, {std})"),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Read-only strided access to one input of a custom operator.
#[derive(Clone, Copy)]
pub struct ViewRef<'a, T: DType> {
    pub data: &'a [T],
    pub desc: &'a TensorDescriptor,
}

impl<T: DType> ViewRef<'_, T> {
    pub fn len(&self) -> usize {
        self.desc.elem_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The row-major element `linear` of the view.
    pub fn get(&self, linear: usize) -> T {
        self.data[self.desc.offset_of(linear)]
    }
}

/// A user-defined operator kind.
///
/// Implementations validate their input shapes when the node is added and
/// write their whole output on every compute step.
pub trait CustomOp<T: DType>: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn output_shape(&self, inputs: &[&Shape]) -> Result<Shape>;

    /// `output` is contiguous and described by `output_desc`.
    fn compute(
        &self,
        inputs: &[ViewRef<'_, T>],
        output: &mut [T],
        output_desc: &TensorDescriptor,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum Op<T: DType> {
    /// A value bound by the caller at compute time.
    Placeholder {
        shape: Shape,
    },
    Constant {
        shape: Shape,
        values: Vec<T>,
    },
    /// A persistent tensor populated once by `init`.
    Variable {
        shape: Shape,
        init: Initializer<T>,
    },
    BinaryOp {
        l_id: NodeId,
        r_id: NodeId,
        operator: BinaryOpType,
    },
    UnaryOp {
        v_id: NodeId,
        operator: UnaryOpType,
    },
    /// `axes` are the positions of `shape` not present in the input.
    Broadcast {
        v_id: NodeId,
        shape: Shape,
        axes: Vec<usize>,
    },
    /// Output axis `i` is input axis `order[i]`.
    ReorderAxes {
        v_id: NodeId,
        order: Vec<usize>,
    },
    Reshape {
        v_id: NodeId,
        shape: Shape,
    },
    Reduce {
        v_id: NodeId,
        axes: Vec<usize>,
        operator: ReduceOpType,
    },
    /// Contracts the last `reduction_axes` axes of lhs with the first ones of rhs.
    Dot {
        l_id: NodeId,
        r_id: NodeId,
        reduction_axes: usize,
    },
    OneHot {
        v_id: NodeId,
        depth: usize,
        axis: usize,
    },
    /// Pools over the trailing spatial axes of an `(N, C, spatial..)` input.
    MaxPool {
        v_id: NodeId,
        window_shape: Shape,
        window_strides: Vec<usize>,
    },
    Custom {
        inputs: Vec<NodeId>,
        op: Arc<dyn CustomOp<T>>,
    },
    /// Overwrites `variable` with `value` once every other step has run.
    ///
    /// The node evaluates to the updated variable.
    Assign {
        variable: NodeId,
        value: NodeId,
    },
}

impl<T: DType> Op<T> {
    /// Kind tag of a built-in operator; `"custom"` for registered kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Placeholder { .. } => "placeholder",
            Self::Constant { .. } => "constant",
            Self::Variable { .. } => "variable",
            Self::BinaryOp { operator, .. } => operator.name(),
            Self::UnaryOp { operator, .. } => operator.name(),
            Self::Broadcast { .. } => "broadcast",
            Self::ReorderAxes { .. } => "reorder_axes",
            Self::Reshape { .. } => "reshape",
            Self::Reduce { operator, .. } => operator.name(),
            Self::Dot { .. } => "dot",
            Self::OneHot { .. } => "one_hot",
            Self::MaxPool { .. } => "max_pool",
            Self::Custom { .. } => "custom",
            Self::Assign { .. } => "assign",
        }
    }

    /// Name used to derive buffer and step names.
    pub fn name(&self) -> &str {
        match self {
            Self::Custom { op, .. } => op.name(),
            _ => self.kind(),
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            Self::Placeholder { .. } | Self::Constant { .. } | Self::Variable { .. } => vec![],
            Self::BinaryOp { l_id, r_id, .. } | Self::Dot { l_id, r_id, .. } => vec![*l_id, *r_id],
            Self::Assign { variable, value } => vec![*variable, *value],
            Self::UnaryOp { v_id, .. }
            | Self::Broadcast { v_id, .. }
            | Self::ReorderAxes { v_id, .. }
            | Self::Reshape { v_id, .. }
            | Self::Reduce { v_id, .. }
            | Self::OneHot { v_id, .. }
            | Self::MaxPool { v_id, .. } => vec![*v_id],
            Self::Custom { inputs, .. } => inputs.clone(),
        }
    }

    /// Nodes with no producer; they own a buffer for the whole computation.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Self::Placeholder { .. } | Self::Constant { .. } | Self::Variable { .. }
        )
    }

    /// Index-aligned ops that may overwrite an input of identical layout.
    pub fn is_elementwise(&self) -> bool {
        matches!(self, Self::BinaryOp { .. } | Self::UnaryOp { .. })
    }

    /// Validate the attributes against the input descriptors and infer the output shape.
    ///
    /// `inputs` is ordered like [`Op::inputs`].
    pub(crate) fn infer_shape(&self, inputs: &[&TensorDescriptor]) -> Result<Shape> {
        let op = self.kind();
        match self {
            Self::Placeholder { shape } => Ok(shape.clone()),
            Self::Constant { shape, values } => {
                if values.len() != shape.elem_count() && values.len() != 1 {
                    return Err(Error::shape(
                        op,
                        format!(
                            "{} values given for shape {shape} with {} elements",
                            values.len(),
                            shape.elem_count()
                        ),
                    ));
                }
                Ok(shape.clone())
            }
            Self::Variable { shape, init } => {
                init.validate()?;
                Ok(shape.clone())
            }
            Self::BinaryOp { .. } => {
                let (l, r) = (&inputs[0].shape, &inputs[1].shape);
                if l != r {
                    return Err(Error::shape(op, format!("lhs {l} and rhs {r} differ")));
                }
                Ok(l.clone())
            }
            Self::UnaryOp { operator, .. } => {
                if *operator == UnaryOpType::Neg && !T::SIGNED {
                    return Err(Error::shape(
                        op,
                        format!("not supported for unsigned dtype {}", T::NAME),
                    ));
                }
                Ok(inputs[0].shape.clone())
            }
            Self::Broadcast { shape, axes, .. } => {
                let input = &inputs[0].shape;
                if axes.iter().any(|&a| a >= shape.rank()) || has_duplicates(axes) {
                    return Err(Error::shape(
                        op,
                        format!("axes {axes:?} invalid for output {shape}"),
                    ));
                }
                let kept = (0..shape.rank())
                    .filter(|i| !axes.contains(i))
                    .map(|i| shape.dims()[i])
                    .collect::<Vec<_>>();
                if kept != input.dims() {
                    return Err(Error::shape(
                        op,
                        format!("input {input} does not match {shape} without axes {axes:?}"),
                    ));
                }
                Ok(shape.clone())
            }
            Self::ReorderAxes { order, .. } => {
                let input = &inputs[0].shape;
                if order.len() != input.rank()
                    || has_duplicates(order)
                    || order.iter().any(|&a| a >= input.rank())
                {
                    return Err(Error::shape(
                        op,
                        format!("{order:?} is not a permutation of the axes of {input}"),
                    ));
                }
                Ok(Shape::new(order.iter().map(|&a| input.dims()[a]).collect()))
            }
            Self::Reshape { shape, .. } => {
                let input = &inputs[0].shape;
                if input.elem_count() != shape.elem_count() {
                    return Err(Error::shape(
                        op,
                        format!("cannot reshape {input} into {shape}"),
                    ));
                }
                Ok(shape.clone())
            }
            Self::Reduce { axes, .. } => {
                let input = &inputs[0].shape;
                if axes.iter().any(|&a| a >= input.rank()) || has_duplicates(axes) {
                    return Err(Error::shape(
                        op,
                        format!("reduction axes {axes:?} invalid for input {input}"),
                    ));
                }
                Ok(Shape::new(
                    (0..input.rank())
                        .filter(|i| !axes.contains(i))
                        .map(|i| input.dims()[i])
                        .collect(),
                ))
            }
            Self::Dot { reduction_axes, .. } => {
                let (l, r) = (&inputs[0].shape, &inputs[1].shape);
                let n = *reduction_axes;
                if n > l.rank() || n > r.rank() {
                    return Err(Error::shape(
                        op,
                        format!("cannot contract {n} axes of {l} and {r}"),
                    ));
                }
                let l_split = l.rank() - n;
                if l.dims()[l_split..] != r.dims()[..n] {
                    return Err(Error::shape(
                        op,
                        format!("contracted axes of {l} and {r} differ"),
                    ));
                }
                let mut dims = l.dims()[..l_split].to_vec();
                dims.extend_from_slice(&r.dims()[n..]);
                Ok(Shape::new(dims))
            }
            Self::OneHot { depth, axis, .. } => {
                let input = &inputs[0].shape;
                if *axis > input.rank() {
                    return Err(Error::shape(
                        op,
                        format!("axis {axis} out of range for input {input}"),
                    ));
                }
                let mut dims = input.dims().to_vec();
                dims.insert(*axis, *depth);
                Ok(Shape::new(dims))
            }
            Self::MaxPool {
                window_shape,
                window_strides,
                ..
            } => {
                let input = &inputs[0].shape;
                if input.rank() < 3 {
                    return Err(Error::shape(
                        op,
                        format!("input {input} needs a batch, a channel and spatial axes"),
                    ));
                }
                let spatial = &input.dims()[2..];
                if window_shape.rank() != spatial.len() {
                    return Err(Error::shape(
                        op,
                        format!(
                            "window {window_shape} has rank {}, input {input} has {} spatial axes",
                            window_shape.rank(),
                            spatial.len()
                        ),
                    ));
                }
                if window_strides.len() != spatial.len() {
                    return Err(Error::shape(
                        op,
                        format!(
                            "strides {window_strides:?} have rank {}, input {input} has {} spatial axes",
                            window_strides.len(),
                            spatial.len()
                        ),
                    ));
                }
                let mut dims = input.dims()[..2].to_vec();
                for ((&size, &window), &stride) in
                    spatial.iter().zip(window_shape.dims()).zip(window_strides)
                {
                    if window == 0 || window > size || stride == 0 {
                        return Err(Error::shape(
                            op,
                            format!(
                                "window {window_shape} with strides {window_strides:?} does not fit input {input}"
                            ),
                        ));
                    }
                    dims.push((size - window) / stride + 1);
                }
                Ok(Shape::new(dims))
            }
            Self::Custom { op: custom, .. } => {
                let shapes = inputs.iter().map(|d| &d.shape).collect::<Vec<_>>();
                custom.output_shape(&shapes)
            }
            Self::Assign { .. } => {
                let (variable, value) = (&inputs[0].shape, &inputs[1].shape);
                if variable != value {
                    return Err(Error::shape(
                        op,
                        format!("value {value} does not fit variable {variable}"),
                    ));
                }
                Ok(variable.clone())
            }
        }
    }
}

fn has_duplicates(axes: &[usize]) -> bool {
    axes.iter()
        .enumerate()
        .any(|(i, a)| axes[..i].contains(a))
}
