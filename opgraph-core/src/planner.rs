//! Allocation planning.
//!
//! The planner walks a topologically ordered slice of a graph and decides, for
//! every node, which storage buffer hosts its value and how its view is laid
//! out inside that buffer. Three kinds of aliasing are produced:
//!
//! - **views**: reshapes of contiguous values, axis reorders and broadcasts
//!   reinterpret their input's buffer and need no compute step;
//! - **in-place**: an elementwise node overwrites an input whose buffer holds
//!   nothing that is still needed;
//! - everything else gets a dedicated buffer named after the node.
//!
//! Assignments write into their variable's buffer and are scheduled after
//! every other step, so each read of a variable sees the value it had when
//! the call started.
//!
//! The plan is a pure function of the graph topology, so compiling the same
//! graph twice yields identical plans.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    dtype::ElementType,
    graph::{GraphNode, NodeId},
    op::Op,
    shape::TensorDescriptor,
    DType, Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Receives a caller-supplied value on every compute call.
    Parameter,
    /// Holds a literal, copied in by `init`.
    Constant,
    /// Holds a persistent value populated by `init`.
    Variable,
    /// Scratch written by compute steps.
    Intermediate,
}

impl BufferKind {
    /// Buffers whose contents must be populated by `init`.
    pub fn requires_init(&self) -> bool {
        matches!(self, Self::Constant | Self::Variable)
    }
}

/// A storage buffer of the plan, named after the node that first occupies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSpec {
    pub name: String,
    pub node: NodeId,
    pub kind: BufferKind,
    pub dtype: ElementType,
    /// Length in elements, large enough for every view the buffer hosts.
    pub elements: usize,
    pub size_bytes: usize,
}

/// A typed, shaped window into one buffer of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView {
    pub buffer: usize,
    pub desc: TensorDescriptor,
}

/// A node that writes its result over the storage of one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InPlace {
    pub node: NodeId,
    pub input: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub buffers: Vec<BufferSpec>,
    pub views: BTreeMap<NodeId, TensorView>,
    /// Nodes that need a compute step, in execution order.
    pub steps: Vec<NodeId>,
    pub in_place: Vec<InPlace>,
    pub parameters: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl AllocationPlan {
    pub fn view(&self, id: NodeId) -> Result<&TensorView> {
        self.views
            .get(&id)
            .ok_or_else(|| Error::Compilation(format!("{id} has no planned view")))
    }

    pub fn buffer_of(&self, id: NodeId) -> Result<&BufferSpec> {
        let view = self.view(id)?;
        Ok(&self.buffers[view.buffer])
    }

    pub fn total_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.size_bytes).sum()
    }
}

pub struct AllocationPlanner {
    inplace: bool,
}

impl AllocationPlanner {
    /// `inplace` enables in-place aliasing of elementwise nodes.
    pub fn new(inplace: bool) -> Self {
        Self { inplace }
    }

    /// Plan storage for `order`, which must be topologically ordered and
    /// closed under dependencies of `outputs` and `parameters`.
    pub fn plan<T: DType>(
        &self,
        nodes: &[GraphNode<T>],
        order: &[NodeId],
        outputs: &[NodeId],
        parameters: &[NodeId],
    ) -> Result<AllocationPlan> {
        let node = |id: NodeId| nodes.get(id.get()).ok_or(Error::UnknownNode(id));

        if outputs.is_empty() {
            return Err(Error::Compilation("no outputs requested".to_string()));
        }
        let position: BTreeMap<NodeId, usize> =
            order.iter().enumerate().map(|(p, id)| (*id, p)).collect();
        for id in outputs.iter().chain(parameters) {
            if !position.contains_key(id) {
                return Err(Error::Compilation(format!("{id} is missing from the order")));
            }
        }
        let bound: BTreeSet<NodeId> = parameters.iter().copied().collect();
        if bound.len() != parameters.len() {
            return Err(Error::Compilation(
                "a parameter is bound more than once".to_string(),
            ));
        }
        for id in order {
            let n = node(*id)?;
            match (&n.op, bound.contains(id)) {
                (Op::Placeholder { .. }, false) => {
                    return Err(Error::Compilation(format!(
                        "placeholder {} is not bound to a parameter",
                        n.name()
                    )))
                }
                (Op::Placeholder { .. }, true) => {}
                (_, true) => {
                    return Err(Error::Compilation(format!(
                        "parameter {} is not a placeholder",
                        n.name()
                    )))
                }
                _ => {}
            }
        }

        // Assignments run after every other step and are read only as outputs.
        let mut assigned = BTreeSet::new();
        for id in order {
            let n = node(*id)?;
            if let Op::Assign { variable, .. } = &n.op {
                if !assigned.insert(*variable) {
                    return Err(Error::Compilation(format!(
                        "{variable} is assigned more than once"
                    )));
                }
            }
            for input in n.op.inputs() {
                if matches!(node(input)?.op, Op::Assign { .. }) {
                    return Err(Error::Compilation(format!(
                        "{} reads the assignment {input}",
                        n.name()
                    )));
                }
            }
        }

        // Position of the last step reading each node; outputs stay live to the end.
        let mut last_use: BTreeMap<NodeId, usize> = BTreeMap::new();
        for (p, id) in order.iter().enumerate() {
            let n = node(*id)?;
            let p = if matches!(n.op, Op::Assign { .. }) { usize::MAX } else { p };
            for input in n.op.inputs() {
                let entry = last_use.entry(input).or_default();
                *entry = (*entry).max(p);
            }
        }
        for id in outputs {
            last_use.insert(*id, usize::MAX);
        }

        let mut plan = AllocationPlan {
            buffers: Vec::new(),
            views: BTreeMap::new(),
            steps: Vec::new(),
            in_place: Vec::new(),
            parameters: parameters.to_vec(),
            outputs: outputs.to_vec(),
        };
        // Nodes whose value lives in each buffer.
        let mut hosted: Vec<Vec<NodeId>> = Vec::new();
        let mut updates = Vec::new();

        for (p, id) in order.iter().enumerate() {
            let n = node(*id)?;
            let aliased = match &n.op {
                Op::Placeholder { .. } => None,
                Op::Constant { .. } => None,
                Op::Variable { .. } => None,
                Op::Reshape { v_id, shape } => {
                    let input = plan.view(*v_id)?;
                    input.desc.is_contiguous().then(|| TensorView {
                        buffer: input.buffer,
                        desc: input.desc.reshaped(shape.clone()),
                    })
                }
                Op::ReorderAxes { v_id, order } => {
                    let input = plan.view(*v_id)?;
                    Some(TensorView {
                        buffer: input.buffer,
                        desc: input.desc.permuted(order),
                    })
                }
                Op::Broadcast { v_id, shape, axes } => {
                    let input = plan.view(*v_id)?;
                    Some(TensorView {
                        buffer: input.buffer,
                        desc: input.desc.broadcast(shape.clone(), axes),
                    })
                }
                Op::Assign { variable, value } => {
                    let target = plan.view(*variable)?;
                    let source = plan.view(*value)?;
                    if source.buffer == target.buffer && source.desc != target.desc {
                        return Err(Error::Compilation(format!(
                            "{} overlaps the variable it updates",
                            n.name()
                        )));
                    }
                    Some(target.clone())
                }
                op if op.is_elementwise() && self.inplace => {
                    let candidate = self.in_place_candidate(n, p, &plan, &hosted, &last_use)?;
                    candidate.map(|input| {
                        tracing::debug!("{} computes in place over {input}", n.name());
                        plan.in_place.push(InPlace { node: *id, input });
                        plan.views[&input].clone()
                    })
                }
                _ => None,
            };

            let is_view = aliased.is_some()
                && matches!(
                    n.op,
                    Op::Reshape { .. } | Op::ReorderAxes { .. } | Op::Broadcast { .. }
                );
            let view = match aliased {
                Some(view) => view,
                None => {
                    let kind = match &n.op {
                        Op::Placeholder { .. } => BufferKind::Parameter,
                        Op::Constant { .. } => BufferKind::Constant,
                        Op::Variable { .. } => BufferKind::Variable,
                        _ => BufferKind::Intermediate,
                    };
                    let name = n.name();
                    if n.desc.elem_count() == 0 {
                        return Err(Error::allocation(
                            &name,
                            format!("shape {} has no elements", n.desc.shape),
                        ));
                    }
                    plan.buffers.push(BufferSpec {
                        name,
                        node: *id,
                        kind,
                        dtype: n.desc.dtype,
                        elements: 0,
                        size_bytes: 0,
                    });
                    hosted.push(Vec::new());
                    TensorView {
                        buffer: plan.buffers.len() - 1,
                        desc: n.desc.clone(),
                    }
                }
            };

            if matches!(n.op, Op::Assign { .. }) {
                updates.push(*id);
            } else if !n.op.is_source() && !is_view {
                plan.steps.push(*id);
            }
            hosted[view.buffer].push(*id);
            plan.views.insert(*id, view);
        }

        plan.steps.extend(updates);

        for view in plan.views.values() {
            let buffer = &mut plan.buffers[view.buffer];
            buffer.elements = buffer.elements.max(view.desc.extent());
        }
        for buffer in &mut plan.buffers {
            if buffer.elements == 0 {
                return Err(Error::allocation(&buffer.name, "zero-sized buffer"));
            }
            buffer.size_bytes = buffer
                .elements
                .checked_mul(buffer.dtype.size_in_bytes())
                .ok_or_else(|| Error::allocation(&buffer.name, "size overflows usize"))?;
        }

        tracing::debug!(
            "planned {} buffers ({} bytes), {} steps, {} in place",
            plan.buffers.len(),
            plan.total_bytes(),
            plan.steps.len(),
            plan.in_place.len()
        );
        Ok(plan)
    }

    /// The first input of `n` whose buffer may be overwritten by `n`.
    fn in_place_candidate<T: DType>(
        &self,
        n: &GraphNode<T>,
        p: usize,
        plan: &AllocationPlan,
        hosted: &[Vec<NodeId>],
        last_use: &BTreeMap<NodeId, usize>,
    ) -> Result<Option<NodeId>> {
        let inputs = n.op.inputs();
        for input in &inputs {
            let view = plan.view(*input)?;
            if view.desc.shape != n.desc.shape || !view.desc.is_contiguous() {
                continue;
            }
            if plan.buffers[view.buffer].kind != BufferKind::Intermediate {
                continue;
            }
            let dead_after = hosted[view.buffer]
                .iter()
                .all(|h| last_use.get(h).is_none_or(|last| *last <= p));
            if !dead_after {
                continue;
            }
            // Every other operand sharing the buffer must be read index-aligned.
            let mut aligned = true;
            for other in &inputs {
                let other_view = plan.view(*other)?;
                if other_view.buffer == view.buffer && other_view.desc != view.desc {
                    aligned = false;
                }
            }
            if aligned {
                return Ok(Some(*input));
            }
        }
        Ok(None)
    }
}
