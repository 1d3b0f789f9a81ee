use crate::{
    codegen,
    graph::{GraphNode, NodeId},
    kernels::{self, Operand},
    op::{Op, ViewRef},
    planner::{AllocationPlan, TensorView},
    storage::{BackendDevice, BackendStorage},
    DType, Error, Result, Tensor,
};

/// Lifecycle of a [`CompiledComputation`].
///
/// `Unallocated -> Allocated -> Initialized -> Ready`, with `Released` reachable
/// from every state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComputationState {
    Unallocated,
    Allocated,
    Initialized,
    /// At least one compute call has completed.
    Ready,
    Released,
}

/// One executable unit: reads the input views and writes the output view.
#[derive(Debug, Clone)]
pub struct ComputeStep<T: DType> {
    /// `compute_<kind>_<id>`.
    pub name: String,
    pub node: NodeId,
    pub op: Op<T>,
    pub inputs: Vec<TensorView>,
    pub output: TensorView,
}

/// A buffer populated once by `init`.
#[derive(Debug, Clone)]
struct InitStep<T: DType> {
    node: NodeId,
    op: Op<T>,
    output: TensorView,
}

/// The executable form of a graph slice.
///
/// The computation owns its storage buffers between `allocate` and `release`
/// and runs every compute step without allocating.
pub struct CompiledComputation<T: DType, D: BackendDevice<T>> {
    plan: AllocationPlan,
    steps: Vec<ComputeStep<T>>,
    inits: Vec<InitStep<T>>,
    storage: Vec<Option<D::Storage>>,
    state: ComputationState,
    seed: u64,
    source: String,
}

impl<T: DType, D: BackendDevice<T>> CompiledComputation<T, D> {
    /// Bind `plan` to the nodes it was computed from.
    ///
    /// `seed` drives variable initializers; each variable derives its own
    /// stream from it and its node id.
    pub fn new(nodes: &[GraphNode<T>], plan: AllocationPlan, seed: u64) -> Result<Self> {
        let node = |id: NodeId| nodes.get(id.get()).ok_or(Error::UnknownNode(id));

        let mut steps = Vec::with_capacity(plan.steps.len());
        for id in &plan.steps {
            let n = node(*id)?;
            let inputs = n
                .op
                .inputs()
                .into_iter()
                .map(|input| plan.view(input).cloned())
                .collect::<Result<Vec<_>>>()?;
            steps.push(ComputeStep {
                name: format!("compute_{}", n.name()),
                node: *id,
                op: n.op.clone(),
                inputs,
                output: plan.view(*id)?.clone(),
            });
        }

        let mut inits = Vec::new();
        for buffer in plan.buffers.iter().filter(|b| b.kind.requires_init()) {
            inits.push(InitStep {
                node: buffer.node,
                op: node(buffer.node)?.op.clone(),
                output: plan.view(buffer.node)?.clone(),
            });
        }

        let source = codegen::render(&plan, &steps, nodes);
        Ok(Self {
            plan,
            steps,
            inits,
            storage: Vec::new(),
            state: ComputationState::Unallocated,
            seed,
            source,
        })
    }

    pub fn state(&self) -> ComputationState {
        self.state
    }

    pub fn plan(&self) -> &AllocationPlan {
        &self.plan
    }

    pub fn steps(&self) -> &[ComputeStep<T>] {
        &self.steps
    }

    /// The rendered execution artifact.
    pub fn generated_source(&self) -> &str {
        &self.source
    }

    /// Acquire every buffer of the plan from `device`.
    ///
    /// On failure the buffers acquired so far are freed and the computation
    /// stays `Unallocated`. Calling it again once allocated does nothing.
    pub fn allocate(&mut self, device: &D) -> Result<()> {
        match self.state {
            ComputationState::Released => return Err(Error::Released("computation")),
            ComputationState::Unallocated => {}
            _ => return Ok(()),
        }

        let mut acquired = Vec::with_capacity(self.plan.buffers.len());
        for spec in &self.plan.buffers {
            let storage = match device.alloc(spec) {
                Ok(storage) if storage.len() >= spec.elements => Ok(storage),
                Ok(storage) => {
                    let len = storage.len();
                    device.free(spec, storage);
                    Err(Error::allocation(
                        &spec.name,
                        format!("device returned {len} elements, {} needed", spec.elements),
                    ))
                }
                Err(e) => Err(e),
            };
            match storage {
                Ok(storage) => acquired.push(storage),
                Err(e) => {
                    tracing::debug!(
                        "allocation of `{}` failed, freeing {} buffers",
                        spec.name,
                        acquired.len()
                    );
                    for (spec, storage) in self.plan.buffers.iter().zip(acquired) {
                        device.free(spec, storage);
                    }
                    return Err(e);
                }
            }
        }

        self.storage = acquired.into_iter().map(Some).collect();
        self.state = ComputationState::Allocated;
        tracing::debug!(
            "allocated {} buffers ({} bytes) on {}",
            self.storage.len(),
            self.plan.total_bytes(),
            device.name()
        );
        Ok(())
    }

    /// Copy literals and run variable initializers. Runs once.
    pub fn init(&mut self) -> Result<()> {
        match self.state {
            ComputationState::Released => return Err(Error::Released("computation")),
            ComputationState::Unallocated => {
                return Err(Error::NotReady("init called before allocate".to_string()))
            }
            ComputationState::Allocated => {}
            ComputationState::Initialized | ComputationState::Ready => return Ok(()),
        }

        for init in &self.inits {
            let storage = self.storage[init.output.buffer]
                .as_mut()
                .ok_or_else(|| Error::NotReady(format!("buffer of {} is detached", init.node)))?;
            let start = init.output.desc.elem_offset();
            let out = &mut storage.as_mut_slice()[start..start + init.output.desc.elem_count()];
            match &init.op {
                Op::Constant { values, .. } => kernels::constant(values, out),
                Op::Variable { init: initializer, .. } => {
                    let seed = self.seed ^ (init.node.get() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                    kernels::initialize(initializer, seed, out)?
                }
                _ => {}
            }
        }

        self.state = ComputationState::Initialized;
        tracing::debug!("initialized {} buffers", self.inits.len());
        Ok(())
    }

    /// Run the computation on `inputs`, one tensor per parameter in binding order.
    pub fn compute(&mut self, device: &D, inputs: &[Tensor<T>]) -> Result<Vec<Tensor<T>>> {
        match self.state {
            ComputationState::Released => return Err(Error::Released("computation")),
            ComputationState::Unallocated | ComputationState::Allocated => {
                return Err(Error::NotReady("compute called before init".to_string()))
            }
            ComputationState::Initialized | ComputationState::Ready => {}
        }

        if inputs.len() != self.plan.parameters.len() {
            return Err(Error::shape(
                "compute",
                format!(
                    "expected {} inputs, got {}",
                    self.plan.parameters.len(),
                    inputs.len()
                ),
            ));
        }
        for (id, input) in self.plan.parameters.iter().zip(inputs) {
            let view = self.plan.view(*id)?;
            if input.shape() != &view.desc.shape {
                return Err(Error::shape(
                    "compute",
                    format!(
                        "input for {id} has shape {}, expected {}",
                        input.shape(),
                        view.desc.shape
                    ),
                ));
            }
        }

        for (id, input) in self.plan.parameters.iter().zip(inputs) {
            let view = self.plan.view(*id)?;
            let storage = self.storage[view.buffer]
                .as_mut()
                .ok_or_else(|| Error::NotReady(format!("buffer of {id} is detached")))?;
            let start = view.desc.elem_offset();
            storage.as_mut_slice()[start..start + input.data().len()].copy_from_slice(input.data());
        }

        for step in &self.steps {
            tracing::trace!("{}", step.name);
            run_step::<T, D>(step, &mut self.storage)?;
        }
        device.synchronize()?;

        let mut outputs = Vec::with_capacity(self.plan.outputs.len());
        for id in &self.plan.outputs {
            let view = self.plan.view(*id)?;
            let storage = self.storage[view.buffer]
                .as_ref()
                .ok_or_else(|| Error::NotReady(format!("buffer of {id} is detached")))?;
            let mut data = vec![T::ZERO; view.desc.elem_count()];
            kernels::copy(
                ViewRef {
                    data: storage.as_slice(),
                    desc: &view.desc,
                },
                &mut data,
            );
            outputs.push(Tensor::new(view.desc.shape.clone(), data)?);
        }

        self.state = ComputationState::Ready;
        Ok(outputs)
    }

    /// Swap the storage backing buffer `name`, returning the previous storage.
    pub fn update_buffer(&mut self, name: &str, storage: D::Storage) -> Result<D::Storage> {
        match self.state {
            ComputationState::Released => return Err(Error::Released("computation")),
            ComputationState::Unallocated => {
                return Err(Error::NotReady(format!(
                    "buffer `{name}` updated before allocate"
                )))
            }
            _ => {}
        }
        let index = self
            .plan
            .buffers
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| Error::allocation(name, "no such buffer"))?;
        let needed = self.plan.buffers[index].elements;
        if storage.len() < needed {
            return Err(Error::allocation(
                name,
                format!("storage has {} elements, {needed} needed", storage.len()),
            ));
        }
        self.storage[index]
            .replace(storage)
            .ok_or_else(|| Error::NotReady(format!("buffer `{name}` is detached")))
    }

    /// Give every buffer back to `device`. Idempotent.
    pub fn release(&mut self, device: &D) {
        if self.state == ComputationState::Released {
            return;
        }
        let mut freed = 0;
        for (spec, slot) in self.plan.buffers.iter().zip(self.storage.iter_mut()) {
            if let Some(storage) = slot.take() {
                device.free(spec, storage);
                freed += 1;
            }
        }
        self.storage.clear();
        self.state = ComputationState::Released;
        tracing::debug!("released {freed} buffers");
    }
}

fn run_step<T: DType, D: BackendDevice<T>>(
    step: &ComputeStep<T>,
    storage: &mut [Option<D::Storage>],
) -> Result<()> {
    let detached = || Error::NotReady(format!("buffer of {} is detached", step.node));
    let mut out_storage = storage[step.output.buffer].take().ok_or_else(detached)?;
    let result = dispatch::<T, D>(step, storage, &mut out_storage);
    storage[step.output.buffer] = Some(out_storage);
    result
}

fn operand<'a, T: DType, S: BackendStorage<T>>(
    step: &'a ComputeStep<T>,
    storage: &'a [Option<S>],
    i: usize,
) -> Result<Operand<'a, T>> {
    let view = &step.inputs[i];
    if view.buffer == step.output.buffer {
        return Ok(Operand::Aliased);
    }
    let data = storage[view.buffer]
        .as_ref()
        .ok_or_else(|| Error::NotReady(format!("input buffer of {} is detached", step.node)))?
        .as_slice();
    Ok(Operand::View(ViewRef {
        data,
        desc: &view.desc,
    }))
}

fn input_view<'a, T: DType, S: BackendStorage<T>>(
    step: &'a ComputeStep<T>,
    storage: &'a [Option<S>],
    i: usize,
) -> Result<ViewRef<'a, T>> {
    match operand(step, storage, i)? {
        Operand::View(v) => Ok(v),
        Operand::Aliased => Err(Error::Compilation(format!(
            "{} reads its own output buffer",
            step.name
        ))),
    }
}

fn dispatch<T: DType, D: BackendDevice<T>>(
    step: &ComputeStep<T>,
    storage: &[Option<D::Storage>],
    out_storage: &mut D::Storage,
) -> Result<()> {
    let operand = |i| operand(step, storage, i);
    let view = |i| input_view(step, storage, i);

    let start = step.output.desc.elem_offset();
    let out = &mut out_storage.as_mut_slice()[start..start + step.output.desc.elem_count()];

    match &step.op {
        Op::BinaryOp { operator, .. } => kernels::binary(*operator, operand(0)?, operand(1)?, out)?,
        Op::UnaryOp { operator, .. } => kernels::unary(*operator, operand(0)?, out),
        Op::Reshape { .. } => kernels::copy(view(0)?, out),
        Op::Reduce { axes, operator, .. } => kernels::reduce(*operator, axes, view(0)?, out),
        Op::Dot { reduction_axes, .. } => kernels::dot(*reduction_axes, view(0)?, view(1)?, out),
        Op::OneHot { depth, axis, .. } => kernels::one_hot(*depth, *axis, view(0)?, out)?,
        Op::MaxPool {
            window_shape,
            window_strides,
            ..
        } => kernels::max_pool(
            window_shape.dims(),
            window_strides,
            view(0)?,
            out,
            &step.output.desc,
        ),
        Op::Assign { .. } => {
            if let Operand::View(value) = operand(1)? {
                kernels::copy(value, out)
            }
        }
        Op::Custom { op, .. } => {
            let views = (0..step.inputs.len())
                .map(view)
                .collect::<Result<Vec<_>>>()?;
            op.compute(&views, out, &step.output.desc)?
        }
        Op::Placeholder { .. }
        | Op::Constant { .. }
        | Op::Variable { .. }
        | Op::Broadcast { .. }
        | Op::ReorderAxes { .. } => {
            return Err(Error::Compilation(format!(
                "{} has no compute step",
                step.op.kind()
            )))
        }
    }
    Ok(())
}
