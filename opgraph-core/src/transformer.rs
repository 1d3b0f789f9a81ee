use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    computation::{CompiledComputation, ComputationState},
    cpu_storage::CpuDevice,
    planner::{AllocationPlan, AllocationPlanner},
    storage::BackendDevice,
    DType, Error, GraphTensor, Result, Tensor,
};

/// Compilation settings shared by every computation of a [`Transformer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerConfig {
    /// Let elementwise nodes overwrite dead intermediate inputs.
    pub inplace: bool,
    /// Recycle released buffers through a pool. Only used by [`Transformer::with_config`].
    pub pool_buffers: bool,
    /// Seed of the variable initializers.
    pub seed: u64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            inplace: true,
            pool_buffers: false,
            seed: 0,
        }
    }
}

impl TransformerConfig {
    pub fn with_inplace(mut self, inplace: bool) -> Self {
        self.inplace = inplace;
        self
    }

    pub fn with_pool_buffers(mut self, pool_buffers: bool) -> Self {
        self.pool_buffers = pool_buffers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Values returned by [`Computation::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outputs<T: DType> {
    One(Tensor<T>),
    Many(Vec<Tensor<T>>),
}

impl<T: DType> Outputs<T> {
    pub fn into_vec(self) -> Vec<Tensor<T>> {
        match self {
            Self::One(t) => vec![t],
            Self::Many(ts) => ts,
        }
    }

    /// The single output of a one-output computation.
    pub fn one(self) -> Result<Tensor<T>> {
        match self {
            Self::One(t) => Ok(t),
            Self::Many(ts) => crate::bail!("expected a single output, got {}", ts.len()),
        }
    }
}

fn lock<T: DType, D: BackendDevice<T>>(
    inner: &Mutex<CompiledComputation<T, D>>,
) -> Result<MutexGuard<'_, CompiledComputation<T, D>>> {
    Ok(inner.lock()?)
}

/// A callable handle to a compiled computation.
///
/// Clones share the computation; calls through any of them are serialized.
#[derive(Clone)]
pub struct Computation<T: DType, D: BackendDevice<T> = CpuDevice<T>> {
    inner: Arc<Mutex<CompiledComputation<T, D>>>,
    device: D,
}

impl<T: DType, D: BackendDevice<T>> std::fmt::Debug for Computation<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation").finish_non_exhaustive()
    }
}

impl<T: DType, D: BackendDevice<T>> Computation<T, D> {
    /// Run on one tensor per parameter, in the order the parameters were bound.
    pub fn call(&self, inputs: &[Tensor<T>]) -> Result<Outputs<T>> {
        let outputs = lock(&self.inner)?.compute(&self.device, inputs)?;
        match <[Tensor<T>; 1]>::try_from(outputs) {
            Ok([out]) => Ok(Outputs::One(out)),
            Err(outputs) => Ok(Outputs::Many(outputs)),
        }
    }

    /// Free the buffers of this computation. Idempotent.
    pub fn release(&self) -> Result<()> {
        lock(&self.inner)?.release(&self.device);
        Ok(())
    }

    pub fn state(&self) -> Result<ComputationState> {
        Ok(lock(&self.inner)?.state())
    }

    pub fn generated_source(&self) -> Result<String> {
        Ok(lock(&self.inner)?.generated_source().to_string())
    }

    pub fn plan(&self) -> Result<AllocationPlan> {
        Ok(lock(&self.inner)?.plan().clone())
    }

    /// See [`CompiledComputation::update_buffer`].
    pub fn update_buffer(&self, name: &str, storage: D::Storage) -> Result<D::Storage> {
        lock(&self.inner)?.update_buffer(name, storage)
    }
}

/// Compiles graph slices into computations bound to one device.
///
/// Every computation stays owned by the transformer until [`Transformer::close`]
/// (or drop) releases it.
pub struct Transformer<T: DType, D: BackendDevice<T> = CpuDevice<T>> {
    device: D,
    config: TransformerConfig,
    computations: Vec<Arc<Mutex<CompiledComputation<T, D>>>>,
    closed: bool,
}

impl<T: DType> Transformer<T, CpuDevice<T>> {
    pub fn new() -> Self {
        Self::with_config(TransformerConfig::default())
    }

    pub fn with_config(config: TransformerConfig) -> Self {
        let device = if config.pool_buffers {
            CpuDevice::pooled()
        } else {
            CpuDevice::new()
        };
        Self::with_device(device, config)
    }
}

impl<T: DType> Default for Transformer<T, CpuDevice<T>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DType, D: BackendDevice<T>> Transformer<T, D> {
    pub fn with_device(device: D, config: TransformerConfig) -> Self {
        Self {
            device,
            config,
            computations: Vec::new(),
            closed: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Compile, allocate and initialize a computation of `outputs`.
    ///
    /// `parameters` must be placeholders; they become the arguments of
    /// [`Computation::call`] in this order. Every placeholder `outputs` depend
    /// on must be bound. A failure leaves the other computations untouched.
    pub fn computation(
        &mut self,
        outputs: &[&GraphTensor<T>],
        parameters: &[&GraphTensor<T>],
    ) -> Result<Computation<T, D>> {
        if self.closed {
            return Err(Error::Released("transformer"));
        }
        let Some(first) = outputs.first() else {
            return Err(Error::Compilation("no outputs requested".to_string()));
        };
        let graph = first.graph();
        if outputs
            .iter()
            .chain(parameters)
            .any(|t| !t.graph().same_graph(graph))
        {
            return Err(Error::Compilation(
                "outputs and parameters belong to different graphs".to_string(),
            ));
        }

        let output_ids = outputs.iter().map(|t| t.id()).collect::<Vec<_>>();
        let parameter_ids = parameters.iter().map(|t| t.id()).collect::<Vec<_>>();
        let roots = output_ids
            .iter()
            .chain(&parameter_ids)
            .copied()
            .collect::<Vec<_>>();
        let order = graph.topological_order(&roots)?;

        let mut computation = {
            let nodes = graph.get_nodes()?;
            let plan = AllocationPlanner::new(self.config.inplace).plan(
                &nodes,
                &order,
                &output_ids,
                &parameter_ids,
            )?;
            CompiledComputation::new(&nodes, plan, self.config.seed)?
        };

        computation.allocate(&self.device)?;
        if let Err(e) = computation.init() {
            computation.release(&self.device);
            return Err(e);
        }
        tracing::info!(
            "compiled computation with {} steps over {} buffers ({} bytes)",
            computation.steps().len(),
            computation.plan().buffers.len(),
            computation.plan().total_bytes()
        );

        let inner = Arc::new(Mutex::new(computation));
        self.computations.push(inner.clone());
        Ok(Computation {
            inner,
            device: self.device.clone(),
        })
    }

    /// Release every computation. Later calls to [`Transformer::computation`]
    /// fail with [`Error::Released`].
    pub fn close(&mut self) {
        for computation in self.computations.drain(..) {
            let mut computation = match computation.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            computation.release(&self.device);
        }
        self.closed = true;
        tracing::debug!("transformer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T: DType, D: BackendDevice<T>> Drop for Transformer<T, D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let live = self
            .computations
            .iter()
            .filter(|c| {
                c.lock()
                    .map(|c| c.state() != ComputationState::Released)
                    .unwrap_or(true)
            })
            .count();
        if live > 0 {
            tracing::warn!("transformer dropped without close, releasing {live} computations");
        }
        self.close();
    }
}
