use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use opgraph_core::{
    AllocationPlanner, BackendDevice, BufferSpec, CompiledComputation, ComputationState,
    CpuDevice, CpuStorage, Error, Graph, GraphTensor, Initializer, Result, Tensor, Transformer,
    TransformerConfig,
};

fn compile(
    graph: &Graph<f32>,
    outputs: &[&GraphTensor<f32>],
    parameters: &[&GraphTensor<f32>],
) -> CompiledComputation<f32, CpuDevice<f32>> {
    let outputs = outputs.iter().map(|t| t.id()).collect::<Vec<_>>();
    let parameters = parameters.iter().map(|t| t.id()).collect::<Vec<_>>();
    let roots = outputs.iter().chain(&parameters).copied().collect::<Vec<_>>();
    let order = graph.topological_order(&roots).unwrap();
    let nodes = graph.get_nodes().unwrap();
    let plan = AllocationPlanner::new(true)
        .plan(&nodes, &order, &outputs, &parameters)
        .unwrap();
    CompiledComputation::new(&nodes, plan, 0).unwrap()
}

#[test]
fn state_machine_is_enforced() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [3]).unwrap();
    let y = x.sqrt().unwrap();
    let device = CpuDevice::new();
    let mut computation = compile(&graph, &[&y], &[&x]);
    let input = [Tensor::from(vec![1.0, 4.0, 9.0])];

    assert_eq!(computation.state(), ComputationState::Unallocated);
    let err = computation.compute(&device, &input).unwrap_err();
    assert!(matches!(err.inner(), Error::NotReady(_)));
    let err = computation.init().unwrap_err();
    assert!(matches!(err.inner(), Error::NotReady(_)));

    computation.allocate(&device).unwrap();
    assert_eq!(computation.state(), ComputationState::Allocated);
    let bytes = device.live_bytes();
    assert_eq!(bytes, computation.plan().total_bytes());
    computation.allocate(&device).unwrap();
    assert_eq!(device.live_bytes(), bytes);

    let err = computation.compute(&device, &input).unwrap_err();
    assert!(matches!(err.inner(), Error::NotReady(_)));

    computation.init().unwrap();
    assert_eq!(computation.state(), ComputationState::Initialized);
    let out = computation.compute(&device, &input).unwrap();
    assert_eq!(out[0].data(), &[1.0, 2.0, 3.0]);
    assert_eq!(computation.state(), ComputationState::Ready);
    computation.init().unwrap();
    assert_eq!(computation.state(), ComputationState::Ready);

    computation.release(&device);
    computation.release(&device);
    assert_eq!(computation.state(), ComputationState::Released);
    assert_eq!(device.live_bytes(), 0);

    for err in [
        computation.compute(&device, &input).unwrap_err(),
        computation.init().unwrap_err(),
        computation.allocate(&device).unwrap_err(),
    ] {
        assert!(matches!(err.inner(), Error::Released(_)));
    }
}

#[test]
fn close_releases_every_computation() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [8]).unwrap();
    let a = x.exp().unwrap();
    let b = (&x * &x).unwrap();

    let mut transformer = Transformer::new();
    let ca = transformer.computation(&[&a], &[&x]).unwrap();
    let cb = transformer.computation(&[&b], &[&x]).unwrap();
    let device = transformer.device().clone();
    assert!(device.live_bytes() > 0);

    transformer.close();
    assert_eq!(device.live_bytes(), 0);
    for c in [&ca, &cb] {
        assert_eq!(c.state().unwrap(), ComputationState::Released);
        let err = c.call(&[Tensor::full([8], 1.0)]).unwrap_err();
        assert!(matches!(err.inner(), Error::Released(_)));
    }
    let err = transformer.computation(&[&a], &[&x]).unwrap_err();
    assert!(matches!(err.inner(), Error::Released(_)));
}

#[test]
fn drop_releases_every_computation() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [8]).unwrap();
    let y = x.relu().unwrap();

    let transformer_device;
    let computation;
    {
        let mut transformer = Transformer::new();
        computation = transformer.computation(&[&y], &[&x]).unwrap();
        transformer_device = transformer.device().clone();
        assert!(transformer_device.live_bytes() > 0);
    }
    assert_eq!(transformer_device.live_bytes(), 0);
    assert_eq!(computation.state().unwrap(), ComputationState::Released);
}

#[test]
fn computations_release_independently() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [2]).unwrap();
    let a = (&x + &x).unwrap();
    let b = (&x * &x).unwrap();

    let mut transformer = Transformer::new();
    let ca = transformer.computation(&[&a], &[&x]).unwrap();
    let cb = transformer.computation(&[&b], &[&x]).unwrap();
    ca.release().unwrap();
    ca.release().unwrap();

    let input = [Tensor::from(vec![3.0, 5.0])];
    assert!(matches!(ca.call(&input).unwrap_err().inner(), Error::Released(_)));
    let out = cb.call(&input).unwrap().one().unwrap();
    assert_eq!(out.data(), &[9.0, 25.0]);
}

/// Fails every allocation after the first `budget`.
#[derive(Clone)]
struct FlakyDevice {
    inner: CpuDevice<f32>,
    budget: usize,
    allocs: Arc<AtomicUsize>,
}

impl BackendDevice<f32> for FlakyDevice {
    type Storage = CpuStorage<f32>;

    fn name(&self) -> &str {
        "flaky"
    }

    fn alloc(&self, buffer: &BufferSpec) -> Result<Self::Storage> {
        if self.allocs.fetch_add(1, Ordering::SeqCst) >= self.budget {
            return Err(Error::msg(format!("out of memory for {}", buffer.name)));
        }
        self.inner.alloc(buffer)
    }

    fn free(&self, buffer: &BufferSpec, storage: Self::Storage) {
        self.inner.free(buffer, storage)
    }
}

#[test]
fn failed_allocation_frees_partial_buffers() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [4]).unwrap();
    let y = x.exp().unwrap().log().unwrap();

    let inner = CpuDevice::new();
    let device = FlakyDevice {
        inner: inner.clone(),
        budget: 2,
        allocs: Arc::new(AtomicUsize::new(0)),
    };
    let config = TransformerConfig::default().with_inplace(false);
    let mut transformer = Transformer::with_device(device, config);
    let err = transformer.computation(&[&y], &[&x]).unwrap_err();
    assert!(matches!(err.inner(), Error::Msg(_)));
    assert_eq!(inner.live_bytes(), 0);

    // In place, the chain needs only two buffers and fits the budget.
    let mut transformer = Transformer::with_device(
        FlakyDevice {
            inner: inner.clone(),
            budget: 2,
            allocs: Arc::new(AtomicUsize::new(0)),
        },
        TransformerConfig::default(),
    );
    let computation = transformer.computation(&[&y], &[&x]).unwrap();
    assert_eq!(computation.plan().unwrap().buffers.len(), 2);
    assert!(inner.live_bytes() > 0);
    transformer.close();
    assert_eq!(inner.live_bytes(), 0);
}

#[test]
fn pooled_buffers_are_reused() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [64]).unwrap();
    let y = x.exp().unwrap();

    let mut transformer = Transformer::with_config(TransformerConfig::default().with_pool_buffers(true));
    let first = transformer.computation(&[&y], &[&x]).unwrap();
    first.release().unwrap();
    let second = transformer.computation(&[&y], &[&x]).unwrap();

    let metrics = transformer.device().pool_metrics().unwrap().unwrap();
    assert_eq!(metrics.misses, 2);
    assert_eq!(metrics.hits, 2);
    let out = second.call(&[Tensor::full([64], 0.0)]).unwrap().one().unwrap();
    assert_eq!(out.data(), &[1.0; 64]);
}

#[test]
fn in_place_matches_dedicated_buffers() {
    let build = |graph: &Graph<f32>| {
        let x = GraphTensor::placeholder(graph, [3, 3]).unwrap();
        let a = x.exp().unwrap();
        let t = a.reorder_axes(&[1, 0]).unwrap();
        let s = (&a + &t).unwrap();
        let r = (&s - &a).unwrap().relu().unwrap();
        let total = (&r * &r).unwrap().sum(&[0]).unwrap();
        (x, r, total)
    };
    let input = Tensor::new([3, 3], (0..9).map(|v| v as f32 * 0.25 - 1.0).collect()).unwrap();

    let run = |inplace| {
        let graph = Graph::<f32>::empty();
        let (x, r, total) = build(&graph);
        let config = TransformerConfig::default().with_inplace(inplace);
        let mut transformer = Transformer::with_config(config);
        let computation = transformer.computation(&[&r, &total], &[&x]).unwrap();
        let plan = computation.plan().unwrap();
        (computation.call(&[input.clone()]).unwrap().into_vec(), plan)
    };
    let (aliased, aliased_plan) = run(true);
    let (dedicated, dedicated_plan) = run(false);
    assert!(!aliased_plan.in_place.is_empty());
    assert!(dedicated_plan.in_place.is_empty());
    assert!(aliased_plan.total_bytes() < dedicated_plan.total_bytes());
    assert_eq!(aliased, dedicated);
}

#[test]
fn update_buffer_swaps_storage() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [4]).unwrap();
    let w = GraphTensor::variable(&graph, [4], Initializer::Fill(2.0)).unwrap();
    let y = (&x * &w).unwrap();

    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&y], &[&x]).unwrap();
    let input = [Tensor::from(vec![1.0, 2.0, 3.0, 4.0])];
    let out = computation.call(&input).unwrap().one().unwrap();
    assert_eq!(out.data(), &[2.0, 4.0, 6.0, 8.0]);

    let old = computation
        .update_buffer("variable_1", CpuStorage::new(vec![-1.0; 4]))
        .unwrap();
    assert_eq!(old.into_inner(), vec![2.0; 4]);
    let out = computation.call(&input).unwrap().one().unwrap();
    assert_eq!(out.data(), &[-1.0, -2.0, -3.0, -4.0]);

    let err = computation
        .update_buffer("variable_1", CpuStorage::new(vec![0.0; 2]))
        .unwrap_err();
    assert!(matches!(err.inner(), Error::Allocation { .. }));
    let err = computation
        .update_buffer("nope", CpuStorage::new(vec![0.0; 4]))
        .unwrap_err();
    assert!(matches!(err.inner(), Error::Allocation { .. }));
}

#[test]
fn distinct_computations_run_concurrently() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [16]).unwrap();
    let a = x.exp().unwrap().log().unwrap();
    let b = (&x + &x).unwrap();

    let mut transformer = Transformer::new();
    let ca = transformer.computation(&[&a], &[&x]).unwrap();
    let cb = transformer.computation(&[&b], &[&x]).unwrap();

    std::thread::scope(|s| {
        let ha = s.spawn(|| {
            (0..20)
                .map(|i| ca.call(&[Tensor::full([16], i as f32)]).unwrap().one().unwrap())
                .last()
        });
        let hb = s.spawn(|| {
            (0..20)
                .map(|i| cb.call(&[Tensor::full([16], i as f32)]).unwrap().one().unwrap())
                .last()
        });
        let a = ha.join().unwrap().unwrap();
        let b = hb.join().unwrap().unwrap();
        assert!(a.data().iter().all(|v| (v - 19.0).abs() < 1e-3));
        assert_eq!(b.data(), &[38.0; 16]);
    });
}
