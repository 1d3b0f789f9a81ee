use criterion::{criterion_group, criterion_main, Criterion};
use opgraph_core::{Graph, GraphTensor, Initializer, Tensor, Transformer, TransformerConfig};

fn bench_matmul(c: &mut Criterion, n: usize) {
    let graph = Graph::<f32>::empty();
    let a = GraphTensor::placeholder(&graph, [n, n]).unwrap();
    let b = GraphTensor::variable(&graph, [n, n], Initializer::Uniform { low: 0.0, high: 1.0 })
        .unwrap();
    let out = a.matmul(&b).unwrap();

    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&out], &[&a]).unwrap();
    let input = [Tensor::full([n, n], 0.5)];
    c.bench_function(&format!("cpu_graph_matmul_{n}x{n}"), |bencher| {
        bencher.iter(|| computation.call(&input).unwrap());
    });
}

fn bench_cpu_graph_matmul_64(c: &mut Criterion) {
    bench_matmul(c, 64);
}

fn bench_cpu_graph_matmul_128(c: &mut Criterion) {
    bench_matmul(c, 128);
}

/// A long elementwise chain, with and without in-place aliasing.
fn bench_elementwise_chain(c: &mut Criterion) {
    const N: usize = 1 << 16;
    for inplace in [true, false] {
        let graph = Graph::<f32>::empty();
        let x = GraphTensor::placeholder(&graph, [N]).unwrap();
        let mut y = x.clone();
        for _ in 0..8 {
            y = (&y.exp().unwrap().relu().unwrap() + &x).unwrap();
        }

        let config = TransformerConfig::default().with_inplace(inplace);
        let mut transformer = Transformer::with_config(config);
        let computation = transformer.computation(&[&y], &[&x]).unwrap();
        let input = [Tensor::full([N], 0.01)];
        c.bench_function(&format!("cpu_graph_chain_inplace_{inplace}"), |bencher| {
            bencher.iter(|| computation.call(&input).unwrap());
        });
    }
}

criterion_group!(
    benches,
    bench_cpu_graph_matmul_64,
    bench_cpu_graph_matmul_128,
    bench_elementwise_chain
);
criterion_main!(benches);
