use opgraph_core::{DType, Graph, GraphTensor, Tensor, Transformer};
use std::time::Instant;

fn bench<T: DType>(type_name: &str, m: usize, k: usize, n: usize) {
    // Number of times to run the matmul for averaging
    let iterations = 10;
    let mut total = std::time::Duration::new(0, 0);

    let graph = Graph::<T>::empty();
    let a = GraphTensor::placeholder(&graph, [m, k]).unwrap();
    // A transposed view feeds the contraction without a copy.
    let b = GraphTensor::fill(&graph, [n, k], T::from_f64(2.))
        .unwrap()
        .reorder_axes(&[1, 0])
        .unwrap();
    let o = GraphTensor::fill(&graph, [m, n], T::from_f64(3.)).unwrap();
    let c = (&a.matmul(&b).unwrap() + &o).unwrap();

    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&c], &[&a]).unwrap();
    let input = [Tensor::full([m, k], T::from_f64(1.))];

    for _ in 0..iterations {
        let start = Instant::now();

        let tensor = std::hint::black_box(computation.call(&input).unwrap());
        let _ = tensor;

        total += start.elapsed();
    }

    let avg = total / (iterations as u32);
    println!("Average execution time for {type_name} over {iterations} iterations: {avg:?}");
}

fn main() {
    bench::<f32>("f32", 64, 64, 64);
    bench::<i32>("i32", 64, 64, 64);
}
