use opgraph_core::{Graph, GraphTensor, Tensor, Transformer};

fn main() {
    let graph = Graph::<f32>::empty();
    let x = GraphTensor::placeholder(&graph, [3, 4]).unwrap();
    let a = GraphTensor::fill(&graph, [3, 4], 2.0).unwrap();
    let b = GraphTensor::fill(&graph, [3, 4], 3.0).unwrap();
    let res = ((&x * &a).unwrap() + b).unwrap();
    let res = res.relu().unwrap();

    println!("{}", graph.to_dot().unwrap());

    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&res], &[&x]).unwrap();
    println!("{}", computation.generated_source().unwrap());

    let out = computation
        .call(&[Tensor::full([3, 4], 3.0)])
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(out.data(), &[9.0; 12]);

    transformer.close();
}
