use opgraph_core::{Error, Graph, GraphTensor, Initializer, Tensor, Transformer, TransformerConfig};

macro_rules! test_for_dtype {
    ($t:ty, $name:ident) => {
        mod $name {
            use super::*;

            fn run(outputs: &[&GraphTensor<$t>]) -> Vec<Tensor<$t>> {
                let mut transformer = Transformer::new();
                let computation = transformer.computation(outputs, &[]).unwrap();
                computation.call(&[]).unwrap().into_vec()
            }

            #[test]
            fn zeros_ones_fill() {
                let graph = Graph::<$t>::empty();
                let z = GraphTensor::zeros(&graph, [3, 4]).unwrap();
                let o = GraphTensor::ones(&graph, [3, 4]).unwrap();
                let f = GraphTensor::fill(&graph, [2], 7 as $t).unwrap();
                let out = run(&[&z, &o, &f]);
                assert_eq!(out[0], Tensor::full([3, 4], 0 as $t));
                assert_eq!(out[1], Tensor::full([3, 4], 1 as $t));
                assert_eq!(out[2].data(), &[7 as $t, 7 as $t]);
            }

            #[test]
            fn constant_values() {
                let graph = Graph::<$t>::empty();
                let values = (0..6).map(|v| v as $t).collect::<Vec<_>>();
                let c = GraphTensor::constant(&graph, [2, 3], values.clone()).unwrap();
                let out = run(&[&c]);
                assert_eq!(out[0], Tensor::new([2, 3], values).unwrap());
            }

            #[test]
            fn constant_with_wrong_count_is_rejected() {
                let graph = Graph::<$t>::empty();
                assert!(GraphTensor::constant(&graph, [2, 3], vec![0 as $t; 4]).is_err());
                assert!(graph.is_empty().unwrap());
            }

            #[test]
            fn arange_variable() {
                let graph = Graph::<$t>::empty();
                let v = GraphTensor::variable(
                    &graph,
                    [5],
                    Initializer::Arange {
                        start: 1 as $t,
                        step: 2 as $t,
                    },
                )
                .unwrap();
                let out = run(&[&v]);
                let expected = [1, 3, 5, 7, 9].iter().map(|v| *v as $t).collect::<Vec<_>>();
                assert_eq!(out[0].data(), &expected[..]);
            }

            #[test]
            fn fill_variable_survives_calls() {
                let graph = Graph::<$t>::empty();
                let x = GraphTensor::placeholder(&graph, [3]).unwrap();
                let w = GraphTensor::variable(&graph, [3], Initializer::Fill(3 as $t)).unwrap();
                let y = (&x + &w).unwrap();
                let mut transformer = Transformer::new();
                let computation = transformer.computation(&[&y], &[&x]).unwrap();
                for i in 0..3 {
                    let out = computation
                        .call(&[Tensor::full([3], i as $t)])
                        .unwrap()
                        .one()
                        .unwrap();
                    assert_eq!(out, Tensor::full([3], (i + 3) as $t));
                }
            }
        }
    };
}

test_for_dtype!(f32, f32_tests);
test_for_dtype!(f64, f64_tests);
test_for_dtype!(i32, i32_tests);
test_for_dtype!(i64, i64_tests);
test_for_dtype!(u32, u32_tests);
test_for_dtype!(u8, u8_tests);

#[test]
fn normal_variable_statistics() {
    let graph = Graph::<f64>::empty();
    let v = GraphTensor::variable(
        &graph,
        [4096],
        Initializer::Normal {
            mean: 5.0,
            std: 2.0,
        },
    )
    .unwrap();
    let mut transformer = Transformer::with_config(TransformerConfig::default().with_seed(11));
    let computation = transformer.computation(&[&v], &[]).unwrap();
    let out = computation.call(&[]).unwrap().one().unwrap();
    let n = out.data().len() as f64;
    let mean = out.data().iter().sum::<f64>() / n;
    let var = out.data().iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    assert!((mean - 5.0).abs() < 0.2, "mean {mean}");
    assert!((var.sqrt() - 2.0).abs() < 0.2, "std {}", var.sqrt());
}

#[test]
fn invalid_initializers_are_rejected() {
    let graph = Graph::<f32>::empty();
    assert!(GraphTensor::variable(&graph, [2], Initializer::Uniform { low: 1.0, high: 1.0 }).is_err());
    assert!(
        GraphTensor::variable(&graph, [2], Initializer::Normal { mean: 0.0, std: -1.0 }).is_err()
    );
    for (low, high) in [
        (0.0, f64::INFINITY),
        (f64::NEG_INFINITY, 0.0),
        (f64::MIN, f64::MAX),
        (f64::NAN, 1.0),
    ] {
        let err = GraphTensor::variable(&graph, [2], Initializer::Uniform { low, high }).unwrap_err();
        assert!(matches!(err.inner(), Error::Shape { op: "variable", .. }));
    }
    assert!(graph.is_empty().unwrap());
}

#[test]
fn wide_uniform_range_samples_within_bounds() {
    let graph = Graph::<f64>::empty();
    let range = Initializer::Uniform { low: -1e300, high: 1e300 };
    let v = GraphTensor::variable(&graph, [64], range).unwrap();
    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&v], &[]).unwrap();
    let out = computation.call(&[]).unwrap().one().unwrap();
    assert!(out.data().iter().all(|x| (-1e300..=1e300).contains(x)));
}

#[cfg(feature = "half")]
#[test]
fn half_precision_fill() {
    use half::f16;

    let graph = Graph::<f16>::empty();
    let x = GraphTensor::placeholder(&graph, [2]).unwrap();
    let one = GraphTensor::ones(&graph, [2]).unwrap();
    let y = (&x + &one).unwrap();
    let mut transformer = Transformer::new();
    let computation = transformer.computation(&[&y], &[&x]).unwrap();
    let out = computation
        .call(&[Tensor::full([2], f16::from_f32(1.5))])
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(out.data(), &[f16::from_f32(2.5); 2]);
}
