//! Host reference kernels.
//!
//! Inputs are read through their view descriptors so strided and broadcast
//! views need no materialization. Outputs are always contiguous slices that
//! cover exactly the output view. None of the kernels allocate per element.

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use rayon::prelude::*;

use crate::{
    op::{BinaryOpType, Initializer, ReduceOpType, UnaryOpType, ViewRef},
    shape::{contiguous_strides, TensorDescriptor},
    DType, Error, Result,
};

/// Where a kernel reads one of its inputs from.
#[derive(Clone, Copy)]
pub(crate) enum Operand<'a, T: DType> {
    /// The input lives in the output slice itself, index-aligned.
    Aliased,
    View(ViewRef<'a, T>),
}

/// Fails when an element has no result, leaving `out` partially written.
pub(crate) fn binary<T: DType>(
    operator: BinaryOpType,
    lhs: Operand<'_, T>,
    rhs: Operand<'_, T>,
    out: &mut [T],
) -> Result<()> {
    let f = operator.as_closure::<T>();
    let out = out.par_iter_mut().enumerate();
    let written = match (lhs, rhs) {
        (Operand::Aliased, Operand::Aliased) => out.try_for_each(|(_, x)| {
            *x = f(*x, *x)?;
            Some(())
        }),
        (Operand::Aliased, Operand::View(r)) => out.try_for_each(|(i, x)| {
            *x = f(*x, r.get(i))?;
            Some(())
        }),
        (Operand::View(l), Operand::Aliased) => out.try_for_each(|(i, x)| {
            *x = f(l.get(i), *x)?;
            Some(())
        }),
        (Operand::View(l), Operand::View(r)) => out.try_for_each(|(i, x)| {
            *x = f(l.get(i), r.get(i))?;
            Some(())
        }),
    };
    written.ok_or_else(|| {
        Error::Msg(format!(
            "{} of {} has no result (division by zero or overflow)",
            operator.name(),
            T::NAME
        ))
        .bt()
    })
}

pub(crate) fn unary<T: DType>(operator: UnaryOpType, v: Operand<'_, T>, out: &mut [T]) {
    let f = operator.to_closure::<T>();
    match v {
        Operand::Aliased => out.par_iter_mut().for_each(|x| *x = f(*x)),
        Operand::View(v) => out
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = f(v.get(i))),
    }
}

/// Materialize a strided view in row-major order.
pub(crate) fn copy<T: DType>(src: ViewRef<'_, T>, out: &mut [T]) {
    if src.desc.is_contiguous() {
        let start = src.desc.elem_offset();
        out.copy_from_slice(&src.data[start..start + out.len()]);
    } else {
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = src.get(i));
    }
}

/// Row-major coordinates of `linear` in a tensor with `dims`.
fn unravel(mut linear: usize, dims: &[usize], coords: &mut [usize]) {
    for (c, d) in coords.iter_mut().zip(dims).rev() {
        *c = linear % d;
        linear /= d;
    }
}

pub(crate) fn reduce<T: DType>(
    operator: ReduceOpType,
    axes: &[usize],
    src: ViewRef<'_, T>,
    out: &mut [T],
) {
    let f = operator.as_closure::<T>();
    out.fill(operator.identity());

    let dims = src.desc.shape.dims();
    let kept = (0..dims.len())
        .filter(|a| !axes.contains(a))
        .collect::<Vec<_>>();
    let kept_dims = kept.iter().map(|&a| dims[a]).collect::<Vec<_>>();
    let out_strides = contiguous_strides(&kept_dims);
    let mut coords = vec![0; dims.len()];

    for i in 0..src.len() {
        unravel(i, dims, &mut coords);
        let o: usize = kept
            .iter()
            .zip(&out_strides)
            .map(|(&a, s)| coords[a] * s)
            .sum();
        out[o] = f(out[o], src.get(i));
    }
}

/// Generalized matrix product: `out[m, n] = sum_k lhs[m, k] * rhs[k, n]`
/// with the contracted axes flattened into `k`.
pub(crate) fn dot<T: DType>(
    reduction_axes: usize,
    lhs: ViewRef<'_, T>,
    rhs: ViewRef<'_, T>,
    out: &mut [T],
) {
    let l_dims = lhs.desc.shape.dims();
    let r_dims = rhs.desc.shape.dims();
    let k: usize = l_dims[l_dims.len() - reduction_axes..].iter().product();
    let n: usize = r_dims[reduction_axes..].iter().product();

    out.par_chunks_mut(n).enumerate().for_each(|(m, row)| {
        for (j, x) in row.iter_mut().enumerate() {
            let mut acc = T::ZERO;
            for p in 0..k {
                acc = acc.elem_add(lhs.get(m * k + p).elem_mul(rhs.get(p * n + j)));
            }
            *x = acc;
        }
    });
}

pub(crate) fn one_hot<T: DType>(
    depth: usize,
    axis: usize,
    src: ViewRef<'_, T>,
    out: &mut [T],
) -> Result<()> {
    out.fill(T::ZERO);
    let inner: usize = src.desc.shape.dims()[axis..].iter().product();
    for i in 0..src.len() {
        let v = src.get(i).to_f64();
        if v.fract() != 0.0 || v < 0.0 || v >= depth as f64 {
            return Err(Error::Msg(format!(
                "one_hot value {v} is not a category below depth {depth}"
            ))
            .bt());
        }
        let (outer, rest) = (i / inner, i % inner);
        out[(outer * depth + v as usize) * inner + rest] = T::ONE;
    }
    Ok(())
}

pub(crate) fn max_pool<T: DType>(
    window_shape: &[usize],
    window_strides: &[usize],
    src: ViewRef<'_, T>,
    out: &mut [T],
    out_desc: &TensorDescriptor,
) {
    let in_dims = src.desc.shape.dims();
    let in_strides = contiguous_strides(in_dims);
    let out_dims = out_desc.shape.dims();
    let window_len: usize = window_shape.iter().product();
    let mut oc = vec![0; out_dims.len()];
    let mut wc = vec![0; window_shape.len()];

    for (o, x) in out.iter_mut().enumerate() {
        unravel(o, out_dims, &mut oc);
        let base = oc[0] * in_strides[0] + oc[1] * in_strides[1];
        let mut acc = T::LOWEST;
        for w in 0..window_len {
            unravel(w, window_shape, &mut wc);
            let linear = base
                + wc
                    .iter()
                    .enumerate()
                    .map(|(s, c)| (oc[s + 2] * window_strides[s] + c) * in_strides[s + 2])
                    .sum::<usize>();
            let v = src.get(linear);
            if v > acc {
                acc = v;
            }
        }
        *x = acc;
    }
}

/// Copy a literal, splatting a single value over the whole buffer.
pub(crate) fn constant<T: DType>(values: &[T], out: &mut [T]) {
    match values {
        [v] => out.fill(*v),
        _ => out.copy_from_slice(values),
    }
}

pub(crate) fn initialize<T: DType>(init: &Initializer<T>, seed: u64, out: &mut [T]) -> Result<()> {
    match init {
        Initializer::Fill(v) => out.fill(*v),
        Initializer::Arange { start, step } => {
            let (start, step) = (start.to_f64(), step.to_f64());
            out.iter_mut()
                .enumerate()
                .for_each(|(i, x)| *x = T::from_f64(start + i as f64 * step));
        }
        Initializer::Uniform { low, high } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let uniform = Uniform::new(*low, *high).map_err(Error::wrap)?;
            out.iter_mut()
                .for_each(|x| *x = T::from_f64(uniform.sample(&mut rng)));
        }
        Initializer::Normal { mean, std } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let normal = Normal::new(*mean, *std).map_err(Error::wrap)?;
            out.iter_mut()
                .for_each(|x| *x = T::from_f64(normal.sample(&mut rng)));
        }
    }
    Ok(())
}
