use candle_core::{bail, Result, Tensor};

/// Indices of the nonzero entries of one adjacency row, ascending.
pub fn neighbors_of(adjacency_row: &Tensor) -> Result<Vec<usize>> {
    Ok(adjacency_row
        .to_vec1()?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, a): (_, f32)| if a != 0.0 { Some(idx) } else { None })
        .collect())
}

/// Copy of `items` with the element at `position` spliced out.
pub fn remove_index<T: Copy>(items: &[T], position: usize) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, &item)| (idx != position).then_some(item))
        .collect()
}

pub(crate) fn check_shape(tensor: &Tensor, dims: &[usize], what: &str) -> Result<()> {
    if tensor.dims() != dims {
        bail!("{what} has shape {:?}, expected {:?}", tensor.dims(), dims);
    }
    Ok(())
}

// w is [m, k], v is [k]; returns w·v as [m].
pub(crate) fn matvec(w: &Tensor, v: &Tensor) -> Result<Tensor> {
    w.matmul(&v.unsqueeze(1)?)?.squeeze(1)
}

// u ⊗ v for vectors [m] and [k]; returns [m, k].
pub(crate) fn outer(u: &Tensor, v: &Tensor) -> Result<Tensor> {
    u.unsqueeze(1)?.matmul(&v.unsqueeze(0)?)
}

// 1 where z > 0, else 0, in z's dtype.
pub(crate) fn relu_mask(z: &Tensor) -> Result<Tensor> {
    z.gt(&z.zeros_like()?)?.to_dtype(z.dtype())
}
