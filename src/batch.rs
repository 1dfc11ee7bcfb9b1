use crate::error::{Result, TrackError};
use crate::Float;
use ndarray::{arr0, Array, ArrayD, ArrayView, Axis, IxDyn, Zip};

/// Number of entries held by a batch of the given shape. A scalar shape `[]`
/// holds exactly one entry.
pub fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Unify two batch shapes. Shapes are aligned from the right; each pair of
/// dimensions must be equal or one of them must be 1.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let pad_a = rank - a.len();
    let pad_b = rank - b.len();
    let mut out = Vec::with_capacity(rank);
    for ax in 0..rank {
        let da = if ax < pad_a { 1 } else { a[ax - pad_a] };
        let db = if ax < pad_b { 1 } else { b[ax - pad_b] };
        let d = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(TrackError::shape_mismatch(a, b));
        };
        out.push(d);
    }
    Ok(out)
}

/// Fold [`broadcast_shapes`] over any number of shapes.
pub fn broadcast_shape_of(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    shapes
        .iter()
        .try_fold(Vec::new(), |acc, shape| broadcast_shapes(&acc, shape))
}

/// A value per batch sample, held in a dynamic-rank `ndarray` array.
///
/// The array is always in standard (C-contiguous) layout, so the flat slice
/// views below walk the batch in row-major order. Every operation that
/// changes the shape materialises a new array, so two batches never alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Batched<T> {
    data: ArrayD<T>,
}

impl<T> Batched<T> {
    fn wrap(data: ArrayD<T>) -> Self
    where
        T: Clone,
    {
        if data.is_standard_layout() {
            Batched { data }
        } else {
            Batched {
                data: data.as_standard_layout().into_owned(),
            }
        }
    }

    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let len = data.len();
        Array::from_shape_vec(IxDyn(&shape), data)
            .map(|data| Batched { data })
            .map_err(|_| TrackError::shape_mismatch(&shape, &[len]))
    }

    pub fn scalar(value: T) -> Self {
        Batched {
            data: arr0(value).into_dyn(),
        }
    }

    /// Build a rank-2 batch from equally long rows.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|row| row.len() != n_cols) {
            return Err(TrackError::shape_mismatch(&[n_rows, n_cols], &[bad.len()]));
        }
        let data = rows.into_iter().flatten().collect();
        Batched::from_vec(vec![n_rows, n_cols], data)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
            .as_slice()
            .expect("batch is not in standard layout, should never happen")
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
            .as_slice_mut()
            .expect("batch is not in standard layout, should never happen")
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into_raw_vec()
    }

    pub fn map<U, F>(&self, f: F) -> Batched<U>
    where
        F: FnMut(&T) -> U,
    {
        Batched {
            data: self.data.map(f),
        }
    }

    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.data.ndim() {
            return None;
        }
        self.data.get(index)
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        if index.len() != self.data.ndim() {
            return None;
        }
        self.data.get_mut(index)
    }
}

impl<T: Clone> Batched<T> {
    pub fn from_elem(shape: &[usize], value: T) -> Self {
        Batched {
            data: ArrayD::from_elem(IxDyn(shape), value),
        }
    }

    fn view_as(&self, shape: &[usize]) -> Result<ArrayView<'_, T, IxDyn>> {
        self.data
            .broadcast(IxDyn(shape))
            .ok_or_else(|| TrackError::shape_mismatch(self.shape(), shape))
    }

    /// Materialise this batch at `shape`, replicating size-1 and missing
    /// leading dimensions.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        Ok(Batched::wrap(self.view_as(shape)?.to_owned()))
    }

    /// Tile this batch over `extra` new leading dimensions.
    pub fn broadcast(&self, extra: &[usize]) -> Self {
        let mut shape = extra.to_vec();
        shape.extend_from_slice(self.shape());
        let tiled = self
            .data
            .broadcast(IxDyn(&shape))
            .expect("prepending dimensions is always a valid broadcast, should never happen");
        Batched::wrap(tiled.to_owned())
    }

    /// The sub-batch addressed by fixing the leading dimensions to `outer`.
    pub fn subbatch(&self, outer: &[usize]) -> Option<Self> {
        if outer.len() > self.data.ndim() {
            return None;
        }
        let mut view = self.data.view();
        for &i in outer {
            if i >= view.len_of(Axis(0)) {
                return None;
            }
            view = view.index_axis_move(Axis(0), i);
        }
        Some(Batched::wrap(view.to_owned()))
    }

    /// Combine two batches sample by sample after broadcasting them against
    /// each other.
    pub fn zip_map<U, V, F>(&self, other: &Batched<U>, mut f: F) -> Result<Batched<V>>
    where
        U: Clone,
        V: Clone,
        F: FnMut(&T, &U) -> V,
    {
        let shape = broadcast_shapes(self.shape(), other.shape())?;
        let a = self.view_as(&shape)?;
        let b = other.view_as(&shape)?;
        Ok(Batched::wrap(Zip::from(&a).and(&b).map_collect(|x, y| f(x, y))))
    }
}

impl Batched<Float> {
    pub fn zeros(shape: &[usize]) -> Self {
        Batched::from_elem(shape, 0.0)
    }

    pub fn any_nonzero(&self) -> bool {
        self.data.iter().any(|&v| v != 0.0)
    }
}

impl From<Float> for Batched<Float> {
    fn from(value: Float) -> Self {
        Batched::scalar(value)
    }
}

impl From<Vec<Float>> for Batched<Float> {
    fn from(values: Vec<Float>) -> Self {
        Batched {
            data: Array::from(values).into_dyn(),
        }
    }
}
