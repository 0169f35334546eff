extern crate itertools;
extern crate prelude;

use itertools::Itertools;
use std::mem;
use std::ops::{Add, Neg};

use prelude::*;

/// A sparse matrix under construction, stored as a list of `(row, column, value)` triplets.
///
/// Duplicate coordinates are allowed and are summed when the matrix is built.
#[derive(Clone, Debug)]
pub struct Builder {
    coords: Vec<(usize, usize, float)>,
    nrows: usize,
    ncols: usize,
}

impl Builder {
    pub fn with_capacity(nrows: usize, ncols: usize, nnz: usize) -> Builder {
        Builder {
            coords: Vec::with_capacity(nnz),
            nrows,
            ncols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn build_csc(&mut self) -> CscMatrix {
        // Sort and sum any duplicates in the same cell
        let mut coords = mem::replace(&mut self.coords, Vec::new());
        coords.sort_unstable_by_key(|&(r, c, _)| (c, r));
        self.coords = coords
            .into_iter()
            .coalesce(|l, r| {
                if l.0 == r.0 && l.1 == r.1 {
                    Ok((l.0, l.1, l.2 + r.2))
                } else {
                    Err((l, r))
                }
            })
            .collect();

        let nnz = self.coords.len();
        let mut indptr = vec![0; self.ncols + 1];
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);

        // Column pointers, written as each column is first seen
        let mut last_c = 0;
        for (i, &(r, c, val)) in self.coords.iter().enumerate() {
            while last_c < c {
                last_c += 1;
                indptr[last_c] = i;
            }
            indices.push(r);
            data.push(val);
        }
        while last_c < self.ncols {
            last_c += 1;
            indptr[last_c] = nnz;
        }

        CscMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data,
        }
    }
}

impl AsRef<Builder> for Builder {
    fn as_ref(&self) -> &Builder {
        self
    }
}

impl Add for Builder {
    type Output = Builder;

    fn add(self, other: Builder) -> Builder {
        add(&[self, other])
    }
}

impl<'a, 'b> Add<&'b Builder> for &'a Builder {
    type Output = Builder;

    fn add(self, other: &'b Builder) -> Builder {
        add(&[self, other])
    }
}

impl Neg for Builder {
    type Output = Builder;

    fn neg(mut self) -> Builder {
        for &mut (_, _, ref mut val) in &mut self.coords {
            *val = -*val;
        }
        self
    }
}

impl<'a> Neg for &'a Builder {
    type Output = Builder;

    fn neg(self) -> Builder {
        -self.clone()
    }
}

pub fn zeros(nrows: usize, ncols: usize) -> Builder {
    Builder::with_capacity(nrows, ncols, 0)
}

pub fn eye(n: usize) -> Builder {
    let mut builder = Builder::with_capacity(n, n, n);
    for i in 0..n {
        builder.coords.push((i, i, 1.0));
    }
    builder
}

/// Square diagonal matrix. Zero entries are left out of the sparsity pattern.
pub fn diag(vals: &[float]) -> Builder {
    let n = vals.len();
    let coords = vals
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v != 0.0)
        .map(|(i, &v)| (i, i, v))
        .collect();

    Builder {
        coords,
        nrows: n,
        ncols: n,
    }
}

/// Sparse copy of a dense block. Exact zeros are skipped.
pub fn block(block: &Matrix) -> Builder {
    let (nrows, ncols) = block.shape();

    let coords = (0..nrows)
        .flat_map(move |r| (0..ncols).map(move |c| (r, c, block[(r, c)])))
        .filter(|&(_, _, val)| val != 0.0)
        .collect();

    Builder {
        coords,
        nrows,
        ncols,
    }
}

pub fn add<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "matrices being added must have the same number of rows"
        );
        assert_eq!(
            *ncols, block.ncols,
            "matrices being added must have the same number of columns"
        );
        block_merge(acc, block, 0, 0);
    }

    let (nrows, ncols) = blocks
        .get(0)
        .map(AsRef::as_ref)
        .map(Builder::shape)
        .unwrap_or((0, 0));
    merge_op(blocks, nrows, ncols, op)
}

pub fn hstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "hstack requires matrices to have the same number of rows"
        );
        block_merge(acc, block, 0, *ncols);
        *ncols += block.ncols;
    }

    let nrows = blocks.get(0).map(|b| b.as_ref().nrows).unwrap_or(0);
    merge_op(blocks, nrows, 0, op)
}

pub fn vstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *ncols, block.ncols,
            "vstack requires matrices to have the same number of columns"
        );
        block_merge(acc, block, *nrows, 0);
        *nrows += block.nrows;
    }

    let ncols = blocks.get(0).map(|b| b.as_ref().ncols).unwrap_or(0);
    merge_op(blocks, 0, ncols, op)
}

pub fn block_diag<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        block_merge(acc, block, *nrows, *ncols);
        *nrows += block.nrows;
        *ncols += block.ncols;
    }

    merge_op(blocks, 0, 0, op)
}

fn merge_op<B: AsRef<Builder>>(
    blocks: &[B],
    nrows: usize,
    ncols: usize,
    op: fn(&mut Builder, &mut usize, &mut usize, &Builder),
) -> Builder {
    let nnz = blocks.iter().map(|b| b.as_ref().coords.len()).sum();
    let acc = Builder::with_capacity(0, 0, nnz);

    let (mut acc, final_nrows, final_ncols) = blocks.iter().map(AsRef::as_ref).fold(
        (acc, nrows, ncols),
        |(mut acc, mut nrows, mut ncols), block| {
            op(&mut acc, &mut nrows, &mut ncols, block);
            (acc, nrows, ncols)
        },
    );

    acc.nrows = final_nrows;
    acc.ncols = final_ncols;
    acc
}

fn block_merge(left: &mut Builder, right: &Builder, row_shift: usize, col_shift: usize) {
    let left_coords_len = left.coords.len();
    left.coords.extend_from_slice(&right.coords);

    for &mut (ref mut r, ref mut c, _) in &mut left.coords[left_coords_len..] {
        *r += row_shift;
        *c += col_shift;
    }
}

/// Compressed sparse column matrix with sorted row indices and no duplicate entries.
#[derive(Clone, Debug, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<float>,
}

impl CscMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[float] {
        &self.data
    }

    /// Stored entries as `(row, column, value)` in column-major order.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, usize, float)> + 'a {
        (0..self.ncols).flat_map(move |c| {
            (self.indptr[c]..self.indptr[c + 1]).map(move |i| (self.indices[i], c, self.data[i]))
        })
    }

    pub fn mul_vec(&self, x: &[float]) -> Vector {
        assert_eq!(self.ncols, x.len(), "vector length must match column count");
        let mut y = Vector::zeros(self.nrows);
        for (r, c, val) in self.iter() {
            y[r] += val * x[c];
        }
        y
    }

    pub fn to_dense(&self) -> Matrix {
        let mut mat = Matrix::zeros(self.nrows, self.ncols);
        for (r, c, val) in self.iter() {
            mat[(r, c)] = val;
        }
        mat
    }
}
