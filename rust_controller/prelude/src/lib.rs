pub extern crate flame;
pub extern crate nalgebra;

#[allow(non_camel_case_types)]
pub type float = f64;
pub use std::f64::{INFINITY, NAN, NEG_INFINITY};

pub type Matrix = nalgebra::DMatrix<float>;
pub type Vector = nalgebra::DVector<float>;

pub fn max<T: Copy + PartialOrd>(a: T, b: T) -> T {
    *nalgebra::partial_max(&a, &b).expect("NaN")
}

/// Returns the index and value of the first entry that is NaN or infinite.
pub fn first_non_finite<'a, I: IntoIterator<Item = &'a float>>(values: I) -> Option<(usize, float)> {
    values
        .into_iter()
        .cloned()
        .enumerate()
        .find(|&(_, v)| !v.is_finite())
}

/// Returns the index of the first NaN entry. Infinities are allowed.
pub fn first_nan<'a, I: IntoIterator<Item = &'a float>>(values: I) -> Option<usize> {
    values.into_iter().position(|v| v.is_nan())
}

/// Builds a dense matrix from row-major nested rows. Returns `None` if the rows are ragged.
pub fn matrix_from_rows(rows: &[Vec<float>]) -> Option<Matrix> {
    let nrows = rows.len();
    let ncols = rows.get(0).map(Vec::len).unwrap_or(0);
    if rows.iter().any(|r| r.len() != ncols) {
        return None;
    }
    let data: Vec<float> = rows.iter().flat_map(|r| r.iter().cloned()).collect();
    Some(Matrix::from_row_slice(nrows, ncols, &data))
}
