#![allow(non_snake_case)]

use prelude::*;

// Algorithm from: Higham, Nicholas J. The Scaling and Squaring Method for the Matrix Exponential
// Revisited.
// Based on MatrixBase::exp() from Eigen unsupported.
/// Matrix exponential of a square matrix. Returns `None` if `A` has a non-finite entry or norm,
/// or if the Padé denominator is singular.
pub fn expm(A: &Matrix) -> Option<Matrix> {
    assert!(A.is_square(), "matrix exponential requires a square matrix");
    if first_non_finite(A.iter()).is_some() {
        return None;
    }

    let (U, V, num_squarings) = compute_uv(A)?;

    // Pade approximant is (U+V) / (-U+V)
    let numer = &U + &V;
    let denom = V - U;
    let mut result = denom.lu().solve(&numer)?;

    for _ in 0..num_squarings {
        // undo scaling by repeated squaring
        result = &result * &result;
    }
    Some(result)
}

fn compute_uv(A: &Matrix) -> Option<(Matrix, Matrix, u32)> {
    let l1_norm = A
        .column_iter()
        .map(|col| col.iter().map(|v| v.abs()).sum::<float>())
        .fold(0.0, max);
    // No finite squaring count exists for an infinite norm
    if !l1_norm.is_finite() {
        return None;
    }

    let uv = if l1_norm < 1.495585217958292e-2 {
        let (U, V) = pade(A, &PADE3);
        (U, V, 0)
    } else if l1_norm < 2.539398330063230e-1 {
        let (U, V) = pade(A, &PADE5);
        (U, V, 0)
    } else if l1_norm < 9.504178996162932e-1 {
        let (U, V) = pade(A, &PADE7);
        (U, V, 0)
    } else if l1_norm < 2.097847961257068 {
        let (U, V) = pade(A, &PADE9);
        (U, V, 0)
    } else {
        const MAX_NORM: float = 5.371920351148152;
        let num_squarings = max((l1_norm / MAX_NORM).log2().ceil() as i32, 0);
        let A = A * 2f64.powi(-num_squarings);
        let (U, V) = pade13(&A);
        (U, V, num_squarings as u32)
    };
    Some(uv)
}

const PADE3: [float; 4] = [120.0, 60.0, 12.0, 1.0];
const PADE5: [float; 6] = [30240.0, 15120.0, 3360.0, 420.0, 30.0, 1.0];
const PADE7: [float; 8] = [
    17297280.0, 8648640.0, 1995840.0, 277200.0, 25200.0, 1512.0, 56.0, 1.0,
];
const PADE9: [float; 10] = [
    17643225600.0,
    8821612800.0,
    2075673600.0,
    302702400.0,
    30270240.0,
    2162160.0,
    110880.0,
    3960.0,
    90.0,
    1.0,
];

/// Low order approximants: odd coefficients build `U`, even coefficients build `V`, both as
/// polynomials in `A²`.
fn pade(A: &Matrix, b: &[float]) -> (Matrix, Matrix) {
    let n = A.nrows();
    let A2 = A * A;

    let mut power = Matrix::identity(n, n);
    let mut odd = Matrix::zeros(n, n);
    let mut V = Matrix::zeros(n, n);
    for pair in b.chunks(2) {
        V += pair[0] * &power;
        odd += pair[1] * &power;
        power = &power * &A2;
    }
    (A * odd, V)
}

fn pade13(A: &Matrix) -> (Matrix, Matrix) {
    const B: [float; 14] = [
        64764752532480000.0,
        32382376266240000.0,
        7771770303897600.0,
        1187353796428800.0,
        129060195264000.0,
        10559470521600.0,
        670442572800.0,
        33522128640.0,
        1323241920.0,
        40840800.0,
        960960.0,
        16380.0,
        182.0,
        1.0,
    ];
    let n = A.nrows();
    let I = Matrix::identity(n, n);

    let A2 = A * A;
    let A4 = &A2 * &A2;
    let A6 = &A4 * &A2;

    let high = B[13] * &A6 + B[11] * &A4 + B[9] * &A2;
    let odd = &A6 * high + B[7] * &A6 + B[5] * &A4 + B[3] * &A2 + B[1] * &I;
    let U = A * odd;

    let high = B[12] * &A6 + B[10] * &A4 + B[8] * &A2;
    let V = &A6 * high + B[6] * A6 + B[4] * A4 + B[2] * A2 + B[0] * I;
    (U, V)
}
