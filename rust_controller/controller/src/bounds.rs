use thiserror::Error;

use prelude::*;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StateError {
    #[error("state has {found} entries, expected {expected}")]
    Dimension { expected: usize, found: usize },
    #[error("state entry {index} is not finite ({value})")]
    NonFinite { index: usize, value: float },
    #[error("bound vectors have {lower} and {upper} rows, need at least {needed} each")]
    BoundsTooShort {
        lower: usize,
        upper: usize,
        needed: usize,
    },
}

/// Writes `-x` into the initial state equality rows `l[0..nx]` and `u[0..nx]`.
///
/// No other entry of `l` or `u` is touched, so the solver can keep its factorisation between
/// calls.
pub fn update_initial_state(
    nx: usize,
    l: &mut Vector,
    u: &mut Vector,
    x: &Vector,
) -> Result<(), StateError> {
    if x.len() != nx {
        return Err(StateError::Dimension {
            expected: nx,
            found: x.len(),
        });
    }
    if let Some((index, value)) = first_non_finite(x.iter()) {
        return Err(StateError::NonFinite { index, value });
    }
    if l.len() < nx || u.len() < nx {
        return Err(StateError::BoundsTooShort {
            lower: l.len(),
            upper: u.len(),
            needed: nx,
        });
    }

    for (i, &x_i) in x.iter().enumerate() {
        l[i] = -x_i;
        u[i] = -x_i;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(vals: &[float]) -> Vector {
        Vector::from_column_slice(vals)
    }

    #[test]
    fn only_initial_rows_change() {
        // nx = 2, N = 1, nu = 1 gives 2 * 2 * 2 + 1 rows
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let l0 = vector(&[
            -1.0, 0.0, 0.0, 0.0,
            NEG_INFINITY, -2.0, NEG_INFINITY, -2.0, -0.25,
        ]);
        let u0 = l0.map(|v| if v.is_infinite() { INFINITY } else { -v });
        let (mut l, mut u) = (l0.clone(), u0.clone());

        update_initial_state(2, &mut l, &mut u, &vector(&[3.0, -1.0])).unwrap();

        assert_eq!(&[-3.0, 1.0], &l.as_slice()[..2]);
        assert_eq!(&[-3.0, 1.0], &u.as_slice()[..2]);
        for i in 2..l.len() {
            assert_eq!(l0[i].to_bits(), l[i].to_bits());
            assert_eq!(u0[i].to_bits(), u[i].to_bits());
        }

        update_initial_state(2, &mut l, &mut u, &vector(&[0.5, 7.0])).unwrap();

        assert_eq!(&[-0.5, -7.0], &l.as_slice()[..2]);
        assert_eq!(&[-0.5, -7.0], &u.as_slice()[..2]);
        assert_eq!(&l0.as_slice()[2..], &l.as_slice()[2..]);
        assert_eq!(&u0.as_slice()[2..], &u.as_slice()[2..]);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut l = Vector::zeros(6);
        let mut u = Vector::zeros(6);
        assert_eq!(
            Err(StateError::Dimension {
                expected: 2,
                found: 3,
            }),
            update_initial_state(2, &mut l, &mut u, &vector(&[1.0, 2.0, 3.0]))
        );
    }

    #[test]
    fn rejects_non_finite_state() {
        let mut l = Vector::zeros(6);
        let mut u = Vector::zeros(6);
        assert_eq!(
            Err(StateError::NonFinite {
                index: 1,
                value: INFINITY,
            }),
            update_initial_state(2, &mut l, &mut u, &vector(&[1.0, INFINITY]))
        );
        // Buffers are left alone on failure
        assert!(l.iter().chain(u.iter()).all(|&v| v == 0.0));
    }
}
