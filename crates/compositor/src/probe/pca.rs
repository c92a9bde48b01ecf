//! Principal components of sampled colours.
//!
//! The 3x3 covariance matrix is decomposed in closed form (trigonometric
//! solution of the characteristic cubic). Eigenvectors come from the cross
//! product of two rows of `A - λI`; when every pair of rows is parallel the
//! eigenvalue is repeated and the basis is reported as degenerate.
use std::f64::consts::PI;

use super::color::Lab;
use super::ProbeError;

type Mat3 = [[f64; 3]; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub mean: [f64; 3],
    /// Eigenvectors, one per row, ordered like `values`.
    pub vectors: Mat3,
    pub values: [f64; 3],
}

impl Basis {
    pub fn fit(points: &[Lab]) -> Result<Self, ProbeError> {
        let (mean, covariance) = covariance(points)?;
        if covariance.iter().flatten().all(|v| *v == 0.0) {
            return Err(ProbeError::DegenerateBasis(
                "samples have no spread".to_string(),
            ));
        }
        let (values, vectors) = eigen_symmetric(&covariance)?;
        Ok(Self {
            mean,
            vectors,
            values,
        })
    }

    pub fn project(&self, point: Lab) -> [f64; 3] {
        let centred = [
            point[0] - self.mean[0],
            point[1] - self.mean[1],
            point[2] - self.mean[2],
        ];
        self.vectors.map(|axis| dot(&centred, &axis))
    }

    pub fn unproject(&self, coords: [f64; 3]) -> Lab {
        let mut out = self.mean;
        for (axis, c) in self.vectors.iter().zip(coords) {
            for (slot, component) in out.iter_mut().zip(axis) {
                *slot += c * component;
            }
        }
        out
    }
}

/// Mean and population covariance (divided by N).
pub fn covariance(points: &[Lab]) -> Result<([f64; 3], Mat3), ProbeError> {
    if points.is_empty() {
        return Err(ProbeError::NoSamples);
    }
    let n = points.len() as f64;
    let mut mean = [0.0; 3];
    for point in points {
        for (m, v) in mean.iter_mut().zip(point) {
            *m += v;
        }
    }
    mean = mean.map(|m| m / n);

    let mut cov = [[0.0; 3]; 3];
    for point in points {
        let d = [point[0] - mean[0], point[1] - mean[1], point[2] - mean[2]];
        for row in 0..3 {
            for col in row..3 {
                cov[row][col] += d[row] * d[col];
            }
        }
    }
    for row in 0..3 {
        for col in row..3 {
            cov[row][col] /= n;
            cov[col][row] = cov[row][col];
        }
    }
    Ok((mean, cov))
}

/// Eigenvalues (descending unless the matrix is already diagonal) and
/// unit eigenvectors of a symmetric matrix.
pub fn eigen_symmetric(m: &Mat3) -> Result<([f64; 3], Mat3), ProbeError> {
    let (a, b, c) = (m[0][0], m[0][1], m[0][2]);
    let (e, f) = (m[1][1], m[1][2]);
    let i = m[2][2];

    let p1 = b * b + c * c + f * f;
    if p1 == 0.0 {
        return Ok(([a, e, i], [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]));
    }

    let q = (a + e + i) / 3.0;
    let p2 = (a - q).powi(2) + (e - q).powi(2) + (i - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();
    let bm = [
        [(a - q) / p, b / p, c / p],
        [b / p, (e - q) / p, f / p],
        [c / p, f / p, (i - q) / p],
    ];
    let half_det = determinant(&bm) / 2.0;
    let phi = half_det.clamp(-1.0, 1.0).acos() / 3.0;

    let eig1 = q + 2.0 * p * phi.cos();
    let eig3 = q + 2.0 * p * (phi + 2.0 * PI / 3.0).cos();
    let eig2 = 3.0 * q - eig1 - eig3;
    let values = [eig1, eig2, eig3];

    let scale = m
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = 1e-9 * (scale * scale).max(f64::MIN_POSITIVE);

    let mut vectors = [[0.0; 3]; 3];
    for (slot, lambda) in vectors.iter_mut().zip(values) {
        let rows = [
            [a - lambda, b, c],
            [b, e - lambda, f],
            [c, f, i - lambda],
        ];
        let candidate = [(0, 1), (0, 2), (1, 2)]
            .into_iter()
            .map(|(r, s)| cross(&rows[r], &rows[s]))
            .max_by(|x, y| norm(x).total_cmp(&norm(y)))
            .unwrap_or([0.0; 3]);
        let length = norm(&candidate);
        if !(length > tolerance) {
            return Err(ProbeError::DegenerateBasis(format!(
                "eigenvalue {lambda:.3e} is repeated; rows of A - λI are parallel"
            )));
        }
        *slot = candidate.map(|v| v / length);
    }

    if values.iter().chain(vectors.iter().flatten()).any(|v| !v.is_finite()) {
        return Err(ProbeError::DegenerateBasis(
            "eigen decomposition produced non-finite values".to_string(),
        ));
    }
    Ok((values, vectors))
}

fn determinant(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(v: &[f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_a_symmetric_matrix() {
        let m = [[4.0, 1.0, 0.0], [1.0, 3.0, 0.0], [0.0, 0.0, 1.0]];
        let (values, vectors) = eigen_symmetric(&m).unwrap();
        assert!(values[0] >= values[1] && values[1] >= values[2]);
        assert!((values[0] - (7.0 + 5.0_f64.sqrt()) / 2.0).abs() < 1e-9);
        assert!((values[2] - 1.0).abs() < 1e-9);
        for (lambda, v) in values.iter().zip(vectors) {
            for row in 0..3 {
                let av = dot(&m[row], &v);
                assert!((av - lambda * v[row]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn diagonal_matrix_keeps_axes() {
        let m = [[0.2, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.0, 0.1]];
        let (values, vectors) = eigen_symmetric(&m).unwrap();
        assert_eq!(values, [0.2, 0.5, 0.1]);
        assert_eq!(vectors[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let points = [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        assert!(matches!(
            Basis::fit(&points),
            Err(ProbeError::DegenerateBasis(_))
        ));
    }

    #[test]
    fn flat_colour_is_degenerate() {
        let points = [[0.5, 0.1, -0.1]; 16];
        assert!(matches!(
            Basis::fit(&points),
            Err(ProbeError::DegenerateBasis(_))
        ));
    }

    #[test]
    fn projection_round_trips() {
        let points = [
            [0.1, 0.0, 0.3],
            [0.9, 0.2, -0.1],
            [0.4, -0.3, 0.05],
            [0.6, 0.1, 0.2],
            [0.2, 0.25, -0.2],
        ];
        let basis = Basis::fit(&points).unwrap();
        for point in points {
            let back = basis.unproject(basis.project(point));
            for (x, y) in point.iter().zip(back) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn empty_sample_is_an_error() {
        assert_eq!(Basis::fit(&[]), Err(ProbeError::NoSamples));
    }
}
