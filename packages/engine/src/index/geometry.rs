// packages/engine/src/index/geometry.rs
//! Box predicates used by the interval tree traversals
//!
//! A box is a row `[min0, max0, min1, max1, ...]` of length `2 * dims`.

/// Absolute tolerance for "a corner lies on the hyperplane"
pub const EQUATION_TOLERANCE: f64 = 1e-12;

#[inline]
fn min_of(row: &[f64], dim: usize) -> f64 {
    row[2 * dim]
}

#[inline]
fn max_of(row: &[f64], dim: usize) -> f64 {
    row[2 * dim + 1]
}

/// Value of `Σ params[i] * x_i` at one corner of the box
///
/// Bit `i` of `corner` selects the max (set) or min (clear) of dimension `i`.
pub fn equation_value_at_corner(params: &[f64], row: &[f64], corner: u32) -> f64 {
    params
        .iter()
        .enumerate()
        .map(|(dim, p)| {
            let x = if corner & (1 << dim) != 0 {
                max_of(row, dim)
            } else {
                min_of(row, dim)
            };
            p * x
        })
        .sum()
}

/// Does the hyperplane `Σ params[i] * x_i = solution` pass through the box?
///
/// A linear functional takes its extreme values on two opposite corners, so
/// only those are evaluated: the plane hits the box if either extreme is
/// within tolerance of `solution` or the extremes lie on opposite sides.
pub fn equation_intersects(params: &[f64], solution: f64, row: &[f64]) -> bool {
    let mut low_corner = 0u32;
    for (dim, p) in params.iter().enumerate() {
        if *p < 0.0 {
            low_corner |= 1 << dim;
        }
    }
    let all = if params.len() >= 32 {
        u32::MAX
    } else {
        (1u32 << params.len()) - 1
    };
    let high_corner = !low_corner & all;

    let low = equation_value_at_corner(params, row, low_corner) - solution;
    let high = equation_value_at_corner(params, row, high_corner) - solution;

    if low.abs() < EQUATION_TOLERANCE || high.abs() < EQUATION_TOLERANCE {
        return true;
    }
    low < 0.0 && high > 0.0
}

/// Axis-aligned overlap between the box and `[min, max]` (touching counts)
pub fn range_intersects(min: &[f64], max: &[f64], row: &[f64]) -> bool {
    (0..min.len()).all(|dim| !(max_of(row, dim) < min[dim] || min_of(row, dim) > max[dim]))
}

/// Closed containment of `point` in the box
pub fn contains_point(point: &[f64], row: &[f64]) -> bool {
    point
        .iter()
        .enumerate()
        .all(|(dim, x)| *x >= min_of(row, dim) && *x <= max_of(row, dim))
}

/// Slab test for `origin + t * dir` with `t` in `[t_min, t_max]`
///
/// Returns false for boxes with NaN extents.
pub fn segment_intersects(origin: &[f64], dir: &[f64], t_min: f64, t_max: f64, row: &[f64]) -> bool {
    let mut enter = t_min;
    let mut exit = t_max;

    for dim in 0..origin.len() {
        let lo = min_of(row, dim);
        let hi = max_of(row, dim);
        let o = origin[dim];
        let d = dir[dim];

        if d == 0.0 {
            if !(o >= lo && o <= hi) {
                return false;
            }
            continue;
        }

        let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        enter = enter.max(t0);
        exit = exit.min(t1);
        if !(enter <= exit) {
            return false;
        }
    }

    true
}

/// Ray (`t >= 0`) against the box
pub fn ray_intersects(origin: &[f64], dir: &[f64], row: &[f64]) -> bool {
    segment_intersects(origin, dir, 0.0, f64::INFINITY, row)
}

/// Line segment `p0 -> p1` against the box
pub fn line_intersects(p0: &[f64], p1: &[f64], row: &[f64]) -> bool {
    let dir: Vec<f64> = p0.iter().zip(p1).map(|(a, b)| b - a).collect();
    segment_intersects(p0, &dir, 0.0, 1.0, row)
}

/// Midpoint of the box along `dim`
#[inline]
pub fn midpoint(row: &[f64], dim: usize) -> f64 {
    (min_of(row, dim) + max_of(row, dim)) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_SQUARE: [f64; 4] = [0.0, 1.0, 0.0, 1.0];

    #[test]
    fn test_corner_encoding() {
        let row = [0.0, 1.0, 10.0, 20.0];
        let params = [1.0, 1.0];
        assert_eq!(equation_value_at_corner(&params, &row, 0b00), 10.0);
        assert_eq!(equation_value_at_corner(&params, &row, 0b01), 11.0);
        assert_eq!(equation_value_at_corner(&params, &row, 0b10), 20.0);
        assert_eq!(equation_value_at_corner(&params, &row, 0b11), 21.0);
    }

    #[test]
    fn test_equation_straddle_and_miss() {
        // x + y = 1 cuts the unit square diagonally
        assert!(equation_intersects(&[1.0, 1.0], 1.0, &UNIT_SQUARE));
        // x = 0.5 slices it
        assert!(equation_intersects(&[1.0, 0.0], 0.5, &UNIT_SQUARE));
        // x - y = 3 misses it
        assert!(!equation_intersects(&[1.0, -1.0], 3.0, &UNIT_SQUARE));
        assert!(!equation_intersects(&[1.0, 1.0], -0.5, &UNIT_SQUARE));
    }

    #[test]
    fn test_equation_touching_corner() {
        // x + y = 2 touches only the (1, 1) corner
        assert!(equation_intersects(&[1.0, 1.0], 2.0, &UNIT_SQUARE));
        assert!(equation_intersects(&[-1.0, -1.0], 0.0, &UNIT_SQUARE));
    }

    #[test]
    fn test_range_overlap_is_inclusive() {
        assert!(range_intersects(&[1.0, 0.0], &[2.0, 1.0], &UNIT_SQUARE));
        assert!(!range_intersects(&[1.5, 0.0], &[2.0, 1.0], &UNIT_SQUARE));
        assert!(range_intersects(&[-5.0, -5.0], &[5.0, 5.0], &UNIT_SQUARE));
    }

    #[test]
    fn test_point_containment() {
        assert!(contains_point(&[0.5, 0.5], &UNIT_SQUARE));
        assert!(contains_point(&[1.0, 0.0], &UNIT_SQUARE));
        assert!(!contains_point(&[1.01, 0.5], &UNIT_SQUARE));
    }

    #[test]
    fn test_ray_slab() {
        let cube = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        assert!(ray_intersects(&[-1.0, 0.5, 0.5], &[1.0, 0.0, 0.0], &cube));
        // Pointing away
        assert!(!ray_intersects(&[-1.0, 0.5, 0.5], &[-1.0, 0.0, 0.0], &cube));
        // Parallel and outside the slab
        assert!(!ray_intersects(&[-1.0, 2.0, 0.5], &[1.0, 0.0, 0.0], &cube));
        // Origin inside
        assert!(ray_intersects(&[0.5, 0.5, 0.5], &[0.0, 0.0, -1.0], &cube));
        // Diagonal
        assert!(ray_intersects(&[-1.0, -1.0, -1.0], &[1.0, 1.0, 1.0], &cube));
        assert!(!ray_intersects(&[-1.0, -1.0, 3.0], &[1.0, 1.0, 0.1], &cube));
    }

    #[test]
    fn test_line_segment_stops_at_endpoint() {
        assert!(line_intersects(&[-1.0, 0.5], &[0.5, 0.5], &UNIT_SQUARE));
        assert!(!line_intersects(&[-2.0, 0.5], &[-0.5, 0.5], &UNIT_SQUARE));
        assert!(line_intersects(&[-1.0, -1.0], &[2.0, 2.0], &UNIT_SQUARE));
    }

    #[test]
    fn test_midpoint() {
        let row = [0.0, 2.0, -4.0, 4.0];
        assert_eq!(midpoint(&row, 0), 1.0);
        assert_eq!(midpoint(&row, 1), 0.0);
    }
}
