use log::warn;
use munkres::{solve_assignment, WeightMatrix};
use nalgebra as na;

// Dummy rows/columns used to square the matrix. Any constant works: every
// complete matching pays it the same number of times.
const PADDING_COST: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// Accepted `(row, column)` pairs, sorted by row.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

/// Minimum-cost matching over a rectangular cost matrix.
///
/// Returns exactly `min(rows, cols)` pairs, each row and column used at most
/// once, sorted by row.
pub fn solve(cost: &na::DMatrix<f32>) -> Vec<(usize, usize)> {
    let (rows, cols) = cost.shape();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let n = rows.max(cols);
    let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
        if r < rows && c < cols {
            cost[(r, c)] as f64
        } else {
            PADDING_COST
        }
    });

    match solve_assignment(&mut mat) {
        Ok(positions) => {
            let mut pairs: Vec<_> = positions
                .into_iter()
                .filter(|p| p.row < rows && p.column < cols)
                .map(|p| (p.row, p.column))
                .collect();

            pairs.sort_unstable();
            pairs
        }

        Err(err) => {
            warn!("assignment could not be solved: {:?}", err);
            Vec::new()
        }
    }
}

/// Solves `cost` and keeps only the pairs strictly cheaper than `max_cost`.
/// Rejected pairs leave both their row and column unmatched.
pub fn assign(cost: &na::DMatrix<f32>, max_cost: f32) -> Assignment {
    let (rows, cols) = cost.shape();
    let mut row_matched = vec![false; rows];
    let mut col_matched = vec![false; cols];

    let matches: Vec<_> = solve(cost)
        .into_iter()
        .filter(|&(r, c)| cost[(r, c)] < max_cost)
        .collect();

    for &(r, c) in &matches {
        row_matched[r] = true;
        col_matched[c] = true;
    }

    Assignment {
        matches,
        unmatched_rows: (0..rows).filter(|&r| !row_matched[r]).collect(),
        unmatched_cols: (0..cols).filter(|&c| !col_matched[c]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{assign, solve};
    use nalgebra as na;

    fn total(cost: &na::DMatrix<f32>, pairs: &[(usize, usize)]) -> f32 {
        pairs.iter().map(|&(r, c)| cost[(r, c)]).sum()
    }

    fn brute_force(cost: &na::DMatrix<f32>) -> f32 {
        fn go(cost: &na::DMatrix<f32>, row: usize, used: &mut Vec<bool>, left: usize) -> f32 {
            if left == 0 {
                return 0.0;
            }

            let rows_left = cost.nrows() - row;
            let mut best = f32::INFINITY;

            // skip this row, only possible while enough rows remain
            if rows_left > left {
                best = go(cost, row + 1, used, left);
            }

            for c in 0..cost.ncols() {
                if !used[c] {
                    used[c] = true;
                    let v = cost[(row, c)] + go(cost, row + 1, used, left - 1);
                    used[c] = false;
                    best = best.min(v);
                }
            }

            best
        }

        let k = cost.nrows().min(cost.ncols());
        go(cost, 0, &mut vec![false; cost.ncols()], k)
    }

    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
        }
    }

    #[test]
    fn matching_is_optimal_on_random_matrices() {
        let mut rng = Lcg(7);

        for (rows, cols) in [(1, 1), (2, 2), (3, 3), (2, 4), (4, 2), (4, 4), (5, 3), (3, 6)] {
            for _ in 0..10 {
                let cost = na::DMatrix::from_fn(rows, cols, |_, _| rng.next());
                let pairs = solve(&cost);

                assert_eq!(pairs.len(), rows.min(cols));

                let mut rs: Vec<_> = pairs.iter().map(|p| p.0).collect();
                let mut cs: Vec<_> = pairs.iter().map(|p| p.1).collect();
                rs.dedup();
                cs.sort_unstable();
                cs.dedup();
                assert_eq!(rs.len(), pairs.len());
                assert_eq!(cs.len(), pairs.len());

                assert!((total(&cost, &pairs) - brute_force(&cost)).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn beats_greedy_under_crowding() {
        // Greedy takes (0,0) first and is forced into (1,1) = 1.0.
        let cost = na::DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 1.0]);
        let pairs = solve(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn empty_matrix_has_no_pairs() {
        assert!(solve(&na::DMatrix::<f32>::zeros(0, 0)).is_empty());
        assert!(solve(&na::DMatrix::<f32>::zeros(3, 0)).is_empty());
    }

    #[test]
    fn assign_rejects_expensive_pairs() {
        let cost = na::DMatrix::from_row_slice(2, 2, &[0.2, 1.0, 1.0, 1.0]);
        let a = assign(&cost, 0.6);

        assert_eq!(a.matches, vec![(0, 0)]);
        assert_eq!(a.unmatched_rows, vec![1]);
        assert_eq!(a.unmatched_cols, vec![1]);
    }

    #[test]
    fn assign_reports_surplus_columns() {
        let cost = na::DMatrix::from_row_slice(1, 3, &[0.9, 0.1, 0.5]);
        let a = assign(&cost, 0.6);

        assert_eq!(a.matches, vec![(0, 1)]);
        assert!(a.unmatched_rows.is_empty());
        assert_eq!(a.unmatched_cols, vec![0, 2]);
    }
}
