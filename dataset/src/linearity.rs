//! Labels trajectories as linear or not by robustly fitting a line to them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::LinearityConfig;

/// The outcome of fitting a line to a trajectory.
#[derive(Clone, Debug, PartialEq)]
pub enum LineFit {
    Fit {
        /// Some point on the line
        point: [f64; 2],
        /// Unit length
        direction: [f64; 2],
        inliers: usize,
        total: usize,
    },
    /// Every sample was degenerate, so no consensus set exists.
    Unclassifiable,
}

impl LineFit {
    pub fn outlier_fraction(&self) -> Option<f64> {
        match self {
            LineFit::Fit { inliers, total, .. } => {
                Some((total - inliers) as f64 / *total as f64)
            }
            LineFit::Unclassifiable => None,
        }
    }
}

/// Robustly fits a line through the points, measuring residuals as perpendicular distance.
pub fn fit_line(pts: &[[f64; 2]], cfg: &LinearityConfig) -> LineFit {
    if pts.len() < 2 {
        return LineFit::Unclassifiable;
    }
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let mut best: Option<([f64; 2], [f64; 2], usize)> = None;
    for _ in 0..cfg.max_trials {
        let i = rng.random_range(0..pts.len());
        let j = rng.random_range(0..pts.len());
        let direction = match unit(sub(pts[j], pts[i])) {
            Some(d) => d,
            None => continue,
        };
        let inliers = count_inliers(pts, pts[i], direction, cfg.residual_threshold);
        if best.map(|(_, _, n)| inliers > n).unwrap_or(true) {
            best = Some((pts[i], direction, inliers));
        }
    }
    let (mut point, mut direction, mut inliers) = match best {
        Some(x) => x,
        None => return LineFit::Unclassifiable,
    };

    // Refine using only the consensus set
    let consensus: Vec<[f64; 2]> = pts
        .iter()
        .cloned()
        .filter(|pt| distance_to_line(*pt, point, direction) <= cfg.residual_threshold)
        .collect();
    if let Some((refit_point, refit_direction)) = total_least_squares(&consensus) {
        let refit_inliers =
            count_inliers(pts, refit_point, refit_direction, cfg.residual_threshold);
        if refit_inliers >= inliers {
            point = refit_point;
            direction = refit_direction;
            inliers = refit_inliers;
        }
    }

    LineFit::Fit {
        point,
        direction,
        inliers,
        total: pts.len(),
    }
}

/// True if the trajectory turns. Trajectories that can't be fit are treated as non-linear, the
/// harder case.
pub fn is_non_linear(pts: &[[f64; 2]], cfg: &LinearityConfig) -> bool {
    match fit_line(pts, cfg).outlier_fraction() {
        Some(fraction) => fraction > cfg.max_outlier_fraction,
        None => {
            debug!("Couldn't fit a line to {} points, calling it non-linear", pts.len());
            true
        }
    }
}

fn count_inliers(pts: &[[f64; 2]], point: [f64; 2], direction: [f64; 2], threshold: f64) -> usize {
    pts.iter()
        .filter(|pt| distance_to_line(**pt, point, direction) <= threshold)
        .count()
}

fn distance_to_line(pt: [f64; 2], point: [f64; 2], direction: [f64; 2]) -> f64 {
    let v = sub(pt, point);
    (v[0] * direction[1] - v[1] * direction[0]).abs()
}

/// The line through the centroid along the principal axis of the points.
fn total_least_squares(pts: &[[f64; 2]]) -> Option<([f64; 2], [f64; 2])> {
    if pts.len() < 2 {
        return None;
    }
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx + syy < 1e-12 {
        return None;
    }
    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(([cx, cy], [angle.cos(), angle.sin()]))
}

fn sub(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn unit(v: [f64; 2]) -> Option<[f64; 2]> {
    let len = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if len < 1e-9 {
        return None;
    }
    Some([v[0] / len, v[1] / len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_with_jitter() -> Vec<[f64; 2]> {
        // Constant velocity at 1.2 m/step heading north-east, lateral jitter under 0.5m
        (0..50)
            .map(|i| {
                let t = i as f64;
                let jitter = 0.4 * (t * 1.7).sin();
                [1.2 * t * 0.8 - jitter * 0.6, 1.2 * t * 0.6 + jitter * 0.8]
            })
            .collect()
    }

    fn right_angle_turn() -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        for i in 0..25 {
            pts.push([i as f64, 0.0]);
        }
        for i in 1..=25 {
            pts.push([24.0, i as f64]);
        }
        pts
    }

    #[test]
    fn straight_is_linear() {
        let cfg = LinearityConfig::default();
        let fit = fit_line(&straight_with_jitter(), &cfg);
        assert_eq!(fit.outlier_fraction(), Some(0.0));
        assert!(!is_non_linear(&straight_with_jitter(), &cfg));
    }

    #[test]
    fn turn_is_non_linear() {
        let cfg = LinearityConfig::default();
        let fraction = fit_line(&right_angle_turn(), &cfg)
            .outlier_fraction()
            .unwrap();
        assert!(fraction > 0.3, "only {fraction} outliers");
        assert!(is_non_linear(&right_angle_turn(), &cfg));
    }

    #[test]
    fn stationary_is_unclassifiable() {
        let cfg = LinearityConfig::default();
        let pts = vec![[3.0, 4.0]; 20];
        assert_eq!(fit_line(&pts, &cfg), LineFit::Unclassifiable);
        assert!(is_non_linear(&pts, &cfg));
        assert_eq!(fit_line(&pts[0..1], &cfg), LineFit::Unclassifiable);
    }

    #[test]
    fn deterministic() {
        let cfg = LinearityConfig::default();
        let pts = right_angle_turn();
        assert_eq!(fit_line(&pts, &cfg), fit_line(&pts, &cfg));
    }
}
