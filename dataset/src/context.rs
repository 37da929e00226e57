//! Map context around a scene: candidate centerlines, their goals, and an occupancy raster.

use geom::{PolyLine, Pt2D};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};

use crate::{DatasetConfig, RasterConfig};

/// Resamples a polyline to `n` points evenly spaced by arc length. The first and last points are
/// kept.
pub fn resample_polyline(pl: &PolyLine, n: usize) -> Vec<Pt2D> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![pl.first_pt()];
    }
    let step = pl.length() / ((n - 1) as f64);
    let mut pts = Vec::with_capacity(n);
    for i in 0..n - 1 {
        match pl.dist_along(step * (i as f64)) {
            Ok((pt, _)) => pts.push(pt),
            // Rounding can step just past the end
            Err(_) => pts.push(pl.last_pt()),
        }
    }
    pts.push(pl.last_pt());
    pts
}

/// Packs the first `max_centerlines` centerlines of a scene, each resampled, into a
/// `[max_centerlines, points_per_centerline, 2]` array in the global frame. Missing centerlines
/// are all zero.
pub fn pack_centerlines(centerlines: &[PolyLine], cfg: &DatasetConfig) -> Array3<f64> {
    let mut packed = Array3::zeros((cfg.max_centerlines, cfg.points_per_centerline, 2));
    for (idx, pl) in centerlines.iter().take(cfg.max_centerlines).enumerate() {
        for (pt_idx, pt) in resample_polyline(pl, cfg.points_per_centerline)
            .into_iter()
            .enumerate()
        {
            packed[[idx, pt_idx, 0]] = pt.x();
            packed[[idx, pt_idx, 1]] = pt.y();
        }
    }
    packed
}

/// A packed centerline with any point at x == 0 is padding.
pub fn is_padding(line: ArrayView2<f64>) -> bool {
    line.column(0).iter().any(|x| *x == 0.0)
}

/// Expresses global centerlines `[lines, points, 2]` relative to the map origin. Padding lines
/// stay entirely zero.
pub fn to_local(centerlines: ArrayView3<f64>, origin: [f64; 2]) -> Array3<f32> {
    let (lines, pts, _) = centerlines.dim();
    let mut local = Array3::zeros((lines, pts, 2));
    for line in 0..lines {
        if is_padding(centerlines.slice(s![line, .., ..])) {
            continue;
        }
        for pt in 0..pts {
            local[[line, pt, 0]] = (centerlines[[line, pt, 0]] - origin[0]) as f32;
            local[[line, pt, 1]] = (centerlines[[line, pt, 1]] - origin[1]) as f32;
        }
    }
    local
}

/// True if every point of this local centerline is zero.
pub fn is_padding_line(line: ArrayView2<f32>) -> bool {
    line.iter().all(|x| *x == 0.0)
}

/// The last point of every real centerline, `[max_centerlines, 2]`. Padding lines produce zero
/// goals.
pub fn goal_points(local: ArrayView3<f32>) -> Array2<f32> {
    let (lines, pts, _) = local.dim();
    let mut goals = Array2::zeros((lines, 2));
    if pts == 0 {
        return goals;
    }
    for line in 0..lines {
        if is_padding_line(local.slice(s![line, .., ..])) {
            continue;
        }
        goals[[line, 0]] = local[[line, pts - 1, 0]];
        goals[[line, 1]] = local[[line, pts - 1, 1]];
    }
    goals
}

/// Marks every pixel containing a centerline point. Row 0 is the top of the raster, at
/// `+dist_around` on the Y axis.
pub fn rasterize(local: ArrayView3<f32>, cfg: &RasterConfig) -> Array2<f32> {
    let mut raster = Array2::zeros((cfg.pixels, cfg.pixels));
    let (lines, pts, _) = local.dim();
    let meters_per_pixel = 2.0 * cfg.dist_around / cfg.pixels as f64;
    for line in 0..lines {
        if is_padding_line(local.slice(s![line, .., ..])) {
            continue;
        }
        for pt in 0..pts {
            let x = local[[line, pt, 0]] as f64;
            let y = local[[line, pt, 1]] as f64;
            if x.abs() >= cfg.dist_around || y.abs() >= cfg.dist_around {
                continue;
            }
            let col = ((x + cfg.dist_around) / meters_per_pixel) as usize;
            let row = ((cfg.dist_around - y) / meters_per_pixel) as usize;
            raster[[row.min(cfg.pixels - 1), col.min(cfg.pixels - 1)]] = 1.0;
        }
    }
    raster
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polyline(pts: &[(f64, f64)]) -> PolyLine {
        PolyLine::new(pts.iter().map(|(x, y)| Pt2D::new(*x, *y)).collect()).unwrap()
    }

    #[test]
    fn resample_keeps_endpoints() {
        let line = polyline(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let pts: Vec<(f64, f64)> = resample_polyline(&line, 5)
            .into_iter()
            .map(|pt| (pt.x(), pt.y()))
            .collect();
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], (0.0, 0.0));
        assert_eq!(pts[4], (10.0, 10.0));
        let close =
            |a: (f64, f64), b: (f64, f64)| (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6;
        assert!(close(pts[1], (5.0, 0.0)));
        assert!(close(pts[2], (10.0, 0.0)));
        assert!(close(pts[3], (10.0, 5.0)));
    }

    #[test]
    fn padding_survives_local_shift() {
        let cfg = DatasetConfig {
            max_centerlines: 3,
            points_per_centerline: 4,
            ..Default::default()
        };
        let packed = pack_centerlines(&[polyline(&[(500.0, 20.0), (530.0, 20.0)])], &cfg);
        let local = to_local(packed.view(), [510.0, 15.0]);

        assert_eq!(local[[0, 0, 0]], -10.0);
        assert_eq!(local[[0, 0, 1]], 5.0);
        assert_eq!(local[[0, 3, 0]], 20.0);
        for line in 1..3 {
            assert!(is_padding_line(local.slice(s![line, .., ..])));
        }

        let goals = goal_points(local.view());
        assert_eq!(goals[[0, 0]], 20.0);
        assert_eq!(goals[[1, 0]], 0.0);
        assert_eq!(goals[[2, 1]], 0.0);
    }

    #[test]
    fn one_zero_point_pads_the_whole_line() {
        let mut packed = Array3::zeros((2, 3, 2));
        for pt in 0..3 {
            packed[[0, pt, 0]] = 100.0 + pt as f64;
            packed[[0, pt, 1]] = 50.0;
            packed[[1, pt, 0]] = pt as f64;
            packed[[1, pt, 1]] = 50.0;
        }
        let local = to_local(packed.view(), [100.0, 40.0]);
        assert_eq!(local[[0, 2, 0]], 2.0);
        assert_eq!(local[[0, 2, 1]], 10.0);
        // The second line starts at x == 0, so none of it survives
        assert!(is_padding_line(local.slice(s![1, .., ..])));
    }

    #[test]
    fn raster_marks_points() {
        let cfg = RasterConfig {
            dist_around: 10.0,
            pixels: 10,
        };
        let mut local = Array3::zeros((2, 2, 2));
        local[[0, 0, 0]] = 0.5;
        local[[0, 0, 1]] = 9.5;
        local[[0, 1, 0]] = 50.0;
        local[[0, 1, 1]] = 0.0;
        let raster = rasterize(local.view(), &cfg);
        assert_eq!(raster[[0, 5]], 1.0);
        assert_eq!(raster.sum(), 1.0);
    }
}
