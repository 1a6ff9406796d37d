//! Spatial interpolation of meteo observations onto hydro posts.
//!
//! Coded weather fields take the value of the nearest meteo station on the
//! same day. Continuous fields are estimated per day by ordinary kriging
//! with a spherical variogram over great-circle distances (in degrees),
//! using the three closest stations that reported the field.

use amur_core::observation::{CodeValues, HydroRecord, LocatedMeteo, Location, MeteoField, MeteoValues, StationDay};
use amur_core::station::Station;
use chrono::NaiveDate;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Stations used per kriging estimate.
pub const N_CLOSEST_POINTS: usize = 3;

/// Lag bins of the experimental variogram.
pub const VARIOGRAM_LAGS: usize = 6;

/// Candidate ranges tried when fitting the variogram.
const RANGE_STEPS: usize = 40;

/// Distance below which a target coincides with a station.
const COINCIDENT: f64 = 1e-10;

/// Great-circle distance between two points, in degrees of arc.
pub fn great_circle_degrees(a: &Location, b: &Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlon = (b.lon - a.lon).to_radians();
    let (s1, c1) = lat1.sin_cos();
    let (s2, c2) = lat2.sin_cos();
    let y = ((c2 * dlon.sin()).powi(2) + (c1 * s2 - s1 * c2 * dlon.cos()).powi(2)).sqrt();
    let x = s1 * s2 + c1 * c2 * dlon.cos();
    y.atan2(x).to_degrees()
}

/// Spherical variogram model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalVariogram {
    pub psill: f64,
    pub range: f64,
    pub nugget: f64,
}

fn spherical_shape(h: f64, range: f64) -> f64 {
    if range <= 0.0 || h >= range {
        1.0
    } else {
        let r = h / range;
        1.5 * r - 0.5 * r * r * r
    }
}

/// Least-squares `psill` and `nugget` for a fixed range, both held
/// non-negative. Returns `(psill, nugget, squared error)`.
fn fit_sill_and_nugget(lags: &[f64], semivariance: &[f64], range: f64) -> (f64, f64, f64) {
    let shape: Vec<f64> = lags.iter().map(|&h| spherical_shape(h, range)).collect();
    let n = lags.len() as f64;
    let (ss, s, sy, y) = shape.iter().zip(semivariance).fold((0.0, 0.0, 0.0, 0.0), |acc, (si, yi)| {
        (acc.0 + si * si, acc.1 + si, acc.2 + si * yi, acc.3 + yi)
    });
    let sse = |psill: f64, nugget: f64| -> f64 {
        shape
            .iter()
            .zip(semivariance)
            .map(|(si, yi)| (psill * si + nugget - yi).powi(2))
            .sum()
    };

    let mut candidates = Vec::with_capacity(3);
    let det = ss * n - s * s;
    if det.abs() > f64::EPSILON {
        let psill = (sy * n - s * y) / det;
        let nugget = (ss * y - s * sy) / det;
        if psill >= 0.0 && nugget >= 0.0 {
            candidates.push((psill, nugget));
        }
    }
    if ss > 0.0 {
        candidates.push(((sy / ss).max(0.0), 0.0));
    }
    candidates.push((0.0, (y / n).max(0.0)));

    candidates
        .into_iter()
        .map(|(p, g)| (p, g, sse(p, g)))
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .unwrap_or((0.0, 0.0, f64::INFINITY))
}

impl SphericalVariogram {
    pub fn gamma(&self, h: f64) -> f64 {
        self.psill * spherical_shape(h, self.range) + self.nugget
    }

    /// Fit the model to an experimental variogram of the points.
    ///
    /// Pairwise semivariances are binned into [`VARIOGRAM_LAGS`] equal-width
    /// distance bins; empty bins are skipped. The range is chosen from an even
    /// grid up to twice the largest lag, with `psill` and `nugget` solved by
    /// least squares for each candidate.
    pub fn fit(points: &[(Location, f64)]) -> Option<Self> {
        let mut pairs = Vec::new();
        for (i, (a, za)) in points.iter().enumerate() {
            for (b, zb) in &points[i + 1..] {
                pairs.push((great_circle_degrees(a, b), 0.5 * (za - zb).powi(2)));
            }
        }
        if pairs.is_empty() {
            return None;
        }
        let dmin = pairs.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let dmax = pairs.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let width = (dmax - dmin) / VARIOGRAM_LAGS as f64;
        let mut edges: Vec<f64> = (0..VARIOGRAM_LAGS).map(|n| dmin + n as f64 * width).collect();
        edges.push(dmax + 0.001);

        let mut lags = Vec::new();
        let mut semivariance = Vec::new();
        for bin in edges.windows(2) {
            let inside: Vec<&(f64, f64)> = pairs.iter().filter(|p| p.0 >= bin[0] && p.0 < bin[1]).collect();
            if !inside.is_empty() {
                let count = inside.len() as f64;
                lags.push(inside.iter().map(|p| p.0).sum::<f64>() / count);
                semivariance.push(inside.iter().map(|p| p.1).sum::<f64>() / count);
            }
        }

        let max_lag = lags.iter().copied().fold(0.0, f64::max);
        if max_lag <= 0.0 {
            let nugget = semivariance.iter().sum::<f64>() / semivariance.len() as f64;
            return Some(SphericalVariogram {
                psill: 0.0,
                range: 0.0,
                nugget,
            });
        }
        (1..=RANGE_STEPS)
            .map(|k| 2.0 * max_lag * k as f64 / RANGE_STEPS as f64)
            .map(|range| {
                let (psill, nugget, sse) = fit_sill_and_nugget(&lags, &semivariance, range);
                (SphericalVariogram { psill, range, nugget }, sse)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(model, _)| model)
    }
}

/// Ordinary kriging over a fixed set of located values.
#[derive(Debug, Clone)]
pub struct OrdinaryKriging<'a> {
    points: &'a [(Location, f64)],
    variogram: SphericalVariogram,
}

impl<'a> OrdinaryKriging<'a> {
    pub fn new(points: &'a [(Location, f64)]) -> Option<Self> {
        let variogram = SphericalVariogram::fit(points)?;
        Some(OrdinaryKriging { points, variogram })
    }

    pub fn variogram(&self) -> &SphericalVariogram {
        &self.variogram
    }

    /// Estimate at `target` from its [`N_CLOSEST_POINTS`] closest points.
    ///
    /// A target on top of a station takes that station's value. When the
    /// kriging system is singular the mean of the closest points is used.
    pub fn estimate(&self, target: &Location) -> Option<f64> {
        let mut nearest: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, (loc, _))| (great_circle_degrees(target, loc), i))
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearest.truncate(N_CLOSEST_POINTS);

        let (closest_distance, closest) = *nearest.first()?;
        if closest_distance <= COINCIDENT {
            return Some(self.points[closest].1);
        }

        let n = nearest.len();
        let values: Vec<f64> = nearest.iter().map(|&(_, i)| self.points[i].1).collect();
        let system = DMatrix::from_fn(n + 1, n + 1, |r, c| match (r < n, c < n) {
            (true, true) if r == c => 0.0,
            (true, true) => {
                let (a, b) = (&self.points[nearest[r].1].0, &self.points[nearest[c].1].0);
                self.variogram.gamma(great_circle_degrees(a, b))
            }
            (false, false) => 0.0,
            _ => 1.0,
        });
        let rhs = DVector::from_fn(n + 1, |r, _| {
            if r < n {
                self.variogram.gamma(nearest[r].0)
            } else {
                1.0
            }
        });

        let fallback = values.iter().sum::<f64>() / n as f64;
        match system.lu().solve(&rhs) {
            Some(weights) if weights.iter().all(|w| w.is_finite()) => {
                Some(values.iter().enumerate().map(|(i, v)| weights[i] * v).sum())
            }
            _ => {
                debug!("Singular kriging system at {:?}; using mean of neighbours", target);
                Some(fallback)
            }
        }
    }
}

/// Interpolate one field's station values onto every target.
///
/// No points gives no estimate; constant points are broadcast as is.
pub fn interpolate_field(points: &[(Location, f64)], targets: &[Location]) -> Vec<Option<f64>> {
    if points.is_empty() {
        return vec![None; targets.len()];
    }
    let max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let mean = points.iter().map(|p| p.1).sum::<f64>() / points.len() as f64;
    if max == min {
        return vec![Some(mean); targets.len()];
    }
    match OrdinaryKriging::new(points) {
        Some(kriging) => targets.iter().map(|t| kriging.estimate(t)).collect(),
        None => vec![Some(mean); targets.len()],
    }
}

/// Kriged meteo values of one day for each target location.
pub fn krige_day(day: &[&LocatedMeteo], targets: &[Location]) -> Vec<MeteoValues> {
    let mut estimates = vec![MeteoValues::default(); targets.len()];
    for field in MeteoField::ALL {
        let points: Vec<(Location, f64)> = day
            .iter()
            .filter_map(|m| m.record.values.get(field).map(|v| (m.location, v)))
            .collect();
        for (slot, value) in estimates.iter_mut().zip(interpolate_field(&points, targets)) {
            slot.set(field, value);
        }
    }
    estimates
}

/// Coded weather of the station nearest to `target` among one day's records.
pub fn nearest_codes(day: &[&LocatedMeteo], target: &Location) -> Option<CodeValues> {
    let planar = |loc: &Location| (loc.lon - target.lon).powi(2) + (loc.lat - target.lat).powi(2);
    day.iter()
        .min_by(|a, b| planar(&a.location).total_cmp(&planar(&b.location)))
        .map(|m| m.record.codes)
}

/// Join located hydro records with meteo interpolated onto their posts.
///
/// Every hydro record is kept. Kriged days later than the last hydro day are
/// appended as weather-only rows, one per post, so the feature assembler can
/// see meteo for days the hydro archive has not reached yet. Output is sorted
/// by (identifier, date).
pub fn merge_hydro_meteo(
    hydro: Vec<(HydroRecord, Location)>,
    meteo: &[LocatedMeteo],
    stations: &[Station],
) -> Vec<StationDay> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&LocatedMeteo>> = BTreeMap::new();
    for record in meteo {
        by_day.entry(record.record.date).or_default().push(record);
    }
    let targets: Vec<Location> = stations.iter().map(|s| s.location).collect();

    info!("Kriging meteo onto {} posts for {} days", stations.len(), by_day.len());
    let kriged: Vec<(NaiveDate, Vec<MeteoValues>)> = by_day
        .par_iter()
        .map(|(date, day)| (*date, krige_day(day, &targets)))
        .collect();

    let mut lookup: HashMap<(&str, NaiveDate), MeteoValues> = HashMap::new();
    for (date, values) in &kriged {
        for (station, estimate) in stations.iter().zip(values) {
            lookup.insert((station.id.as_str(), *date), *estimate);
        }
    }

    let last_hydro_day = hydro.iter().map(|(r, _)| r.date).max();
    let mut merged: Vec<StationDay> = hydro
        .into_iter()
        .map(|(record, location)| {
            let key = (record.identifier.as_str(), record.date);
            let meteo = lookup.get(&key).copied();
            let codes = by_day.get(&record.date).and_then(|day| nearest_codes(day, &location));
            let mut row = StationDay::from_hydro(record, location);
            if let Some(codes) = codes {
                row.codes = codes;
            }
            if let Some(meteo) = meteo {
                row.meteo = meteo;
            }
            row
        })
        .collect();

    for (date, values) in &kriged {
        if last_hydro_day.is_some_and(|last| *date <= last) {
            continue;
        }
        for (station, estimate) in stations.iter().zip(values) {
            merged.push(StationDay::weather_only(&station.id, *date, *estimate));
        }
    }
    merged.sort_by(|a, b| (&a.identifier, a.date).cmp(&(&b.identifier, b.date)));
    merged
}
