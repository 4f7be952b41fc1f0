//! Coordinate reference system transformations.
//!
//! Wraps a fixed geographic → projected transform (for example
//! EPSG:4326 → EPSG:3006, SWEREF99 TM) shared by the merger, the spatial
//! aggregator and the map renderer, so all of them agree on one projection.
//! Projection definitions come from the `crs-definitions` database and are
//! evaluated in pure Rust by `proj4rs`.

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use thiserror::Error;

/// Errors from CRS lookup or point transformation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("invalid CRS identifier '{0}', expected EPSG:<code>")]
    InvalidIdentifier(String),

    #[error("EPSG:{0} is not in the crs-definitions database")]
    UnknownCode(u16),

    #[error("invalid projection definition for EPSG:{code}: {message}")]
    InvalidDefinition { code: u16, message: String },

    #[error("transform from EPSG:{from} to EPSG:{to} failed: {message}")]
    Failed { from: u16, to: u16, message: String },
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Parse `EPSG:3006` (case-insensitive) or a bare `3006`.
pub fn parse_epsg(identifier: &str) -> Result<u16> {
    let s = identifier.trim();
    let code = match s.split_once(':') {
        Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
        Some(_) => return Err(TransformError::InvalidIdentifier(identifier.to_string())),
        None => s,
    };
    code.trim()
        .parse::<u16>()
        .map_err(|_| TransformError::InvalidIdentifier(identifier.to_string()))
}

fn proj_string(code: u16) -> Result<&'static str> {
    crs_definitions::from_code(code)
        .map(|def| def.proj4)
        .ok_or(TransformError::UnknownCode(code))
}

fn build_proj(code: u16) -> Result<(Proj, bool)> {
    let definition = proj_string(code)?;
    let proj = Proj::from_proj_string(definition).map_err(|e| TransformError::InvalidDefinition {
        code,
        message: format!("{e:?}"),
    })?;
    Ok((proj, definition.contains("+proj=longlat")))
}

/// A CRS endpoint with its parsed projection.
struct Endpoint {
    code: u16,
    proj: Proj,
    geographic: bool,
}

impl Endpoint {
    fn new(code: u16) -> Result<Self> {
        let (proj, geographic) = build_proj(code)?;
        Ok(Self {
            code,
            proj,
            geographic,
        })
    }
}

/// Fixed forward transform between an input and an output CRS.
///
/// Coordinates are always passed in `(x, y)` order, i.e. `(lon, lat)` for
/// geographic systems and `(easting, northing)` for projected ones.
pub struct CoordinateTransformer {
    source: Endpoint,
    target: Endpoint,
}

impl CoordinateTransformer {
    /// Build a transformer from two identifiers such as `"EPSG:4326"`.
    pub fn new(input_crs: &str, output_crs: &str) -> Result<Self> {
        Self::from_codes(parse_epsg(input_crs)?, parse_epsg(output_crs)?)
    }

    pub fn from_codes(source: u16, target: u16) -> Result<Self> {
        Ok(Self {
            source: Endpoint::new(source)?,
            target: Endpoint::new(target)?,
        })
    }

    pub fn source_code(&self) -> u16 {
        self.source.code
    }

    pub fn target_code(&self) -> u16 {
        self.target.code
    }

    /// Whether the output CRS is a projected (planar) system.
    pub fn is_projected(&self) -> bool {
        !self.target.geographic
    }

    /// Transform one point from the input CRS to the output CRS.
    pub fn forward(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        run(&self.source, &self.target, x, y)
    }

    /// Transform one point from the output CRS back to the input CRS.
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        run(&self.target, &self.source, x, y)
    }

    /// Forward-transform paired optional coordinates. Pairs with a missing
    /// member, or that fail to project, come back as `None`.
    pub fn forward_many(
        &self,
        xs: &[Option<f64>],
        ys: &[Option<f64>],
    ) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
        map_pairs(xs, ys, |x, y| self.forward(x, y))
    }

    /// Inverse-transform paired optional coordinates.
    pub fn inverse_many(
        &self,
        xs: &[Option<f64>],
        ys: &[Option<f64>],
    ) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
        map_pairs(xs, ys, |x, y| self.inverse(x, y))
    }
}

impl fmt::Debug for CoordinateTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateTransformer")
            .field("source", &format_args!("EPSG:{}", self.source.code))
            .field("target", &format_args!("EPSG:{}", self.target.code))
            .finish()
    }
}

fn run(from: &Endpoint, to: &Endpoint, x: f64, y: f64) -> Result<(f64, f64)> {
    if from.code == to.code {
        return Ok((x, y));
    }

    // proj4rs works in radians for geographic systems
    let mut point = if from.geographic {
        (x.to_radians(), y.to_radians(), 0.0)
    } else {
        (x, y, 0.0)
    };

    transform(&from.proj, &to.proj, &mut point).map_err(|e| TransformError::Failed {
        from: from.code,
        to: to.code,
        message: format!("{e:?}"),
    })?;

    if to.geographic {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}

fn map_pairs<F>(xs: &[Option<f64>], ys: &[Option<f64>], f: F) -> (Vec<Option<f64>>, Vec<Option<f64>>)
where
    F: Fn(f64, f64) -> Result<(f64, f64)>,
{
    let mut out_x = Vec::with_capacity(xs.len());
    let mut out_y = Vec::with_capacity(ys.len());
    let mut failures = 0usize;

    for (x, y) in xs.iter().zip(ys.iter()) {
        match (x, y) {
            (Some(x), Some(y)) => match f(*x, *y) {
                Ok((a, b)) if a.is_finite() && b.is_finite() => {
                    out_x.push(Some(a));
                    out_y.push(Some(b));
                }
                _ => {
                    failures += 1;
                    out_x.push(None);
                    out_y.push(None);
                }
            },
            _ => {
                out_x.push(None);
                out_y.push(None);
            }
        }
    }

    if failures > 0 {
        log::warn!("{} coordinate pairs could not be transformed", failures);
    }

    (out_x, out_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg() {
        assert_eq!(parse_epsg("EPSG:3006").unwrap(), 3006);
        assert_eq!(parse_epsg("epsg:4326").unwrap(), 4326);
        assert_eq!(parse_epsg("3857").unwrap(), 3857);
        assert!(parse_epsg("ESRI:102001").is_err());
        assert!(parse_epsg("EPSG:abc").is_err());
    }

    #[test]
    fn test_forward_web_mercator() {
        let t = CoordinateTransformer::new("EPSG:4326", "EPSG:3857").unwrap();
        assert!(t.is_projected());

        let (x, y) = t.forward(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        // One degree of longitude on the sphere of radius 6378137 m
        let (x, _) = t.forward(1.0, 0.0).unwrap();
        assert!((x - 111_319.490_793).abs() < 1e-3);
    }

    #[test]
    fn test_inverse_round_trip_utm() {
        let t = CoordinateTransformer::new("EPSG:4326", "EPSG:32633").unwrap();
        let (e, n) = t.forward(15.0, 58.0).unwrap();
        // 15°E is the central meridian of zone 33
        assert!((e - 500_000.0).abs() < 1e-3);
        let (lon, lat) = t.inverse(e, n).unwrap();
        assert!((lon - 15.0).abs() < 1e-7);
        assert!((lat - 58.0).abs() < 1e-7);
    }

    #[test]
    fn test_forward_many_skips_missing() {
        let t = CoordinateTransformer::new("EPSG:4326", "EPSG:3857").unwrap();
        let (xs, ys) = t.forward_many(&[Some(0.0), None], &[Some(0.0), Some(1.0)]);
        assert!(xs[0].is_some() && ys[0].is_some());
        assert_eq!(xs[1], None);
        assert_eq!(ys[1], None);
    }

    #[test]
    fn test_identity_transform() {
        let t = CoordinateTransformer::new("EPSG:4326", "EPSG:4326").unwrap();
        assert_eq!(t.forward(12.5, 55.5).unwrap(), (12.5, 55.5));
    }
}
