//! Hexagonal spatial binning on the H3 grid.
//!
//! The grid is defined on WGS84 latitude/longitude. Tables whose primary
//! coordinates are projected are transformed back before assignment.

use h3o::{CellIndex, LatLng, Resolution};
use log::debug;
use rayon::prelude::*;

use crate::core::table::Table;
use crate::core::transforms::CoordinateTransformer;
use crate::processors::reduction::{aggregate_groups, AggregationError, Aggregation, AggregationPlan};

pub type Result<T> = std::result::Result<T, AggregationError>;

/// Bins keyed by hex cell.
pub type HexAggregation = Aggregation<CellIndex>;

/// Where a table's coordinates come from.
#[derive(Debug, Clone, Copy)]
pub enum CoordinateSource<'a> {
    /// WGS84 degree columns
    Geographic { lat_col: &'a str, lon_col: &'a str },
    /// Projected columns, inverse-transformed to WGS84 before assignment
    Projected {
        easting_col: &'a str,
        northing_col: &'a str,
        transformer: &'a CoordinateTransformer,
    },
}

impl<'a> CoordinateSource<'a> {
    pub fn geographic(lat_col: &'a str, lon_col: &'a str) -> Self {
        CoordinateSource::Geographic { lat_col, lon_col }
    }

    /// Latitude and longitude in WGS84 degrees for every row.
    pub fn lat_lon(&self, table: &Table) -> Result<(Vec<Option<f64>>, Vec<Option<f64>>)> {
        match *self {
            CoordinateSource::Geographic { lat_col, lon_col } => {
                let lat = table.require(lat_col)?.values.clone();
                let lon = table.require(lon_col)?.values.clone();
                Ok((lat, lon))
            }
            CoordinateSource::Projected {
                easting_col,
                northing_col,
                transformer,
            } => {
                let easting = table.require(easting_col)?;
                let northing = table.require(northing_col)?;
                let (lon, lat) = transformer.inverse_many(&easting.values, &northing.values);
                Ok((lat, lon))
            }
        }
    }
}

/// Validate an integer resolution against the grid's supported range.
pub fn parse_resolution(resolution: u8) -> Result<Resolution> {
    Resolution::try_from(resolution).map_err(|_| AggregationError::InvalidResolution(resolution))
}

/// Cell covering a WGS84 point, or `None` for an invalid coordinate.
pub fn assign_cell(lat: f64, lon: f64, resolution: Resolution) -> Option<CellIndex> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    LatLng::new(lat, lon).ok().map(|ll| ll.to_cell(resolution))
}

/// Assign a cell to every row. Rows with a missing coordinate get `None`.
pub fn assign_hex_ids(
    table: &Table,
    source: &CoordinateSource<'_>,
    resolution: u8,
) -> Result<Vec<Option<CellIndex>>> {
    let resolution = parse_resolution(resolution)?;
    let (lat, lon) = source.lat_lon(table)?;

    let ids: Vec<Option<CellIndex>> = lat
        .par_iter()
        .zip(lon.par_iter())
        .map(|(la, lo)| match (la, lo) {
            (Some(la), Some(lo)) => assign_cell(*la, *lo, resolution),
            _ => None,
        })
        .collect();

    let assigned = ids.iter().filter(|id| id.is_some()).count();
    debug!(
        "Assigned {} of {} rows to resolution {} cells",
        assigned,
        ids.len(),
        resolution
    );
    Ok(ids)
}

/// Group rows by hex cell and reduce each planned column.
pub fn aggregate_by_hex(
    table: &Table,
    source: &CoordinateSource<'_>,
    resolution: u8,
    plan: &AggregationPlan,
) -> Result<HexAggregation> {
    let ids = assign_hex_ids(table, source, resolution)?;
    Ok(aggregate_groups(table, &ids, plan)?)
}

/// Boundary of a cell as a closed `(lon, lat)` ring.
pub fn hex_boundary(cell: CellIndex) -> Vec<(f64, f64)> {
    let mut ring: Vec<(f64, f64)> = cell.boundary().iter().map(|ll| (ll.lng(), ll.lat())).collect();
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

/// Cell boundary as a WKT polygon.
pub fn boundary_wkt(cell: CellIndex) -> String {
    let coords: Vec<String> = hex_boundary(cell)
        .iter()
        .map(|(lon, lat)| format!("{lon} {lat}"))
        .collect();
    format!("POLYGON(({}))", coords.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Column;
    use crate::processors::reduction::Reduction;
    use chrono::NaiveDate;

    fn contains(ring: &[(f64, f64)], lon: f64, lat: f64) -> bool {
        let mut inside = false;
        for w in ring.windows(2) {
            let ((x1, y1), (x2, y2)) = (w[0], w[1]);
            if (y1 > lat) != (y2 > lat) && lon < (x2 - x1) * (lat - y1) / (y2 - y1) + x1 {
                inside = !inside;
            }
        }
        inside
    }

    fn survey_table() -> Table {
        let t = NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Table::from_columns(
            vec![t; 5],
            vec![
                Column::new("latitude", vec![Some(55.60), Some(55.6001), None, Some(57.7), Some(55.60)]),
                Column::new("longitude", vec![Some(12.90), Some(12.9001), Some(12.0), Some(11.9), Some(12.90)]),
                Column::from_values("sv", &[-60.0, -62.0, -70.0, -50.0, -64.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_boundary_contains_point_and_is_closed() {
        let points = [(55.6, 12.9), (57.7089, 11.9746), (-33.86, 151.21), (0.0, 0.0)];
        for resolution in [6u8, 8, 10] {
            let res = parse_resolution(resolution).unwrap();
            for &(lat, lon) in &points {
                let cell = assign_cell(lat, lon, res).unwrap();
                let ring = hex_boundary(cell);
                assert!(ring.len() >= 7);
                assert_eq!(ring.first(), ring.last());
                assert!(contains(&ring, lon, lat), "{lat},{lon} not in {cell}");
            }
        }
    }

    #[test]
    fn test_invalid_resolution() {
        let err = parse_resolution(16).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidResolution(16)));
    }

    #[test]
    fn test_missing_coordinates_get_no_cell() {
        let table = survey_table();
        let ids = assign_hex_ids(&table, &CoordinateSource::geographic("latitude", "longitude"), 8).unwrap();
        assert!(ids[2].is_none());
        assert_eq!(ids[0], ids[4]);
        assert!(ids.iter().enumerate().all(|(i, id)| i == 2 || id.is_some()));
    }

    #[test]
    fn test_hex_count_invariant() {
        let table = survey_table();
        let plan = AggregationPlan::new().with("sv", Reduction::Mean);
        let source = CoordinateSource::geographic("latitude", "longitude");
        for resolution in [2u8, 7, 12] {
            let agg = aggregate_by_hex(&table, &source, resolution, &plan).unwrap();
            assert_eq!(agg.total_rows(), 4);
        }
    }

    #[test]
    fn test_projected_source_matches_geographic() {
        let mut table = survey_table();
        let transformer = CoordinateTransformer::new("EPSG:4326", "EPSG:3857").unwrap();
        let (e, n) = transformer.forward_many(
            &table.column("longitude").unwrap().values.clone(),
            &table.column("latitude").unwrap().values.clone(),
        );
        table.push_column(Column::new("easting", e)).unwrap();
        table.push_column(Column::new("northing", n)).unwrap();

        let projected = CoordinateSource::Projected {
            easting_col: "easting",
            northing_col: "northing",
            transformer: &transformer,
        };
        let a = assign_hex_ids(&table, &projected, 9).unwrap();
        let b = assign_hex_ids(&table, &CoordinateSource::geographic("latitude", "longitude"), 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_boundary_wkt() {
        let cell = assign_cell(55.6, 12.9, parse_resolution(6).unwrap()).unwrap();
        let wkt = boundary_wkt(cell);
        assert!(wkt.starts_with("POLYGON(("));
        assert!(wkt.ends_with("))"));
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let table = survey_table();
        let source = CoordinateSource::geographic("lat", "lon");
        assert!(matches!(
            assign_hex_ids(&table, &source, 8),
            Err(AggregationError::Schema(_))
        ));
    }
}
