//! Geographic enrichment of the establishment table.
//!
//! Lambert-93 (EPSG:2154) coordinates are projected back to WGS84 with the
//! ellipsoidal Lambert conformal conic formulas on GRS80, and the department
//! is derived from the INSEE commune code.

use crate::table::{cell_text, Table};
use crate::transform::fields::{
    CODE_COMMUNE, DEPARTEMENT, DEPT_ANOMALY, LAMBERT_X, LAMBERT_Y, LATITUDE, LONGITUDE,
};
use crate::transform::traits::{TransformError, TransformStage};
use serde_json::Value;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use tracing::{debug, warn};

// ============================================================================
// Projection
// ============================================================================

const GRS80_A: f64 = 6_378_137.0;
const GRS80_INV_F: f64 = 298.257_222_101;

const CONVERGENCE: f64 = 1e-12;
const MAX_ITERATIONS: usize = 30;

/// Ellipsoidal Lambert conformal conic with two standard parallels.
#[derive(Debug, Clone, Copy)]
pub struct LambertConformalConic {
    a: f64,
    e: f64,
    n: f64,
    f: f64,
    rho0: f64,
    lon0: f64,
    x0: f64,
    y0: f64,
}

impl LambertConformalConic {
    /// Builds the projection from parallels and origin given in degrees.
    pub fn new(lat1: f64, lat2: f64, lat0: f64, lon0: f64, x0: f64, y0: f64) -> Self {
        let a = GRS80_A;
        let flattening = 1.0 / GRS80_INV_F;
        let e = (flattening * (2.0 - flattening)).sqrt();

        let (phi1, phi2, phi0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let m = |phi: f64| phi.cos() / (1.0 - (e * phi.sin()).powi(2)).sqrt();
        let t = |phi: f64| {
            let es = e * phi.sin();
            (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
        };

        let n = (m(phi1).ln() - m(phi2).ln()) / (t(phi1).ln() - t(phi2).ln());
        let f = m(phi1) / (n * t(phi1).powf(n));
        let rho0 = a * f * t(phi0).powf(n);

        Self {
            a,
            e,
            n,
            f,
            rho0,
            lon0: lon0.to_radians(),
            x0,
            y0,
        }
    }

    /// RGF93 / Lambert-93.
    pub fn lambert93() -> Self {
        Self::new(44.0, 49.0, 46.5, 3.0, 700_000.0, 6_600_000.0)
    }

    /// Cone exponent `n`.
    pub fn n(&self) -> f64 {
        self.n
    }

    /// Projection constant `C`, the radius scale of the cone.
    pub fn c(&self) -> f64 {
        self.a * self.f
    }

    /// Northing of the cone apex.
    pub fn y_s(&self) -> f64 {
        self.y0 + self.rho0
    }

    /// Projected metres to `(longitude, latitude)` in degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.x0;
        let dy = self.rho0 - (y - self.y0);
        let rho = (dx * dx + dy * dy).sqrt();
        let theta = dx.atan2(dy);
        let t = (rho / (self.a * self.f)).powf(1.0 / self.n);

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..MAX_ITERATIONS {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            let delta = (next - phi).abs();
            phi = next;
            if delta < CONVERGENCE {
                break;
            }
        }

        let lambda = theta / self.n + self.lon0;
        (lambda.to_degrees(), phi.to_degrees())
    }

    /// `(longitude, latitude)` in degrees to projected metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let es = self.e * phi.sin();
        let t = (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0);
        let rho = self.a * self.f * t.powf(self.n);
        let theta = self.n * (lon.to_radians() - self.lon0);
        (
            self.x0 + rho * theta.sin(),
            self.y0 + self.rho0 - rho * theta.cos(),
        )
    }
}

// ============================================================================
// Cell Helpers
// ============================================================================

/// Reads a numeric cell stored either as a JSON number or as text.
fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn plausible(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && lon.abs() <= 180.0 && lat.abs() <= 90.0
}

/// Department code of an INSEE commune code.
///
/// Corsica (`2A`/`2B`) is checked first, overseas codes starting with `97`
/// or `98` keep three characters, everything else keeps two.
pub fn extract_departement(code_commune: &Value) -> Option<String> {
    let code = cell_text(code_commune)?;
    let code = code.trim();
    if code.is_empty() || code == "[ND]" {
        return None;
    }

    let upper = code.to_uppercase();
    for corsica in ["2A", "2B"] {
        if upper.starts_with(corsica) {
            return Some(corsica.to_string());
        }
    }
    let width = if code.starts_with("97") || code.starts_with("98") {
        3
    } else {
        2
    };
    Some(code.chars().take(width).collect())
}

// ============================================================================
// Stage
// ============================================================================

/// Adds `longitude`, `latitude`, `departement` and `dept_anomaly`.
///
/// Source coordinate columns are left untouched.
#[derive(Debug, Clone, Copy)]
pub struct GeoEnrich {
    projection: LambertConformalConic,
}

impl Default for GeoEnrich {
    fn default() -> Self {
        Self {
            projection: LambertConformalConic::lambert93(),
        }
    }
}

impl GeoEnrich {
    pub fn new() -> Self {
        Self::default()
    }

    fn project(&self, x: &Value, y: &Value) -> Option<(f64, f64)> {
        let (lon, lat) = self.projection.inverse(numeric(x)?, numeric(y)?);
        plausible(lon, lat).then_some((lon, lat))
    }

    fn add_coordinates(&self, table: &mut Table) {
        let (Some(xi), Some(yi)) = (table.column_index(LAMBERT_X), table.column_index(LAMBERT_Y))
        else {
            warn!("Lambert columns absent, coordinates left empty");
            table.fill_column(LONGITUDE, Value::Null);
            table.fill_column(LATITUDE, Value::Null);
            return;
        };

        let mut discarded = 0usize;
        let (lons, lats): (Vec<Value>, Vec<Value>) = table
            .rows()
            .map(|row| {
                let (x, y) = (row.get_at(xi), row.get_at(yi));
                match self.project(x, y) {
                    Some((lon, lat)) => (Value::from(lon), Value::from(lat)),
                    None => {
                        if numeric(x).is_some() && numeric(y).is_some() {
                            discarded += 1;
                        }
                        (Value::Null, Value::Null)
                    }
                }
            })
            .unzip();

        if discarded > 0 {
            warn!(discarded, "Out-of-range coordinates set to null");
        }
        table.set_column(LONGITUDE, lons);
        table.set_column(LATITUDE, lats);
    }

    fn add_departement(&self, table: &mut Table) {
        if !table.has_column(CODE_COMMUNE) {
            warn!("Commune code absent, every row flagged as anomaly");
            table.fill_column(DEPARTEMENT, Value::Null);
            table.fill_column(DEPT_ANOMALY, Value::Bool(true));
            return;
        }

        table.derive_column(CODE_COMMUNE, DEPARTEMENT, |code| {
            extract_departement(code).map_or(Value::Null, Value::String)
        });
        table.derive_column(DEPARTEMENT, DEPT_ANOMALY, |dept| Value::Bool(dept.is_null()));
    }
}

impl TransformStage for GeoEnrich {
    type Input = Table;
    type Output = Table;
    type Error = TransformError;

    fn execute(&self, mut table: Table) -> Result<Table, TransformError> {
        self.add_coordinates(&mut table);
        self.add_departement(&mut table);

        let located = table
            .column_values(LONGITUDE)
            .map_or(0, |values| values.filter(|v| !v.is_null()).count());
        debug!(rows = table.len(), located, "Geographic enrichment done");
        Ok(table)
    }

    fn stage_name(&self) -> &'static str {
        "geo_enrich"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(rows: Vec<(Value, Value, Value)>) -> Table {
        let mut t = Table::new(vec![
            "siret".to_string(),
            LAMBERT_X.to_string(),
            LAMBERT_Y.to_string(),
            CODE_COMMUNE.to_string(),
        ]);
        for (i, (x, y, commune)) in rows.into_iter().enumerate() {
            t.push_row(vec![json!(i.to_string()), x, y, commune]);
        }
        t
    }

    #[test]
    fn test_lambert93_constants_match_ign() {
        let projection = LambertConformalConic::lambert93();
        assert!((projection.n() - 0.725_607_765_053_267_0).abs() < 1e-12);
        assert!((projection.c() - 11_754_255.426_096).abs() < 1e-4);
        assert!((projection.y_s() - 12_655_612.049_876).abs() < 1e-4);
    }

    // Reference values from IGN's inverse algorithm with its published
    // Lambert-93 constants.
    #[test]
    fn test_known_points_within_micro_degree() {
        let projection = LambertConformalConic::lambert93();
        let fixtures = [
            ((651_523.5, 6_863_197.2), (2.339_181_535_011, 48.866_978_707_011)),
            ((1_043_744.0, 6_298_891.0), (7.265_794_210_371, 43.705_464_025_748)),
            ((352_000.0, 6_790_000.0), (-1.679_267_091_441, 48.117_543_324_516)),
        ];
        for ((x, y), (expected_lon, expected_lat)) in fixtures {
            let (lon, lat) = projection.inverse(x, y);
            assert!((lon - expected_lon).abs() < 1e-6, "({x}, {y}): lon = {lon}");
            assert!((lat - expected_lat).abs() < 1e-6, "({x}, {y}): lat = {lat}");
        }
    }

    #[test]
    fn test_origin_maps_to_projection_center() {
        let (lon, lat) = LambertConformalConic::lambert93().inverse(700_000.0, 6_600_000.0);
        assert!((lon - 3.0).abs() < 1e-6, "lon = {lon}");
        assert!((lat - 46.5).abs() < 1e-6, "lat = {lat}");
    }

    #[test]
    fn test_forward_inverse_round_trip() {
        let projection = LambertConformalConic::lambert93();
        let (x, y) = projection.forward(2.3522, 48.8566);
        let (lon, lat) = projection.inverse(x, y);
        assert!((lon - 2.3522).abs() < 1e-9);
        assert!((lat - 48.8566).abs() < 1e-9);
    }

    #[test]
    fn test_paris_coordinates() {
        let enriched = GeoEnrich::new()
            .execute(table(vec![(
                json!("651523.5"),
                json!("6863197.2"),
                json!("75102"),
            )]))
            .unwrap();
        let row = enriched.row(0).unwrap();
        let lon = row.get(LONGITUDE).and_then(Value::as_f64).unwrap();
        let lat = row.get(LATITUDE).and_then(Value::as_f64).unwrap();
        assert!((lon - 2.339_181_535).abs() < 1e-6, "lon = {lon}");
        assert!((lat - 48.866_978_707).abs() < 1e-6, "lat = {lat}");
        assert_eq!(row.text(DEPARTEMENT).as_deref(), Some("75"));
        assert_eq!(row.get(DEPT_ANOMALY), Some(&json!(false)));
        // Inputs are not rewritten
        assert_eq!(row.get(LAMBERT_X), Some(&json!("651523.5")));
    }

    #[test]
    fn test_missing_or_bad_coordinates_give_null() {
        let enriched = GeoEnrich::new()
            .execute(table(vec![
                (Value::Null, json!(6_600_000.0), json!("13055")),
                (json!("[ND]"), json!("6600000"), json!("13055")),
                (json!(699_999.0), json!(2.0e7), json!("13055")),
            ]))
            .unwrap();
        for row in enriched.rows() {
            assert_eq!(row.get(LONGITUDE), Some(&Value::Null));
            assert_eq!(row.get(LATITUDE), Some(&Value::Null));
        }
    }

    #[test]
    fn test_department_extraction() {
        let cases = [
            (json!("75102"), Some("75")),
            (json!("2A004"), Some("2A")),
            (json!("2b033"), Some("2B")),
            (json!("97411"), Some("974")),
            (json!("98735"), Some("987")),
            (json!(""), None),
            (json!("[ND]"), None),
            (Value::Null, None),
        ];
        for (code, expected) in cases {
            assert_eq!(
                extract_departement(&code).as_deref(),
                expected,
                "code {code}"
            );
        }
    }

    #[test]
    fn test_missing_commune_column_flags_every_row() {
        let mut t = Table::new(vec!["siret".to_string()]);
        t.push_row(vec![json!("1")]);
        t.push_row(vec![json!("2")]);
        let enriched = GeoEnrich::new().execute(t).unwrap();
        for row in enriched.rows() {
            assert_eq!(row.get(DEPARTEMENT), Some(&Value::Null));
            assert_eq!(row.get(DEPT_ANOMALY), Some(&json!(true)));
            assert_eq!(row.get(LONGITUDE), Some(&Value::Null));
        }
    }
}
