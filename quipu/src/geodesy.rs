//! Reference-ellipsoid helpers and spatial-reference resolution.
//!
//! Spatial references are carried as PROJ.4 strings. `EPSG:<code>` is
//! resolved through the `crs-definitions` database; everything else is
//! passed to `proj4rs` unchanged.

use glam::DVec3;
use proj4rs::proj::Proj;

use crate::error::{QuipuError, Result};

/// A reference ellipsoid, by its semi-major and semi-minor axes in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub b: f64,
}

impl Ellipsoid {
    pub const GRS80: Self = Self {
        a: 6_378_137.0,
        b: 6_356_752.314_140_347,
    };
    pub const WGS84: Self = Self {
        a: 6_378_137.0,
        b: 6_356_752.314_245_179,
    };

    /// Build from the semi-major axis and inverse flattening.
    pub fn from_flattening(a: f64, rf: f64) -> Self {
        Self { a, b: a - a / rf }
    }

    pub const fn sphere(radius: f64) -> Self {
        Self {
            a: radius,
            b: radius,
        }
    }

    /// First eccentricity squared, `1 - b²/a²`.
    pub fn eccentricity_sq(&self) -> f64 {
        1.0 - (self.b * self.b) / (self.a * self.a)
    }

    /// Ellipsoid named by a PROJ `+ellps=` identifier.
    pub fn named(name: &str) -> Option<Self> {
        Some(match name {
            "GRS80" => Self::GRS80,
            "WGS84" => Self::WGS84,
            "WGS72" => Self::from_flattening(6_378_135.0, 298.26),
            "intl" => Self::from_flattening(6_378_388.0, 297.0),
            "bessel" => Self::from_flattening(6_377_397.155, 299.152_812_8),
            "krass" => Self::from_flattening(6_378_245.0, 298.3),
            "airy" => Self::from_flattening(6_377_563.396, 299.324_964_6),
            "clrk66" => Self {
                a: 6_378_206.4,
                b: 6_356_583.8,
            },
            "clrk80" => Self::from_flattening(6_378_249.145, 293.4663),
            "sphere" => Self::sphere(6_370_997.0),
            _ => return None,
        })
    }

    /// Ellipsoid implied by a PROJ `+datum=` identifier.
    fn of_datum(datum: &str) -> Option<Self> {
        match datum {
            "WGS84" => Some(Self::WGS84),
            "NAD83" | "GGRS87" => Some(Self::GRS80),
            "NAD27" => Self::named("clrk66"),
            "potsdam" | "hermannskogel" => Self::named("bessel"),
            "OSGB36" => Self::named("airy"),
            "ire65" => Some(Self::from_flattening(6_377_340.189, 299.324_964_6)),
            "nzgd49" | "ED50" => Self::named("intl"),
            _ => None,
        }
    }

    /// Read the ellipsoid out of a PROJ.4 definition.
    ///
    /// Explicit axes (`+R`, `+a` with `+b`, `+rf` or `+f`) win over `+ellps`,
    /// which wins over `+datum`. A definition naming none of them uses GRS80.
    pub fn from_proj_string(definition: &str) -> Result<Self> {
        let param = |key: &str| proj_param(definition, key);
        let number = |key: &str| -> Result<Option<f64>> {
            param(key)
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        QuipuError::Projection(format!("invalid +{key}={v} in \"{definition}\""))
                    })
                })
                .transpose()
        };

        if let Some(r) = number("R")? {
            return Ok(Self::sphere(r));
        }

        let named = param("ellps")
            .map(|name| {
                Self::named(name).ok_or_else(|| {
                    QuipuError::Projection(format!("unknown ellipsoid \"{name}\""))
                })
            })
            .transpose()?;

        if let Some(a) = number("a")? {
            if let Some(b) = number("b")? {
                return Ok(Self { a, b });
            }
            if let Some(rf) = number("rf")? {
                return Ok(Self::from_flattening(a, rf));
            }
            if let Some(f) = number("f")? {
                return Ok(Self { a, b: a * (1.0 - f) });
            }
            return Ok(match named {
                Some(e) => Self::from_flattening(a, e.a / (e.a - e.b)),
                None => Self::sphere(a),
            });
        }

        if let Some(e) = named {
            return Ok(e);
        }
        Ok(param("datum")
            .and_then(Self::of_datum)
            .unwrap_or(Self::GRS80))
    }

    /// Geodetic longitude/latitude (degrees) and ellipsoidal height to
    /// Earth-centred Cartesian coordinates.
    pub fn to_cartesian(&self, lon_deg: f64, lat_deg: f64, height: f64) -> DVec3 {
        let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
        let e2 = self.eccentricity_sq();
        let n = self.a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let hypc = (n + height) * cos_lat;
        DVec3::new(
            hypc * cos_lon,
            hypc * sin_lon,
            (n * (1.0 - e2) + height) * sin_lat,
        )
    }

    /// PROJ.4 definition of the geographic system on this ellipsoid.
    pub fn geographic_definition(&self) -> String {
        format!("+proj=longlat +a={} +b={} +no_defs", self.a, self.b)
    }
}

/// Value of `+key=value` in a PROJ.4 definition.
pub fn proj_param<'a>(definition: &'a str, key: &str) -> Option<&'a str> {
    definition.split_whitespace().find_map(|token| {
        token
            .strip_prefix('+')
            .and_then(|t| t.strip_prefix(key))
            .and_then(|t| t.strip_prefix('='))
    })
}

/// PROJ.4 string for an EPSG code from the crs-definitions database.
pub fn epsg_definition(code: u16) -> Option<&'static str> {
    crs_definitions::from_code(code).map(|def| def.proj4)
}

/// Resolve a spatial reference to a PROJ.4 definition.
///
/// Accepts `EPSG:<code>` or a PROJ.4 string.
///
/// # Errors
///
/// Returns [`QuipuError::Projection`] if the EPSG code is unknown or the
/// reference is neither form.
pub fn resolve_reference(reference: &str) -> Result<String> {
    let trimmed = reference.trim();
    if let Some(code) = trimmed
        .strip_prefix("EPSG:")
        .or_else(|| trimmed.strip_prefix("epsg:"))
    {
        let code: u16 = code
            .parse()
            .map_err(|_| QuipuError::Projection(format!("invalid EPSG code \"{code}\"")))?;
        return epsg_definition(code)
            .map(str::to_owned)
            .ok_or_else(|| {
                QuipuError::Projection(format!("EPSG:{code} is not in the crs-definitions database"))
            });
    }
    if trimmed.starts_with('+') {
        return Ok(trimmed.to_owned());
    }
    Err(QuipuError::Projection(format!(
        "unrecognised spatial reference \"{reference}\""
    )))
}

/// True for geographic (longitude/latitude) definitions.
pub fn is_geographic(definition: &str) -> bool {
    matches!(
        proj_param(definition, "proj"),
        Some("longlat" | "latlong" | "lonlat" | "latlon")
    )
}

/// Parse a definition with the projection backend.
pub fn parse_proj(definition: &str) -> Result<Proj> {
    Proj::from_proj_string(definition)
        .map_err(|e| QuipuError::Projection(format!("invalid definition \"{definition}\": {e:?}")))
}

/// Transform one point between two parsed systems.
///
/// Geographic coordinates are degrees on both sides.
pub fn transform_point(
    source: &Proj,
    source_geographic: bool,
    target: &Proj,
    target_geographic: bool,
    x: f64,
    y: f64,
) -> Result<(f64, f64)> {
    let mut point = if source_geographic {
        (x.to_radians(), y.to_radians(), 0.0)
    } else {
        (x, y, 0.0)
    };
    proj4rs::transform::transform(source, target, &mut point)
        .map_err(|e| QuipuError::Projection(format!("transform of ({x}, {y}) failed: {e:?}")))?;
    if target_geographic {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ellipsoid_from_definition() {
        let e = Ellipsoid::from_proj_string("+proj=longlat +a=3396190 +b=3376200 +no_defs").unwrap();
        assert_eq!(e, Ellipsoid { a: 3_396_190.0, b: 3_376_200.0 });

        let e = Ellipsoid::from_proj_string("+proj=utm +zone=33 +ellps=WGS84").unwrap();
        assert_eq!(e, Ellipsoid::WGS84);

        let e = Ellipsoid::from_proj_string("+proj=eqc +R=1737400").unwrap();
        assert_eq!(e, Ellipsoid::sphere(1_737_400.0));

        let e = Ellipsoid::from_proj_string("+proj=tmerc +datum=NAD27").unwrap();
        assert_relative_eq!(e.a, 6_378_206.4);

        let e = Ellipsoid::from_proj_string("+proj=longlat").unwrap();
        assert_eq!(e, Ellipsoid::GRS80);

        assert!(Ellipsoid::from_proj_string("+proj=longlat +ellps=nope").is_err());
        assert!(Ellipsoid::from_proj_string("+proj=longlat +a=abc").is_err());
    }

    #[test]
    fn test_to_cartesian() {
        let e = Ellipsoid::WGS84;
        let p = e.to_cartesian(0.0, 0.0, 0.0);
        assert_relative_eq!(p.x, e.a, epsilon = 1e-6);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-6);

        let pole = e.to_cartesian(0.0, 90.0, 100.0);
        assert_relative_eq!(pole.z, e.b + 100.0, epsilon = 1e-6);

        let east = e.to_cartesian(90.0, 0.0, 0.0);
        assert_relative_eq!(east.y, e.a, epsilon = 1e-6);
    }

    #[test]
    fn test_resolve_reference() {
        let wgs84 = resolve_reference("EPSG:4326").unwrap();
        assert!(is_geographic(&wgs84));

        let utm = resolve_reference("EPSG:32633").unwrap();
        assert!(!is_geographic(&utm));
        assert_eq!(proj_param(&utm, "zone"), Some("33"));

        assert_eq!(
            resolve_reference(" +proj=longlat +R=1 ").unwrap(),
            "+proj=longlat +R=1"
        );
        assert!(resolve_reference("EPSG:notanumber").is_err());
        assert!(resolve_reference("WGS 84").is_err());
    }

    #[test]
    fn test_transform_point_roundtrip() {
        let geo = parse_proj("+proj=longlat +ellps=WGS84 +no_defs").unwrap();
        let utm = parse_proj("+proj=utm +zone=33 +ellps=WGS84 +units=m +no_defs").unwrap();

        let (x, y) = transform_point(&geo, true, &utm, false, 15.0, 45.0).unwrap();
        // Zone 33 central meridian is 15°E, so the false easting comes out.
        assert_relative_eq!(x, 500_000.0, epsilon = 1e-3);

        let (lon, lat) = transform_point(&utm, false, &geo, true, x, y).unwrap();
        assert_relative_eq!(lon, 15.0, epsilon = 1e-8);
        assert_relative_eq!(lat, 45.0, epsilon = 1e-8);
    }
}
