//! Geometries as handed out by the geometry decoding hook.
//!
//! The engine itself never interprets geometries beyond their bounding
//! envelope, so the abstract representation is WKT text tagged with the
//! coordinate system it is expressed in.

use serde::{Deserialize, Serialize};

use super::errors::DatastoreError;

const GEOMETRY_TAGS: [&str; 7] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Axis-aligned bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    #[serde(default)]
    pub srs: Option<String>,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            srs: None,
        }
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = Some(srs.into());
        self
    }

    /// Smallest envelope containing both `self` and `other`
    pub fn merge(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            srs: self.srs.clone().or_else(|| other.srs.clone()),
        }
    }

    /// Closed ring polygon covering the envelope
    pub fn to_geometry(&self) -> Geometry {
        let wkt = format!(
            "POLYGON(({minx} {miny},{maxx} {miny},{maxx} {maxy},{minx} {maxy},{minx} {miny}))",
            minx = self.min_x,
            miny = self.min_y,
            maxx = self.max_x,
            maxy = self.max_y
        );
        Geometry {
            srs: self.srs.clone().unwrap_or_default(),
            wkt,
        }
    }
}

/// A geometry value in a known coordinate system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub srs: String,
    pub wkt: String,
}

impl Geometry {
    pub fn from_wkt(srs: impl Into<String>, wkt: impl Into<String>) -> Result<Self, DatastoreError> {
        let wkt = wkt.into();
        let tag = wkt
            .trim_start()
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if !GEOMETRY_TAGS.contains(&tag.as_str()) {
            return Err(DatastoreError::InconsistentMapping(format!(
                "Cannot decode geometry: '{}' is not a WKT geometry",
                truncate(&wkt, 40)
            )));
        }
        Ok(Self {
            srs: srs.into(),
            wkt,
        })
    }

    /// Bounding envelope of all coordinates, or `None` for an empty geometry
    pub fn envelope(&self) -> Option<Envelope> {
        let body = match self.wkt.find('(') {
            Some(start) => &self.wkt[start..],
            None => return None,
        };

        let mut envelope: Option<Envelope> = None;
        for tuple in body.split(|c| c == '(' || c == ')' || c == ',') {
            let mut ordinates = tuple.split_whitespace().map(str::parse::<f64>);
            let (Some(Ok(x)), Some(Ok(y))) = (ordinates.next(), ordinates.next()) else {
                continue;
            };
            envelope = Some(match envelope {
                Some(env) => Envelope {
                    min_x: env.min_x.min(x),
                    min_y: env.min_y.min(y),
                    max_x: env.max_x.max(x),
                    max_y: env.max_y.max(y),
                    srs: env.srs,
                },
                None => Envelope::new(x, y, x, y).with_srs(self.srs.clone()),
            });
        }
        envelope
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
