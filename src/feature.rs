//! Materialized features.
//!
//! Features of one request live in an arena and refer to each other through
//! [`FeatureHandle`]s, so a feature referenced from several places (or from
//! itself) exists exactly once.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::datastore::{Envelope, Geometry, SqlValue};
use crate::feature_catalog::FeatureId;

/// Index of a feature in the arena of its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FeatureHandle(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(SqlValue),
    Geometry(Geometry),
    Envelope(Envelope),
    Feature(FeatureHandle),
    /// Feature still in generation; replaced once the request completes
    Pending(FeatureId),
    /// URL of a feature stored elsewhere
    ExternalReference(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureProperty {
    pub name: String,
    pub value: PropertyValue,
}

impl FeatureProperty {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub properties: Vec<FeatureProperty>,
}

impl Feature {
    pub fn new(id: FeatureId) -> Self {
        Self {
            id,
            properties: Vec::new(),
        }
    }

    /// First value of the property `name`
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// All values of the property `name`, in assembly order
    pub fn properties_named<'f>(&'f self, name: &'f str) -> impl Iterator<Item = &'f PropertyValue> + 'f {
        self.properties
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| &p.value)
    }

    /// Merged envelope of the geometries of property `name`
    pub fn geometry_envelope(&self, name: &str) -> Option<Envelope> {
        self.properties_named(name)
            .filter_map(|value| match value {
                PropertyValue::Geometry(g) => g.envelope().map(|e| e.with_srs(g.srs.clone())),
                _ => None,
            })
            .reduce(|acc, e| acc.merge(&e))
    }
}

/// Arena of the features assembled by one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureArena {
    features: Vec<Feature>,
}

impl FeatureArena {
    pub(crate) fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn get(&self, handle: FeatureHandle) -> Option<&Feature> {
        self.features.get(handle.0)
    }

    pub fn find(&self, id: &FeatureId) -> Option<FeatureHandle> {
        self.features
            .iter()
            .position(|f| &f.id == id)
            .map(FeatureHandle)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// JSON form of a feature with nested features inlined.
    ///
    /// A feature already being written further up is emitted as `{"ref": id}`.
    pub fn to_json(&self, handle: FeatureHandle) -> Value {
        let mut path = HashSet::new();
        self.feature_json(handle, &mut path)
    }

    fn feature_json(&self, handle: FeatureHandle, path: &mut HashSet<FeatureHandle>) -> Value {
        let Some(feature) = self.get(handle) else {
            return Value::Null;
        };
        if !path.insert(handle) {
            return json!({ "ref": feature.id.to_string() });
        }

        let mut properties = Map::new();
        for property in &feature.properties {
            let value = self.value_json(&property.value, path);
            match properties.get_mut(&property.name) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    properties.insert(property.name.clone(), value);
                }
            }
        }
        path.remove(&handle);
        json!({ "id": feature.id.to_string(), "properties": properties })
    }

    fn value_json(&self, value: &PropertyValue, path: &mut HashSet<FeatureHandle>) -> Value {
        match value {
            PropertyValue::Scalar(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            PropertyValue::Geometry(g) => json!({ "srs": g.srs, "wkt": g.wkt }),
            PropertyValue::Envelope(e) => serde_json::to_value(e).unwrap_or(Value::Null),
            PropertyValue::Feature(handle) => self.feature_json(*handle, path),
            PropertyValue::Pending(id) => json!({ "ref": id.to_string() }),
            PropertyValue::ExternalReference(url) => json!({ "href": url }),
        }
    }
}

/// Result of a single-type query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    arena: FeatureArena,
    roots: Vec<FeatureHandle>,
}

impl FeatureCollection {
    pub(crate) fn new(arena: FeatureArena, roots: Vec<FeatureHandle>) -> Self {
        Self { arena, roots }
    }

    pub fn arena(&self) -> &FeatureArena {
        &self.arena
    }

    pub fn roots(&self) -> &[FeatureHandle] {
        &self.roots
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.roots.iter().filter_map(|h| self.arena.get(*h))
    }

    pub fn ids(&self) -> Vec<FeatureId> {
        self.features().map(|f| f.id.clone()).collect()
    }

    pub fn get(&self, handle: FeatureHandle) -> Option<&Feature> {
        self.arena.get(handle)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.roots.iter().map(|h| self.arena.to_json(*h)).collect())
    }
}

/// Result of a join query: one feature per requested type and row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleCollection {
    arena: FeatureArena,
    tuples: Vec<Vec<FeatureHandle>>,
}

impl TupleCollection {
    pub(crate) fn new(arena: FeatureArena, tuples: Vec<Vec<FeatureHandle>>) -> Self {
        Self { arena, tuples }
    }

    pub fn arena(&self) -> &FeatureArena {
        &self.arena
    }

    pub fn tuples(&self) -> &[Vec<FeatureHandle>] {
        &self.tuples
    }

    pub fn tuple_ids(&self) -> Vec<Vec<FeatureId>> {
        self.tuples
            .iter()
            .map(|t| {
                t.iter()
                    .filter_map(|h| self.arena.get(*h))
                    .map(|f| f.id.clone())
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.tuples
                .iter()
                .map(|t| Value::Array(t.iter().map(|h| self.arena.to_json(*h)).collect()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Features(FeatureCollection),
    Tuples(TupleCollection),
    Count(u64),
}

impl QueryResult {
    pub fn to_json(&self) -> Value {
        match self {
            QueryResult::Features(features) => features.to_json(),
            QueryResult::Tuples(tuples) => tuples.to_json(),
            QueryResult::Count(count) => json!({ "count": count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_catalog;

    fn fid(type_name: &str, id: i64) -> FeatureId {
        let catalog = sample_catalog();
        FeatureId::new(catalog.feature_type(type_name).unwrap(), vec![SqlValue::Integer(id)]).unwrap()
    }

    #[test]
    fn test_cyclic_features_serialize_with_refs() {
        let mut road = Feature::new(fid("Road", 1));
        road.properties.push(FeatureProperty::new("name", PropertyValue::Scalar("A1".into())));
        road.properties.push(FeatureProperty::new("owner", PropertyValue::Feature(FeatureHandle(1))));
        let mut person = Feature::new(fid("Person", 7));
        person
            .properties
            .push(FeatureProperty::new("favourite_road", PropertyValue::Feature(FeatureHandle(0))));

        let collection = FeatureCollection::new(FeatureArena::new(vec![road, person]), vec![FeatureHandle(0)]);
        let json = collection.to_json();
        assert_eq!(json[0]["id"], "Road:1");
        assert_eq!(json[0]["properties"]["name"], "A1");
        assert_eq!(json[0]["properties"]["owner"]["id"], "Person:7");
        assert_eq!(
            json[0]["properties"]["owner"]["properties"]["favourite_road"],
            json!({"ref": "Road:1"})
        );
    }

    #[test]
    fn test_repeated_properties_become_arrays() {
        let mut road = Feature::new(fid("Road", 1));
        road.properties.push(FeatureProperty::new("alias", PropertyValue::Scalar("B1".into())));
        road.properties.push(FeatureProperty::new("alias", PropertyValue::Scalar("B2".into())));
        road.properties.push(FeatureProperty::new(
            "maintainer",
            PropertyValue::ExternalReference("http://example.org/p/1".to_string()),
        ));
        let arena = FeatureArena::new(vec![road]);
        let json = arena.to_json(FeatureHandle(0));
        assert_eq!(json["properties"]["alias"], json!(["B1", "B2"]));
        assert_eq!(json["properties"]["maintainer"]["href"], "http://example.org/p/1");
    }

    #[test]
    fn test_geometry_envelope_merges_values() {
        let mut road = Feature::new(fid("Road", 1));
        for wkt in ["LINESTRING(0 0,1 1)", "POINT(5 -2)"] {
            road.properties.push(FeatureProperty::new(
                "geom",
                PropertyValue::Geometry(Geometry::from_wkt("EPSG:4326", wkt).unwrap()),
            ));
        }
        let envelope = road.geometry_envelope("geom").unwrap();
        assert_eq!(
            (envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y),
            (0.0, -2.0, 5.0, 1.0)
        );
        assert_eq!(envelope.srs.as_deref(), Some("EPSG:4326"));
        assert!(road.geometry_envelope("name").is_none());
    }
}
