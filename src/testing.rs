//! Fixtures shared by the unit tests.

use crate::datastore::{Datastore, DatastoreError, Geometry, SqlValue};
use crate::feature_catalog::{FeatureCatalog, FeatureCatalogConfig};

pub const SAMPLE_CATALOG: &str = r#"
name: sample
feature_types:
  - name: Road
    table: road
    id: {column: id, sql_type: integer}
    envelope_property: geom
    properties:
      - name: name
        column: name
        sql_type: varchar
      - name: lanes
        column: lanes
        sql_type: integer
      - name: lane_count
        column: lanes
        sql_type: integer
      - name: label
        function:
          template: upper($1)
          params: [{field: name}]
          result_type: varchar
      - name: geom
        kind: geometry
        column: geom
        srs: EPSG:4326
        native_srs_code: 4326
      - name: owner
        kind: feature
        feature_type: Person
        relations:
          - from_table: road
            to_table: person
            columns: [[owner_id, id]]
      - name: maintainer
        kind: feature
        feature_type: Person
        external_links: true
        relations:
          - from_table: road
            to_table: person
            columns: [[maintainer_id, id]]
      - name: alias
        column: alias
        sql_type: varchar
        relations:
          - from_table: road
            to_table: road_alias
            columns: [[id, road_id]]
      - name: signs
        kind: feature
        feature_type: AbstractSign
        relations:
          - from_table: road
            to_table: road_sign
            columns: [[id, road_id]]
          - from_table: road_sign
            to_table: sign
            columns: [[sign_id, id]]

  - name: Person
    table: person
    id: {column: id, sql_type: integer}
    properties:
      - name: name
        column: name
        sql_type: varchar
      - name: home
        kind: geometry
        column: home
        srs: EPSG:4326
      - name: address
        kind: feature
        feature_type: Address
      - name: favourite_road
        kind: feature
        feature_type: Road
        relations:
          - from_table: person
            to_table: road
            columns: [[road_id, id]]

  - name: Address
    table: person
    id: {column: id, sql_type: integer}
    properties:
      - name: street
        column: street
        sql_type: varchar
      - name: city
        column: city
        sql_type: varchar

  - name: AbstractSign
    abstract: true

  - name: StopSign
    table: stop_sign
    substitution_group: AbstractSign
    id: {column: id, sql_type: integer}
    properties:
      - name: text
        column: text
        sql_type: varchar

  - name: YieldSign
    table: yield_sign
    substitution_group: AbstractSign
    id: {column: id, sql_type: integer}
    properties:
      - name: text
        column: text
        sql_type: varchar

  - name: SpeedSign
    table: speed_sign
    substitution_group: AbstractSign
    id: {column: id, sql_type: integer}
    properties:
      - name: limit
        column: speed_limit
        sql_type: integer
"#;

pub fn sample_catalog() -> FeatureCatalog {
    FeatureCatalogConfig::from_yaml_str(SAMPLE_CATALOG)
        .and_then(|config| config.build())
        .unwrap()
}

/// Datastore that exchanges geometries as WKT text and knows a transform function
#[derive(Debug, Clone, Copy, Default)]
pub struct TestDatastore;

impl Datastore for TestDatastore {
    fn name(&self) -> &str {
        "test"
    }

    fn decode_geometry(&self, value: &SqlValue, srs: &str) -> Result<Option<Geometry>, DatastoreError> {
        match value {
            SqlValue::Null => Ok(None),
            SqlValue::Text(wkt) => Geometry::from_wkt(srs, wkt.clone()).map(Some),
            other => Err(DatastoreError::InconsistentMapping(format!(
                "not a WKT geometry: {}",
                other
            ))),
        }
    }

    fn encode_geometry(&self, geometry: &Geometry) -> Result<SqlValue, DatastoreError> {
        Ok(SqlValue::Text(geometry.wkt.clone()))
    }

    fn transform_template(&self) -> Option<&str> {
        Some("ST_Transform($1,$2)")
    }
}
