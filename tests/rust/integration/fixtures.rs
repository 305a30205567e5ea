//! Road network fixture shared by the integration tests.

use featurestore::config::EngineConfig;
use featurestore::datastore::sqlite::{SqliteConnection, SqliteDatastore};
use featurestore::feature_catalog::{FeatureCatalogConfig, FeatureId};
use featurestore::FeatureStore;

pub const CATALOG: &str = r#"
name: roads
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
      - name: lake
        kind: feature
        feature_type: Lake
        relations:
          - from_table: road
            to_table: water
            columns: [[lake_id, id]]

  - name: Person
    table: person
    id: {column: id, sql_type: integer}
    properties:
      - name: name
        column: name
        sql_type: varchar
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

  - name: Lake
    table: water
    several_implementations: true
    id: {column: id, sql_type: integer}
    properties:
      - name: name
        column: name
        sql_type: varchar
      - name: shore
        kind: feature
        feature_type: Road
        relations:
          - from_table: water
            to_table: road
            columns: [[road_id, id]]

  - name: Pond
    table: water
    several_implementations: true
    id: {column: id, sql_type: integer}
    properties:
      - name: name
        column: name
        sql_type: varchar
      - name: shore
        kind: feature
        feature_type: Road
        relations:
          - from_table: water
            to_table: road
            columns: [[road_id, id]]
"#;

const DATA: &str = "
CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT, street TEXT, city TEXT, road_id INTEGER);
CREATE TABLE road (
    id INTEGER PRIMARY KEY, name TEXT, lanes INTEGER, geom TEXT,
    owner_id INTEGER, maintainer_id INTEGER, maintainer_id_external TEXT, lake_id INTEGER
);
CREATE TABLE road_alias (road_id INTEGER, alias TEXT);
CREATE TABLE road_sign (road_id INTEGER, sign_id INTEGER, featuretype TEXT);
CREATE TABLE stop_sign (id INTEGER PRIMARY KEY, text TEXT);
CREATE TABLE yield_sign (id INTEGER PRIMARY KEY, text TEXT);
CREATE TABLE speed_sign (id INTEGER PRIMARY KEY, speed_limit INTEGER);

INSERT INTO person VALUES (1, 'Ada', 'Main Street', 'Bern', 10);
INSERT INTO person VALUES (2, 'Bob', NULL, NULL, NULL);

INSERT INTO road VALUES (10, 'A1', 2, 'LINESTRING(0 0,4 2)', 1, NULL, 'http://example.org/people/9', 2);
INSERT INTO road VALUES (11, 'Bypass', 1, 'LINESTRING(1 1,2 5)', 2, 1, NULL, 1);
INSERT INTO road VALUES (12, 'Coast', 4, NULL, NULL, NULL, NULL, NULL);

INSERT INTO road_alias VALUES (10, 'Autobahn');
INSERT INTO road_alias VALUES (10, 'Motorway');

INSERT INTO road_sign VALUES (10, 100, 'StopSign');
INSERT INTO road_sign VALUES (10, 200, 'SpeedSign');
INSERT INTO road_sign VALUES (11, 100, 'YieldSign');

INSERT INTO stop_sign VALUES (100, 'Stop');
INSERT INTO yield_sign VALUES (100, 'Yield');
INSERT INTO speed_sign VALUES (200, 80);

-- road 10 points its lake at a pond, which no lake shares an id with
CREATE TABLE water (id INTEGER PRIMARY KEY, featuretype TEXT, name TEXT, road_id INTEGER);
INSERT INTO water VALUES (1, 'Lake', 'Blue Lake', NULL);
INSERT INTO water VALUES (2, 'Pond', 'Mill Pond', 10);
INSERT INTO water VALUES (3, 'Lake', 'Deep Lake', NULL);
";

pub fn store() -> FeatureStore {
    let catalog = FeatureCatalogConfig::from_yaml_str(CATALOG)
        .and_then(|config| config.build())
        .expect("fixture catalog is valid");
    FeatureStore::new(catalog, SqliteDatastore::new(), EngineConfig::default())
}

pub fn connection() -> SqliteConnection {
    let conn = SqliteConnection::open_in_memory().expect("in-memory database");
    conn.execute_batch(DATA).expect("fixture data loads");
    conn
}

pub fn fid(store: &FeatureStore, id: &str) -> FeatureId {
    store.parse_feature_id(id).expect("fixture id parses")
}
