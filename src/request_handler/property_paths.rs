//! Requested property paths and their resolution against feature types.
//!
//! A path is a `/`-separated list of steps, e.g. `owner/Person/name`. Steps
//! naming a feature type (the current type, or the request alias for it)
//! are skipped; the remaining steps are property names. A property requested
//! without further steps is fetched completely.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feature_catalog::{CatalogError, FeatureType, PropertyType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PropertyPath {
    steps: Vec<String>,
}

impl PropertyPath {
    pub fn parse(path: &str) -> Self {
        Self {
            steps: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn first(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }

    fn tail(&self) -> PropertyPath {
        PropertyPath {
            steps: self.steps.iter().skip(1).cloned().collect(),
        }
    }
}

impl From<String> for PropertyPath {
    fn from(value: String) -> Self {
        PropertyPath::parse(&value)
    }
}

impl From<&str> for PropertyPath {
    fn from(value: &str) -> Self {
        PropertyPath::parse(value)
    }
}

impl From<PropertyPath> for String {
    fn from(value: PropertyPath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.steps.join("/"))
    }
}

/// A property to fetch and the paths requested below it (empty: everything)
#[derive(Debug, Clone)]
pub struct RequestedProperty<'c> {
    pub property: &'c PropertyType,
    pub sub_paths: Vec<PropertyPath>,
}

fn names_type(step: &str, ft: &FeatureType, alias: Option<&str>) -> bool {
    step == ft.name || Some(step) == alias
}

/// Select the properties of `ft` to fetch for `paths`.
///
/// With `require_prefix`, only paths starting with the type name or `alias`
/// apply (joined requests); otherwise the prefix is optional. When no path
/// applies, every property is fetched. Result order follows the declaration
/// order of the properties.
pub fn determine_fetch_properties<'c>(
    ft: &'c FeatureType,
    alias: Option<&str>,
    paths: &[PropertyPath],
    require_prefix: bool,
) -> Result<Vec<RequestedProperty<'c>>, CatalogError> {
    let mut applicable = Vec::new();
    for path in paths {
        match path.first() {
            Some(step) if names_type(step, ft, alias) => {
                let tail = path.tail();
                if tail.is_empty() {
                    // the whole feature was requested
                    return Ok(all_properties(ft));
                }
                applicable.push(tail);
            }
            Some(_) if !require_prefix => applicable.push(path.clone()),
            _ => {}
        }
    }
    if applicable.is_empty() {
        return Ok(all_properties(ft));
    }

    let mut selected: Vec<(usize, Vec<PropertyPath>, bool)> = Vec::new();
    for path in applicable {
        let Some(name) = path.first() else { continue };
        let index = ft
            .properties
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CatalogError::UnknownProperty {
                type_name: ft.name.clone(),
                property: name.to_string(),
            })?;
        let tail = path.tail();
        match selected.iter_mut().find(|(i, _, _)| *i == index) {
            Some((_, sub_paths, complete)) => {
                *complete |= tail.is_empty();
                sub_paths.push(tail);
            }
            None => selected.push((index, vec![tail.clone()], tail.is_empty())),
        }
    }
    selected.sort_by_key(|(i, _, _)| *i);

    Ok(selected
        .into_iter()
        .map(|(index, sub_paths, complete)| RequestedProperty {
            property: &ft.properties[index],
            sub_paths: if complete { Vec::new() } else { sub_paths },
        })
        .collect())
}

fn all_properties(ft: &FeatureType) -> Vec<RequestedProperty<'_>> {
    ft.properties
        .iter()
        .map(|property| RequestedProperty {
            property,
            sub_paths: Vec::new(),
        })
        .collect()
}

/// Paths below a feature property, with a leading step naming `sub_ft` removed
pub fn determine_sub_property_paths(sub_ft: &FeatureType, paths: &[PropertyPath]) -> Vec<PropertyPath> {
    let mut result = Vec::with_capacity(paths.len());
    for path in paths {
        let path = match path.first() {
            Some(step) if step == sub_ft.name => path.tail(),
            _ => path.clone(),
        };
        if path.is_empty() {
            return Vec::new();
        }
        result.push(path);
    }
    result
}
