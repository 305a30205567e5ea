//! Request-scoped assembly state.

use std::collections::{HashMap, HashSet};

use crate::feature::{Feature, FeatureArena, FeatureHandle, FeatureProperty, PropertyValue};
use crate::feature_catalog::FeatureId;

use super::fetch_planner::GeometryTransforms;

/// Placeholder left in `owner` for a feature that was still in generation
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeferredReference {
    owner: FeatureHandle,
    target: FeatureId,
}

/// Features of one request, in generation or complete.
///
/// A feature gets its handle when its assembly starts, so a handle is stable
/// even while the feature is still being built. References to such a feature
/// are recorded and resolved in [`AssemblyContext::resolve_deferred`].
#[derive(Debug, Default)]
pub struct AssemblyContext {
    features: Vec<Feature>,
    feature_map: HashMap<FeatureId, FeatureHandle>,
    in_generation: HashSet<FeatureId>,
    deferred: Vec<DeferredReference>,
    pub transforms: GeometryTransforms,
}

impl AssemblyContext {
    pub fn new(transforms: GeometryTransforms) -> Self {
        Self {
            transforms,
            ..Default::default()
        }
    }

    /// Handle of `id`, complete or still in generation
    pub fn handle(&self, id: &FeatureId) -> Option<FeatureHandle> {
        self.feature_map.get(id).copied()
    }

    /// Property value referring to an already known feature.
    ///
    /// Returns `None` if `target` has not been seen yet and must be assembled.
    pub fn reference(&mut self, owner: FeatureHandle, target: &FeatureId) -> Option<PropertyValue> {
        if self.in_generation.contains(target) {
            log::debug!("Deferring reference from {} to {}", self.features[owner.0].id, target);
            self.deferred.push(DeferredReference {
                owner,
                target: target.clone(),
            });
            return Some(PropertyValue::Pending(target.clone()));
        }
        self.feature_map
            .get(target)
            .map(|handle| PropertyValue::Feature(*handle))
    }

    /// Start assembling `id` and reserve its handle
    pub fn begin(&mut self, id: FeatureId) -> FeatureHandle {
        let handle = FeatureHandle(self.features.len());
        self.features.push(Feature::new(id.clone()));
        self.feature_map.insert(id.clone(), handle);
        self.in_generation.insert(id);
        handle
    }

    pub fn complete(&mut self, handle: FeatureHandle, properties: Vec<FeatureProperty>) {
        let feature = &mut self.features[handle.0];
        feature.properties = properties;
        self.in_generation.remove(&feature.id);
    }

    pub fn feature(&self, handle: FeatureHandle) -> Option<&Feature> {
        self.features.get(handle.0)
    }

    pub fn feature_mut(&mut self, handle: FeatureHandle) -> Option<&mut Feature> {
        self.features.get_mut(handle.0)
    }

    /// Replace every recorded placeholder with the completed feature
    pub fn resolve_deferred(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            let Some(target) = self.feature_map.get(&deferred.target).copied() else {
                log::warn!(
                    "Deferred reference to {} cannot be resolved: the feature was never assembled",
                    deferred.target
                );
                continue;
            };
            let owner = &mut self.features[deferred.owner.0];
            for property in &mut owner.properties {
                if matches!(&property.value, PropertyValue::Pending(id) if *id == deferred.target) {
                    property.value = PropertyValue::Feature(target);
                }
            }
        }
    }

    pub fn into_arena(self) -> FeatureArena {
        FeatureArena::new(self.features)
    }
}
