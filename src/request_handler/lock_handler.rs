//! Lock set computation and the in-memory lock registry.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::datastore::DatastoreError;
use crate::feature_catalog::FeatureId;
use crate::filter::Filter;

use super::RequestHandler;

/// Features of one type to lock; an abstract type locks all its concrete substitutions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub type_name: String,
    #[serde(default)]
    pub filter: Option<Filter>,
}

impl LockRequest {
    pub fn new(type_name: impl Into<String>, filter: Option<Filter>) -> Self {
        Self {
            type_name: type_name.into(),
            filter,
        }
    }
}

/// Expands a set of features to everything that must be locked along with them
pub trait ReachabilityClosure {
    fn expand(
        &self,
        handler: &mut RequestHandler<'_>,
        roots: BTreeSet<FeatureId>,
    ) -> Result<BTreeSet<FeatureId>, DatastoreError>;
}

/// Follows feature properties downwards until no new feature turns up
#[derive(Debug, Clone, Copy, Default)]
pub struct SubfeatureClosure;

impl ReachabilityClosure for SubfeatureClosure {
    fn expand(
        &self,
        handler: &mut RequestHandler<'_>,
        roots: BTreeSet<FeatureId>,
    ) -> Result<BTreeSet<FeatureId>, DatastoreError> {
        let mut pending: Vec<FeatureId> = roots.iter().cloned().collect();
        let mut reached = roots;
        while let Some(fid) = pending.pop() {
            for sub_fid in handler.determine_sub_features(&fid)?.into_values().flatten() {
                if reached.insert(sub_fid.clone()) {
                    pending.push(sub_fid);
                }
            }
        }
        Ok(reached)
    }
}

pub struct LockHandler<'h, 'a> {
    handler: &'h mut RequestHandler<'a>,
    closure: &'h dyn ReachabilityClosure,
}

impl<'h, 'a> LockHandler<'h, 'a> {
    pub fn new(handler: &'h mut RequestHandler<'a>, closure: &'h dyn ReachabilityClosure) -> Self {
        Self { handler, closure }
    }

    /// Ids of the matched features, their subfeatures and all features containing any of them
    pub fn resolve(&mut self, requests: &[LockRequest]) -> Result<BTreeSet<FeatureId>, DatastoreError> {
        let catalog = self.handler.catalog();
        let mut roots = BTreeSet::new();
        for request in requests {
            let ft = catalog.get(&request.type_name).ok_or_else(|| {
                DatastoreError::InvalidRequest(format!("Unknown feature type '{}'", request.type_name))
            })?;
            let targets = if ft.is_abstract {
                catalog.concrete_substitutions(&ft.name)
            } else {
                vec![ft]
            };
            for target in targets {
                roots.extend(self.handler.determine_affected_fids(target, request.filter.as_ref())?);
            }
        }
        let matched = roots.len();

        let mut locked = self.closure.expand(self.handler, roots)?;
        let with_subfeatures = locked.len();

        let mut pending: Vec<FeatureId> = locked.iter().cloned().collect();
        while let Some(fid) = pending.pop() {
            for super_fid in self.handler.determine_super_features(&fid)? {
                if locked.insert(super_fid.clone()) {
                    pending.push(super_fid);
                }
            }
        }

        log::debug!(
            "Lock set: {} matched, {} with subfeatures, {} with superfeatures",
            matched,
            with_subfeatures,
            locked.len()
        );
        Ok(locked)
    }
}

/// Which lock holds which feature
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locks: HashMap<FeatureId, String>,
}

impl LockTable {
    /// Lock all `fids` for `lock_id`, or none of them if another lock holds one
    pub fn acquire(
        &mut self,
        lock_id: &str,
        fids: impl IntoIterator<Item = FeatureId>,
    ) -> Result<(), DatastoreError> {
        let fids: Vec<FeatureId> = fids.into_iter().collect();
        if let Some((fid, holder)) = fids
            .iter()
            .find_map(|fid| self.lock_holder(fid).filter(|h| *h != lock_id).map(|h| (fid, h)))
        {
            return Err(DatastoreError::InvalidRequest(format!(
                "Feature {} is already locked by lock '{}'",
                fid, holder
            )));
        }
        for fid in fids {
            self.locks.insert(fid, lock_id.to_string());
        }
        Ok(())
    }

    /// Release every feature held by `lock_id`; returns how many were released
    pub fn release(&mut self, lock_id: &str) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, holder| holder != lock_id);
        before - self.locks.len()
    }

    pub fn lock_holder(&self, fid: &FeatureId) -> Option<&str> {
        self.locks.get(fid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
