//! Tenant containment over materialized paths.
//!
//! Every tenant carries `path`, the dot-joined slugs of its ancestors and itself
//! (`root.acme.downtown`). Containment is a prefix test on that string; the
//! `active` flags of every tenant on the path must also hold, so a path match on
//! its own never grants anything.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::tenant::Tenant;

pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path segment must not be empty")]
    EmptySegment,
    #[error("path segment {0:?} contains characters outside [a-z0-9-]")]
    InvalidSegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantPath(String);

impl TenantPath {
    pub fn root(slug: &str) -> Result<Self, PathError> {
        validate_segment(slug)?;
        Ok(Self(slug.to_string()))
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        for segment in raw.split(PATH_SEPARATOR) {
            validate_segment(segment)?;
        }
        Ok(Self(raw.to_string()))
    }

    pub fn child(&self, slug: &str) -> Result<Self, PathError> {
        validate_segment(slug)?;
        Ok(Self(format!("{}{}{}", self.0, PATH_SEPARATOR, slug)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.split(PATH_SEPARATOR).count()
    }

    /// `other` equals this path or lies strictly below it.
    pub fn contains(&self, other: &TenantPath) -> bool {
        self == other || self.is_strict_ancestor_of(other)
    }

    pub fn is_strict_ancestor_of(&self, other: &TenantPath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0[self.0.len()..].starts_with(PATH_SEPARATOR)
    }

    /// Every path from the root down to and including this one.
    pub fn lineage(&self) -> Vec<TenantPath> {
        let mut out = Vec::with_capacity(self.depth());
        for (idx, c) in self.0.char_indices() {
            if c == PATH_SEPARATOR {
                out.push(TenantPath(self.0[..idx].to_string()));
            }
        }
        out.push(self.clone());
        out
    }
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

impl fmt::Display for TenantPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantPath::parse(&value)
    }
}

impl From<TenantPath> for String {
    fn from(value: TenantPath) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyViolation {
    #[error("tenant {target} is not within the subtree of tenant {actor}")]
    OutsideSubtree { actor: Uuid, target: Uuid },
    #[error("tenant {0} on the path is inactive")]
    InactiveTenant(Uuid),
    #[error("ancestor records of tenant {0} are missing")]
    BrokenLineage(Uuid),
}

/// Ok iff `target` is `actor` or a strict descendant of it, and every tenant on
/// the target's path is active.
///
/// `target_lineage` holds the tenants whose paths are prefixes of the target's
/// path (the target included), as returned by the store; order does not matter.
pub fn assert_hierarchy(
    actor: &Tenant,
    target: &Tenant,
    target_lineage: &[Tenant],
) -> Result<(), HierarchyViolation> {
    if actor.id != target.id {
        if !actor.tenant_type.can_have_children() || !actor.path.contains(&target.path) {
            return Err(HierarchyViolation::OutsideSubtree {
                actor: actor.id,
                target: target.id,
            });
        }
    } else if actor.path != target.path {
        return Err(HierarchyViolation::BrokenLineage(target.id));
    }

    assert_lineage_active(target, target_lineage)
}

/// Every prefix of the tenant's path resolves to a stored, active tenant.
pub fn assert_lineage_active(tenant: &Tenant, lineage: &[Tenant]) -> Result<(), HierarchyViolation> {
    let by_path: HashMap<&TenantPath, &Tenant> = lineage.iter().map(|t| (&t.path, t)).collect();

    for path in tenant.path.lineage() {
        let Some(node) = by_path.get(&path) else {
            return Err(HierarchyViolation::BrokenLineage(tenant.id));
        };
        if !node.active {
            return Err(HierarchyViolation::InactiveTenant(node.id));
        }
    }

    Ok(())
}

/// The tenants of `subtree` that `root` contains and that are reachable through
/// active tenants only. `root_lineage` is the root's own lineage; when it fails
/// the result is empty.
///
/// This is the same containment rule as [`assert_hierarchy`], applied to every
/// tenant of a subtree at once.
pub fn visible_subtree<'a>(
    root: &Tenant,
    root_lineage: &[Tenant],
    subtree: &'a [Tenant],
) -> Vec<&'a Tenant> {
    if assert_lineage_active(root, root_lineage).is_err() {
        return Vec::new();
    }

    let by_path: HashMap<&TenantPath, &Tenant> = subtree.iter().map(|t| (&t.path, t)).collect();
    let root_depth = root.path.depth();

    subtree
        .iter()
        .filter(|t| root.path.contains(&t.path))
        .filter(|t| {
            // Only the part of the lineage below the root needs checking here.
            t.path
                .lineage()
                .into_iter()
                .skip(root_depth)
                .all(|p| by_path.get(&p).map(|node| node.active).unwrap_or(false))
        })
        .collect()
}
