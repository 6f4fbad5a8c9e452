//! Role hierarchy as an explicit DAG.
//!
//! Parent edges are validated when the graph is built: unknown parents and
//! cycles are configuration errors, surfaced before any evaluation happens.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use palisade_core::CoreError;

use crate::roles::{RoleCode, RoleRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleGraphError {
    #[error("duplicate role '{0}'")]
    Duplicate(RoleCode),

    #[error("role '{0}' references unknown parent '{1}'")]
    UnknownParent(RoleCode, RoleCode),

    #[error("role hierarchy contains a cycle through '{0}'")]
    Cycle(RoleCode),
}

impl From<RoleGraphError> for CoreError {
    fn from(err: RoleGraphError) -> Self {
        CoreError::validation(err.to_string())
    }
}

/// Validated role DAG for one tenant.
#[derive(Debug, Clone)]
pub struct RoleGraph {
    roles: HashMap<RoleCode, RoleRecord>,
}

impl RoleGraph {
    /// Build and validate the graph from tenant role records.
    ///
    /// Inactive roles are kept as nodes (their edges must still be sound) but
    /// are skipped during resolution.
    pub fn build(records: Vec<RoleRecord>) -> Result<Self, RoleGraphError> {
        let mut roles: HashMap<RoleCode, RoleRecord> = HashMap::with_capacity(records.len());
        for record in records {
            if roles.contains_key(&record.code) {
                return Err(RoleGraphError::Duplicate(record.code));
            }
            roles.insert(record.code.clone(), record);
        }

        for record in roles.values() {
            for parent in &record.parents {
                if !roles.contains_key(parent) {
                    return Err(RoleGraphError::UnknownParent(
                        record.code.clone(),
                        parent.clone(),
                    ));
                }
            }
        }

        let graph = Self { roles };
        graph.check_cycles()?;
        Ok(graph)
    }

    fn check_cycles(&self) -> Result<(), RoleGraphError> {
        // DFS coloring: 0 = unvisited, 1 = on stack, 2 = done.
        let mut color: HashMap<&RoleCode, u8> = HashMap::new();
        for code in self.roles.keys() {
            self.visit(code, &mut color)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        code: &'a RoleCode,
        color: &mut HashMap<&'a RoleCode, u8>,
    ) -> Result<(), RoleGraphError> {
        match color.get(code) {
            Some(1) => return Err(RoleGraphError::Cycle(code.clone())),
            Some(2) => return Ok(()),
            _ => {}
        }
        color.insert(code, 1);
        if let Some(record) = self.roles.get(code) {
            for parent in &record.parents {
                self.visit(parent, color)?;
            }
        }
        color.insert(code, 2);
        Ok(())
    }

    pub fn get(&self, code: &RoleCode) -> Option<&RoleRecord> {
        self.roles.get(code)
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleRecord> {
        self.roles.values()
    }

    /// All transitive ancestors of `code`, active roles only, deduplicated.
    pub fn ancestors(&self, code: &RoleCode) -> Vec<RoleCode> {
        let mut seen: HashSet<RoleCode> = HashSet::new();
        let mut stack: Vec<&RoleCode> = self
            .roles
            .get(code)
            .map(|r| r.parents.iter().collect())
            .unwrap_or_default();
        let mut out = Vec::new();

        while let Some(parent) = stack.pop() {
            if !seen.insert(parent.clone()) {
                continue;
            }
            if let Some(record) = self.roles.get(parent) {
                if record.is_active {
                    out.push(parent.clone());
                }
                stack.extend(record.parents.iter());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::TenantId;

    fn role(tenant: TenantId, code: &'static str) -> RoleRecord {
        RoleRecord::new(tenant, RoleCode::new(code), code)
    }

    #[test]
    fn ancestors_are_transitive_and_deduplicated() {
        let tenant = TenantId::new();
        let graph = RoleGraph::build(vec![
            role(tenant, "owner"),
            role(tenant, "admin").with_parent(RoleCode::new("owner")),
            role(tenant, "manager")
                .with_parent(RoleCode::new("admin"))
                .with_parent(RoleCode::new("owner")),
        ])
        .unwrap();

        let mut ancestors = graph.ancestors(&RoleCode::new("manager"));
        ancestors.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ancestors, vec![RoleCode::new("admin"), RoleCode::new("owner")]);
    }

    #[test]
    fn inactive_ancestor_is_skipped() {
        let tenant = TenantId::new();
        let mut owner = role(tenant, "owner");
        owner.is_active = false;

        let graph = RoleGraph::build(vec![
            owner,
            role(tenant, "admin").with_parent(RoleCode::new("owner")),
        ])
        .unwrap();

        assert!(graph.ancestors(&RoleCode::new("admin")).is_empty());
    }

    #[test]
    fn cycle_is_rejected() {
        let tenant = TenantId::new();
        let err = RoleGraph::build(vec![
            role(tenant, "a").with_parent(RoleCode::new("b")),
            role(tenant, "b").with_parent(RoleCode::new("a")),
        ])
        .unwrap_err();

        assert!(matches!(err, RoleGraphError::Cycle(_)));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let tenant = TenantId::new();
        let err =
            RoleGraph::build(vec![role(tenant, "a").with_parent(RoleCode::new("a"))])
                .unwrap_err();
        assert!(matches!(err, RoleGraphError::Cycle(_)));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let tenant = TenantId::new();
        let err =
            RoleGraph::build(vec![role(tenant, "a").with_parent(RoleCode::new("ghost"))])
                .unwrap_err();
        assert!(matches!(err, RoleGraphError::UnknownParent(_, _)));
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let tenant = TenantId::new();
        let err = RoleGraph::build(vec![role(tenant, "a"), role(tenant, "a")]).unwrap_err();
        assert!(matches!(err, RoleGraphError::Duplicate(_)));
    }
}
