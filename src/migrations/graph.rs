//! Dependency graph over migration units.
//!
//! Plans are deterministic: parents are visited in key order, so two runs over
//! the same set of units always produce the same sequence.

use std::collections::{BTreeMap, BTreeSet};

use super::{Migration, MigrationKey};
use crate::error::MigrationError;
use crate::schema::ProjectState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

pub struct MigrationGraph {
    nodes: BTreeMap<MigrationKey, Migration>,
    children: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
}

impl MigrationGraph {
    /// Build the graph, rejecting dependencies on unknown units and cycles.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let nodes: BTreeMap<MigrationKey, Migration> = migrations
            .into_iter()
            .map(|m| (m.key.clone(), m))
            .collect();

        let mut children: BTreeMap<MigrationKey, BTreeSet<MigrationKey>> = BTreeMap::new();
        for (key, migration) in &nodes {
            for parent in &migration.dependencies {
                if !nodes.contains_key(parent) {
                    return Err(MigrationError::NodeNotFound {
                        child: key.clone(),
                        parent: parent.clone(),
                    });
                }
                children.entry(parent.clone()).or_default().insert(key.clone());
            }
        }

        let graph = Self { nodes, children };
        graph.ensure_acyclic()?;
        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<(), MigrationError> {
        let mut marks: BTreeMap<&MigrationKey, Mark> = BTreeMap::new();
        for key in self.nodes.keys() {
            self.visit_for_cycles(key, &mut marks)?;
        }
        Ok(())
    }

    fn visit_for_cycles<'a>(
        &'a self,
        key: &'a MigrationKey,
        marks: &mut BTreeMap<&'a MigrationKey, Mark>,
    ) -> Result<(), MigrationError> {
        match marks.get(key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(MigrationError::CircularDependency(key.clone())),
            None => {}
        }
        marks.insert(key, Mark::Visiting);
        for parent in self.parents(key) {
            self.visit_for_cycles(parent, marks)?;
        }
        marks.insert(key, Mark::Done);
        Ok(())
    }

    pub fn get(&self, key: &MigrationKey) -> Result<&Migration, MigrationError> {
        self.nodes.get(key).ok_or_else(|| MigrationError::UnknownMigration {
            app: key.app.clone(),
            name: key.name.clone(),
        })
    }

    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MigrationKey> {
        self.nodes.keys()
    }

    pub fn apps(&self) -> BTreeSet<String> {
        self.nodes.keys().map(|k| k.app.clone()).collect()
    }

    fn parents(&self, key: &MigrationKey) -> impl Iterator<Item = &MigrationKey> {
        let mut parents: Vec<&MigrationKey> = self
            .nodes
            .get(key)
            .map(|m| m.dependencies.iter().collect())
            .unwrap_or_default();
        parents.sort();
        parents.into_iter()
    }

    fn children_of(&self, key: &MigrationKey) -> impl Iterator<Item = &MigrationKey> {
        self.children.get(key).into_iter().flatten()
    }

    /// `target` and everything it depends on, dependencies first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> Result<Vec<MigrationKey>, MigrationError> {
        self.get(target)?;
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        self.collect_ancestors(target, &mut seen, &mut plan);
        Ok(plan)
    }

    fn collect_ancestors(&self, key: &MigrationKey, seen: &mut BTreeSet<MigrationKey>, plan: &mut Vec<MigrationKey>) {
        if !seen.insert(key.clone()) {
            return;
        }
        for parent in self.parents(key) {
            self.collect_ancestors(parent, seen, plan);
        }
        plan.push(key.clone());
    }

    /// `target` and everything that depends on it, dependants first.
    pub fn backwards_plan(&self, target: &MigrationKey) -> Result<Vec<MigrationKey>, MigrationError> {
        self.get(target)?;
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        self.collect_descendants(target, &mut seen, &mut plan);
        Ok(plan)
    }

    fn collect_descendants(&self, key: &MigrationKey, seen: &mut BTreeSet<MigrationKey>, plan: &mut Vec<MigrationKey>) {
        if !seen.insert(key.clone()) {
            return;
        }
        for child in self.children_of(key) {
            self.collect_descendants(child, seen, plan);
        }
        plan.push(key.clone());
    }

    /// Units with no dependant inside their own app.
    pub fn leaf_nodes(&self) -> Vec<MigrationKey> {
        self.nodes
            .keys()
            .filter(|key| !self.children_of(key).any(|child| child.app == key.app))
            .cloned()
            .collect()
    }

    /// Units of `app` with no dependency inside `app`.
    pub fn root_nodes(&self, app: &str) -> Vec<MigrationKey> {
        self.nodes
            .keys()
            .filter(|key| key.app == app && !self.parents(key).any(|p| p.app == app))
            .cloned()
            .collect()
    }

    /// Every unit, in an order that respects all dependencies.
    pub fn full_plan(&self) -> Vec<MigrationKey> {
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();
        for leaf in self.leaf_nodes() {
            self.collect_ancestors(&leaf, &mut seen, &mut plan);
        }
        plan
    }

    /// Find a unit of `app` by exact name or unique name prefix (`0009`).
    pub fn resolve(&self, app: &str, name: &str) -> Result<MigrationKey, MigrationError> {
        if !self.apps().contains(app) {
            return Err(MigrationError::UnknownApp(app.to_string()));
        }
        let exact = MigrationKey::new(app, name);
        if self.nodes.contains_key(&exact) {
            return Ok(exact);
        }
        let mut matches = self
            .nodes
            .keys()
            .filter(|key| key.app == app && key.name.starts_with(name));
        match (matches.next(), matches.next()) {
            (Some(key), None) => Ok(key.clone()),
            (Some(_), Some(_)) => Err(MigrationError::AmbiguousMigration {
                app: app.to_string(),
                name: name.to_string(),
            }),
            (None, _) => Err(MigrationError::UnknownMigration {
                app: app.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Replay `keys` in order on an empty state.
    pub fn make_state(&self, keys: &[MigrationKey]) -> Result<ProjectState, MigrationError> {
        let mut state = ProjectState::new();
        for key in keys {
            self.get(key)?.mutate_state(&mut state)?;
        }
        Ok(state)
    }

    /// State just before `key` runs: all of its ancestors replayed.
    pub fn state_before(&self, key: &MigrationKey) -> Result<ProjectState, MigrationError> {
        let mut plan = self.forwards_plan(key)?;
        plan.pop();
        self.make_state(&plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::all;
    use crate::schema::ModelRef;

    fn key(app: &str, name: &str) -> MigrationKey {
        MigrationKey::new(app, name)
    }

    #[test]
    fn test_forwards_plan_puts_dependencies_first() {
        let graph = MigrationGraph::new(all()).unwrap();
        let plan = graph
            .forwards_plan(&key("core", "0017_location_owners_task"))
            .unwrap();
        assert_eq!(
            plan,
            vec![
                key("auth", "0001_initial"),
                key("contenttypes", "0001_initial"),
                key("core", "0001_initial"),
                key("core", "0003_roomphoto"),
                key("core", "0009_location_name_alter_location_address"),
                key("core", "0017_location_owners_task"),
            ]
        );
    }

    #[test]
    fn test_backwards_plan_puts_dependants_first() {
        let graph = MigrationGraph::new(all()).unwrap();
        let plan = graph.backwards_plan(&key("core", "0003_roomphoto")).unwrap();
        assert_eq!(
            plan,
            vec![
                key("core", "0017_location_owners_task"),
                key("core", "0009_location_name_alter_location_address"),
                key("core", "0003_roomphoto"),
            ]
        );
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let units = vec![Migration::new("core", "0002_extra").depends_on("core", "0001_initial")];
        let err = MigrationGraph::new(units).err().unwrap();
        assert!(matches!(err, MigrationError::NodeNotFound { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let units = vec![
            Migration::new("core", "a").depends_on("core", "b"),
            Migration::new("core", "b").depends_on("core", "a"),
        ];
        let err = MigrationGraph::new(units).err().unwrap();
        assert!(matches!(err, MigrationError::CircularDependency(_)));
    }

    #[test]
    fn test_leaves_and_roots() {
        let graph = MigrationGraph::new(all()).unwrap();
        assert_eq!(
            graph.leaf_nodes(),
            vec![
                key("auth", "0001_initial"),
                key("contenttypes", "0001_initial"),
                key("core", "0017_location_owners_task"),
            ]
        );
        assert_eq!(graph.root_nodes("core"), vec![key("core", "0001_initial")]);
        assert_eq!(graph.full_plan().len(), 6);
    }

    #[test]
    fn test_resolve_by_prefix() {
        let graph = MigrationGraph::new(all()).unwrap();
        assert_eq!(
            graph.resolve("core", "0009").unwrap(),
            key("core", "0009_location_name_alter_location_address")
        );
        assert!(matches!(
            graph.resolve("core", "00").unwrap_err(),
            MigrationError::AmbiguousMigration { .. }
        ));
        assert!(matches!(
            graph.resolve("core", "0042").unwrap_err(),
            MigrationError::UnknownMigration { .. }
        ));
        assert!(matches!(graph.resolve("attic", "0001").unwrap_err(), MigrationError::UnknownApp(_)));
    }

    #[test]
    fn test_state_before_location_fields() {
        let graph = MigrationGraph::new(all()).unwrap();
        let before = graph
            .state_before(&key("core", "0009_location_name_alter_location_address"))
            .unwrap();
        let location = before.model(&ModelRef::new("core", "location")).unwrap();
        assert!(location.field("name").is_none());
        assert!(!location.field("address").unwrap().null);

        let after = graph
            .state_before(&key("core", "0017_location_owners_task"))
            .unwrap();
        let location = after.model(&ModelRef::new("core", "location")).unwrap();
        assert!(location.field("name").is_some());
        assert!(location.field("address").unwrap().null);
    }
}
