//! Dependency ordering of mapping rules.
//!
//! Rules form a directed graph with an edge from every referenced collection
//! to the collection that references it. The plan groups rules into levels:
//! every rule of a level only references rules of earlier levels, so the
//! collections of one level may be read concurrently. Within a level rules
//! keep their declaration order, which makes the emitted script deterministic.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

use crate::error::{MigrateError, Result};
use crate::rules::MappingRule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    levels: Vec<Vec<usize>>,
}

impl MigrationPlan {
    /// Order `rules` so referenced collections come first.
    ///
    /// A cycle, including a rule that references its own collection, is a
    /// [`MigrateError::ConfigurationCycleError`]. References to collections
    /// without a rule are left to config validation.
    pub fn build(rules: &[MappingRule]) -> Result<Self> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<NodeIndex> = (0..rules.len()).map(|i| graph.add_node(i)).collect();
        let by_name: HashMap<&str, usize> = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.collection.as_str(), i))
            .collect();

        for (i, rule) in rules.iter().enumerate() {
            for target in rule.references() {
                if let Some(&j) = by_name.get(target) {
                    if graph.find_edge(nodes[j], nodes[i]).is_none() {
                        graph.add_edge(nodes[j], nodes[i], ());
                    }
                }
            }
        }

        let mut cyclic: Vec<usize> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|node| graph[node])
            .collect();
        if !cyclic.is_empty() {
            cyclic.sort_unstable();
            return Err(MigrateError::ConfigurationCycleError(
                cyclic.iter().map(|&i| rules[i].collection.clone()).collect(),
            ));
        }

        let mut indegree: Vec<usize> = nodes
            .iter()
            .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: Vec<usize> = (0..rules.len()).filter(|&i| indegree[i] == 0).collect();
        let mut levels = Vec::new();

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &i in &ready {
                for succ in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                    let j = graph[succ];
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        next.push(j);
                    }
                }
            }
            next.sort_unstable();
            levels.push(ready);
            ready = next;
        }

        Ok(Self { levels })
    }

    /// Rule indexes grouped by dependency level.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Rule indexes in migration order.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.levels.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(toml_src: &str) -> Vec<MappingRule> {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            collections: Vec<MappingRule>,
        }
        toml::from_str::<Wrapper>(toml_src).unwrap().collections
    }

    fn names(rules: &[MappingRule], plan: &MigrationPlan) -> Vec<String> {
        plan.order().map(|i| rules[i].collection.clone()).collect()
    }

    #[test]
    fn referenced_collections_come_first() {
        let rules = rules(
            r#"
            [[collections]]
            name = "tasks"
            table = "tasks"
            foreign_keys = [{ column = "project_id", path = "project", references = "projects" }]

            [[collections]]
            name = "projects"
            table = "projects"
            foreign_keys = [{ column = "owner_id", path = "owner", references = "users" }]

            [[collections]]
            name = "users"
            table = "users"
            "#,
        );
        let plan = MigrationPlan::build(&rules).unwrap();
        assert_eq!(names(&rules, &plan), vec!["users", "projects", "tasks"]);
        assert_eq!(plan.levels().len(), 3);
    }

    #[test]
    fn independent_collections_share_a_level() {
        let rules = rules(
            r#"
            [[collections]]
            name = "news"
            table = "news"

            [[collections]]
            name = "groups"
            table = "groups"
            foreign_keys = [{ column = "owner_id", path = "owner", references = "users" }]

            [[collections]]
            name = "users"
            table = "users"

            [[collections]]
            name = "projects"
            table = "projects"
            [[collections.children]]
            path = "members"
            table = "relation_project_user"
            parent_column = "project_id"
            foreign_keys = [{ column = "user_id", path = ".", references = "users" }]
            "#,
        );
        let plan = MigrationPlan::build(&rules).unwrap();
        assert_eq!(plan.levels(), &[vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn cycles_are_rejected() {
        let rules = rules(
            r#"
            [[collections]]
            name = "a"
            table = "a"
            foreign_keys = [{ column = "b_id", path = "b", references = "b" }]

            [[collections]]
            name = "b"
            table = "b"
            foreign_keys = [{ column = "a_id", path = "a", references = "a" }]

            [[collections]]
            name = "c"
            table = "c"
            "#,
        );
        match MigrationPlan::build(&rules) {
            Err(MigrateError::ConfigurationCycleError(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let rules = rules(
            r#"
            [[collections]]
            name = "users"
            table = "users"
            foreign_keys = [{ column = "mentor_id", path = "mentor", references = "users", required = false }]
            "#,
        );
        assert!(matches!(
            MigrationPlan::build(&rules),
            Err(MigrateError::ConfigurationCycleError(_))
        ));
    }
}
