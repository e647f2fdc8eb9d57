//! JoinGraphResolver: finds deterministic join paths from a base table

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::error::ResolutionError;

use super::model::{Cardinality, JoinKind};
use super::registry::{Edge, ModelRegistry};

/// Default cap on the number of tables discovered in one BFS level
pub const DEFAULT_MAX_FRONTIER: usize = 256;

/// A step in a join path, oriented away from the base table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub from_table: String,
    pub to_table: String,
    /// `(from_column, to_column)` pairs
    pub keys: Vec<(String, String)>,
    /// Cardinality read from `from_table` to `to_table`
    pub cardinality: Cardinality,
    pub join_kind: JoinKind,
}

/// A table reached from the base, with the step that reaches it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJoin {
    pub step: JoinStep,
    /// Number of joins between the base and this table
    pub depth: usize,
    /// Composed cardinality of the whole path, relative to a base row
    pub effective: Cardinality,
}

impl ResolvedJoin {
    pub fn table(&self) -> &str {
        &self.step.to_table
    }

    /// Whether a base row can match several rows of this table
    pub fn fans_out(&self) -> bool {
        self.effective.fans_out()
    }
}

/// Joins needed to reach every required table, in breadth-first order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    pub base: String,
    pub joins: Vec<ResolvedJoin>,
}

impl JoinPlan {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn get(&self, table: &str) -> Option<&ResolvedJoin> {
        self.joins.iter().find(|j| j.table() == table)
    }

    /// Position of a table's join in the plan (the base has none)
    pub fn position(&self, table: &str) -> Option<usize> {
        self.joins.iter().position(|j| j.table() == table)
    }

    /// Steps from the base to `table`; empty for the base itself
    pub fn path_to(&self, table: &str) -> Vec<&JoinStep> {
        let mut steps = Vec::new();
        let mut current = table;
        while current != self.base {
            let Some(join) = self.get(current) else {
                break;
            };
            steps.push(&join.step);
            current = &join.step.from_table;
        }
        steps.reverse();
        steps
    }

    /// Whether a base row can match several rows of `table`
    pub fn fans_out(&self, table: &str) -> bool {
        self.get(table).is_some_and(ResolvedJoin::fans_out)
    }
}

/// Breadth-first join path search over the relationship graph
pub struct JoinGraphResolver<'a> {
    registry: &'a ModelRegistry,
    max_frontier: usize,
}

/// How a table was reached during the search
#[derive(Debug, Clone)]
struct Discovery {
    parent: String,
    /// Tables after the base, ending with this one
    path: Vec<String>,
    edges: Vec<Edge>,
}

impl<'a> JoinGraphResolver<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self {
            registry,
            max_frontier: DEFAULT_MAX_FRONTIER,
        }
    }

    pub fn with_max_frontier(mut self, max_frontier: usize) -> Self {
        self.max_frontier = max_frontier;
        self
    }

    /// Tables reachable from `from`, ignoring edge direction
    pub fn reachable(&self, from: &str) -> HashSet<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        visited.insert(from.to_string());
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for (target, _) in self.registry.neighbours(current) {
                if visited.insert(target.clone()) {
                    queue.push_back(target);
                }
            }
        }
        visited
    }

    /// Resolve the shortest join path from `base` to each required table
    ///
    /// Among equal-length paths the one whose sequence of table names sorts
    /// first wins, so the same model and request always give the same plan.
    pub fn resolve(
        &self,
        base: &str,
        required: &BTreeSet<String>,
    ) -> Result<JoinPlan, ResolutionError> {
        let mut discovered: HashMap<String, Discovery> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut level: Vec<String> = vec![base.to_string()];
        let mut missing: BTreeSet<&String> = required.iter().filter(|t| *t != base).collect();

        while !level.is_empty() && !missing.is_empty() {
            let mut next: BTreeMap<String, Discovery> = BTreeMap::new();

            for current in &level {
                let current_path = discovered
                    .get(current)
                    .map(|d| d.path.clone())
                    .unwrap_or_default();

                for (target, edges) in self.registry.neighbours(current) {
                    if target == base || discovered.contains_key(target) {
                        continue;
                    }
                    let mut path = current_path.clone();
                    path.push(target.clone());

                    let better = next.get(target).map_or(true, |existing| path < existing.path);
                    if better {
                        next.insert(
                            target.clone(),
                            Discovery {
                                parent: current.clone(),
                                path,
                                edges: edges.clone(),
                            },
                        );
                    }
                }
            }

            if next.len() > self.max_frontier {
                return Err(ResolutionError::TooManyJoinCandidates {
                    from: base.to_string(),
                    limit: self.max_frontier,
                });
            }

            let mut ordered: Vec<(String, Discovery)> = next.into_iter().collect();
            ordered.sort_by(|a, b| a.1.path.cmp(&b.1.path));

            level = Vec::with_capacity(ordered.len());
            for (table, discovery) in ordered {
                missing.remove(&table);
                order.push(table.clone());
                level.push(table.clone());
                discovered.insert(table, discovery);
            }
        }

        if let Some(unreached) = missing.first() {
            return Err(ResolutionError::NoJoinPath {
                from: base.to_string(),
                to: (*unreached).clone(),
            });
        }

        // keep only tables on a path to something required
        let mut needed: HashSet<&str> = HashSet::new();
        for table in required.iter().filter(|t| *t != base) {
            let mut current = table.as_str();
            while let Some(discovery) = discovered.get(current) {
                if !needed.insert(current) {
                    break;
                }
                current = &discovery.parent;
            }
        }

        let mut joins: Vec<ResolvedJoin> = Vec::new();
        for table in order.iter().filter(|t| needed.contains(t.as_str())) {
            let discovery = &discovered[table];
            let step = self.step(&discovery.parent, table, &discovery.edges)?;
            let parent_effective = joins
                .iter()
                .find(|j| j.table() == discovery.parent)
                .map(|j| j.effective);
            let effective = match parent_effective {
                Some(parent) => parent.compose(step.cardinality),
                None => step.cardinality,
            };
            joins.push(ResolvedJoin {
                depth: discovery.path.len(),
                effective,
                step,
            });
        }

        let plan = JoinPlan {
            base: base.to_string(),
            joins,
        };
        debug!(
            base = %plan.base,
            joins = ?plan.joins.iter().map(|j| j.table()).collect::<Vec<_>>(),
            "resolved join plan"
        );
        Ok(plan)
    }

    fn step(&self, from: &str, to: &str, edges: &[Edge]) -> Result<JoinStep, ResolutionError> {
        let [edge] = edges else {
            return Err(ResolutionError::AmbiguousJoinPath {
                from: from.to_string(),
                to: to.to_string(),
                count: edges.len(),
            });
        };

        let rel = &self.registry.relationships()[edge.relationship];
        let (keys, cardinality) = if edge.reversed {
            (
                rel.keys
                    .iter()
                    .map(|(l, r)| (r.clone(), l.clone()))
                    .collect(),
                rel.cardinality.reverse(),
            )
        } else {
            (rel.keys.clone(), rel.cardinality)
        };

        Ok(JoinStep {
            from_table: from.to_string(),
            to_table: to.to_string(),
            keys,
            cardinality,
            join_kind: rel.join_kind,
        })
    }
}
