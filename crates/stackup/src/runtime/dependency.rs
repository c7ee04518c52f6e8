//! Dependency graph construction and topological batching

use crate::runtime::service::ServiceSpec;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Collects services before the graph is validated
#[derive(Debug, Default)]
pub struct GraphBuilder {
    services: IndexMap<String, ServiceSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Dependencies may reference services added later.
    pub fn add_service(&mut self, spec: ServiceSpec) -> Result<(), DependencyError> {
        if self.services.contains_key(&spec.name) {
            return Err(DependencyError::DuplicateService(spec.name));
        }
        self.services.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Chaining form of [`GraphBuilder::add_service`]
    pub fn service(mut self, spec: ServiceSpec) -> Result<Self, DependencyError> {
        self.add_service(spec)?;
        Ok(self)
    }

    /// Validate dependencies and acyclicity, producing an immutable graph
    pub fn finalize(self) -> Result<DependencyGraph, DependencyError> {
        for (name, spec) in &self.services {
            for dep in &spec.depends_on {
                if !self.services.contains_key(dep) {
                    return Err(DependencyError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let batches = Self::topological_batches(&self.services)?;

        let batch_of: HashMap<String, usize> = batches
            .iter()
            .enumerate()
            .flat_map(|(i, batch)| batch.iter().map(move |name| (name.clone(), i)))
            .collect();

        Ok(DependencyGraph {
            services: self.services,
            batches,
            batch_of,
        })
    }

    /// Kahn's algorithm, one level at a time.
    ///
    /// A service lands in the batch right after its deepest dependency; each
    /// batch lists names in insertion order.
    fn topological_batches(
        services: &IndexMap<String, ServiceSpec>,
    ) -> Result<Vec<Vec<String>>, DependencyError> {
        let count = services.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, spec) in services.values().enumerate() {
            for dep in &spec.depends_on {
                if let Some(dep_index) = services.get_index_of(dep) {
                    in_degree[index] += 1;
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut current: Vec<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &index in &current {
                for &dependent in &dependents[index] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();

            batches.push(
                current
                    .iter()
                    .filter_map(|&i| services.get_index(i).map(|(name, _)| name.clone()))
                    .collect(),
            );
            current = next;
        }

        if placed != count {
            return Err(DependencyError::CyclicDependency(Self::find_cycle(
                services, &in_degree,
            )));
        }

        Ok(batches)
    }

    /// Extract one concrete cycle among the services Kahn could not place.
    ///
    /// Every unplaced service has at least one unplaced dependency, so walking
    /// those edges must revisit a service. The cycle is rotated to start at its
    /// earliest-declared member and lists names in dependency direction.
    fn find_cycle(services: &IndexMap<String, ServiceSpec>, in_degree: &[usize]) -> Vec<String> {
        let unplaced = |i: usize| in_degree[i] > 0;
        let Some(start) = (0..services.len()).find(|&i| unplaced(i)) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;

        let cycle = loop {
            if let Some(&pos) = position.get(&current) {
                break path[pos..].to_vec();
            }
            position.insert(current, path.len());
            path.push(current);

            let next = services[current]
                .depends_on
                .iter()
                .filter_map(|dep| services.get_index_of(dep))
                .find(|&i| unplaced(i));
            match next {
                Some(next) => current = next,
                None => break path.clone(),
            }
        };

        let pivot = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, index)| **index)
            .map(|(pos, _)| pos)
            .unwrap_or(0);

        cycle[pivot..]
            .iter()
            .chain(cycle[..pivot].iter())
            .filter_map(|&i| services.get_index(i).map(|(name, _)| name.clone()))
            .collect()
    }
}

/// Validated, immutable service graph
#[derive(Debug)]
pub struct DependencyGraph {
    /// Services in insertion order
    services: IndexMap<String, ServiceSpec>,
    /// Topological batches, computed once at finalize
    batches: Vec<Vec<String>>,
    /// Map from service name to batch index
    batch_of: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Build and finalize from a list of services in one step
    pub fn from_services(
        services: impl IntoIterator<Item = ServiceSpec>,
    ) -> Result<Self, DependencyError> {
        let mut builder = GraphBuilder::new();
        for spec in services {
            builder.add_service(spec)?;
        }
        builder.finalize()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    /// Services in insertion order
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.values()
    }

    /// Batches in launch order; identical on every call
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    pub fn batch_index(&self, name: &str) -> Option<usize> {
        self.batch_of.get(name).copied()
    }

    /// Services that list `name` as a direct dependency
    pub fn dependents(&self, name: &str) -> Vec<&ServiceSpec> {
        self.services
            .values()
            .filter(|spec| spec.depends_on.iter().any(|dep| dep == name))
            .collect()
    }

    /// Batch by batch, insertion order within each batch
    pub fn launch_order(&self) -> impl DoubleEndedIterator<Item = &ServiceSpec> {
        self.batches
            .iter()
            .flatten()
            .filter_map(|name| self.services.get(name))
    }

    /// Reverse of launch order
    pub fn shutdown_order(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.launch_order().rev()
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("Service '{0}' is registered more than once")]
    DuplicateService(String),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}
