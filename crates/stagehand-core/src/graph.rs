// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Collaborators that let the validator inspect a loaded resource.
//!
//! The core never walks a resource's object tree itself. Engines implement
//! [`ResourceGraph`] over their own object model; [`StaticResourceGraph`] is a
//! plain description useful for headless tools and tests.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

/// Queries over the object tree of a loaded resource.
///
/// Every query is fallible: an error is reported as a failed validation
/// result rather than aborting the validation pass.
pub trait ResourceGraph: Send {
    /// Whether any object in `resource` carries `tag`.
    fn find_tagged(&self, resource: &str, tag: &str) -> Result<bool>;

    /// Whether any object in `resource` has a component of type `type_name`.
    fn find_component(&self, resource: &str, type_name: &str) -> Result<bool>;

    /// Whether any object in `resource` sits on `layer`.
    fn find_on_layer(&self, resource: &str, layer: &str) -> Result<bool>;

    /// The number of root objects in `resource`.
    fn count_all(&self, resource: &str) -> Result<usize>;
}

/// The host's listing of resources that can be loaded at all.
pub trait Catalog: Send {
    /// Whether `name` is part of the build.
    fn contains(&self, name: &str) -> bool;
}

/// A flattened description of one resource's object tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTree {
    /// Tags carried by any object.
    pub tags: HashSet<String>,
    /// Component type names present on any object.
    pub components: HashSet<String>,
    /// Layers any object sits on.
    pub layers: HashSet<String>,
    /// Number of root objects.
    pub root_count: usize,
}

impl ResourceTree {
    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a component type name.
    pub fn with_component(mut self, type_name: impl Into<String>) -> Self {
        self.components.insert(type_name.into());
        self
    }

    /// Adds a layer.
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layers.insert(layer.into());
        self
    }

    /// Sets the number of root objects.
    pub fn with_root_count(mut self, root_count: usize) -> Self {
        self.root_count = root_count;
        self
    }
}

/// A [`ResourceGraph`] backed by precomputed [`ResourceTree`]s.
///
/// Queries against a resource with no registered tree fail.
#[derive(Debug, Clone, Default)]
pub struct StaticResourceGraph {
    trees: HashMap<String, ResourceTree>,
}

impl StaticResourceGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the tree for `resource`.
    pub fn insert(&mut self, resource: impl Into<String>, tree: ResourceTree) {
        self.trees.insert(resource.into(), tree);
    }

    fn tree(&self, resource: &str) -> Result<&ResourceTree> {
        self.trees
            .get(resource)
            .ok_or_else(|| anyhow!("No object tree registered for '{resource}'"))
    }
}

impl ResourceGraph for StaticResourceGraph {
    fn find_tagged(&self, resource: &str, tag: &str) -> Result<bool> {
        Ok(self.tree(resource)?.tags.contains(tag))
    }

    fn find_component(&self, resource: &str, type_name: &str) -> Result<bool> {
        Ok(self.tree(resource)?.components.contains(type_name))
    }

    fn find_on_layer(&self, resource: &str, layer: &str) -> Result<bool> {
        Ok(self.tree(resource)?.layers.contains(layer))
    }

    fn count_all(&self, resource: &str) -> Result<usize> {
        Ok(self.tree(resource)?.root_count)
    }
}

/// A [`Catalog`] backed by a set of names.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    names: HashSet<String>,
}

impl MemoryCatalog {
    /// Creates a catalog listing `names`.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds `name` to the catalog.
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }
}

impl Catalog for MemoryCatalog {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_graph_answers_from_registered_tree() {
        let mut graph = StaticResourceGraph::new();
        graph.insert(
            "Harbor",
            ResourceTree::default()
                .with_tag("Player")
                .with_component("Camera")
                .with_layer("Water")
                .with_root_count(4),
        );

        assert!(graph.find_tagged("Harbor", "Player").unwrap());
        assert!(!graph.find_tagged("Harbor", "Enemy").unwrap());
        assert!(graph.find_component("Harbor", "Camera").unwrap());
        assert!(graph.find_on_layer("Harbor", "Water").unwrap());
        assert_eq!(graph.count_all("Harbor").unwrap(), 4);
    }

    #[test]
    fn static_graph_fails_for_unknown_resource() {
        let graph = StaticResourceGraph::new();
        let err = graph.count_all("Nowhere").unwrap_err();
        assert!(err.to_string().contains("Nowhere"));
    }

    #[test]
    fn memory_catalog_lookup() {
        let mut catalog = MemoryCatalog::new(["Menu", "Harbor"]);
        catalog.insert("Credits");
        assert!(catalog.contains("Harbor"));
        assert!(catalog.contains("Credits"));
        assert!(!catalog.contains("Secret"));
    }
}
