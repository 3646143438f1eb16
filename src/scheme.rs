// Copyright 2025 The Kubernetes Authors.
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

//! API scheme - the set of resource kinds a manager knows about.

use std::collections::HashSet;

use kube::core::GroupVersionKind;
use kube::Resource;

/// Set of resource kinds registered with the manager.
///
/// A scheme is filled in before the manager context is built and is shared
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashSet<GroupVersionKind>,
}

impl Scheme {
    /// Creates an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a statically typed resource.
    pub fn add_known_type<K>(&mut self) -> &mut Self
    where
        K: Resource<DynamicType = ()>,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.add_known_gvk(gvk)
    }

    /// Registers a resource kind by its group, version and kind.
    pub fn add_known_gvk(&mut self, gvk: GroupVersionKind) -> &mut Self {
        self.kinds.insert(gvk);
        self
    }

    /// Returns true if `gvk` has been registered.
    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains(gvk)
    }

    /// Iterates over the registered kinds in no particular order.
    pub fn known_kinds(&self) -> impl Iterator<Item = &GroupVersionKind> {
        self.kinds.iter()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
