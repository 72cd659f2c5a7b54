//! Composable, immutable environments.
//!
//! An [`Environment`] is a layer of packages and variables on top of an
//! optional parent. Layers are shared through `Arc`, so deriving a new
//! environment never copies its ancestors and never touches the operand.
//!
//! # Effective closure
//!
//! The effective package set and variables are the union of every layer from
//! the root down to the environment itself, child entries overriding parent
//! entries with the same package name or variable key. Equality and hashing
//! are defined on this closure, not on how the environment was built:
//!
//! ```ignore
//! let a = Environment::empty().with_dev_tools([node.clone()]).with_dev_tools([go.clone()]);
//! let b = Environment::empty().with_dev_tools([node, go]);
//! assert_eq!(a, b);
//! assert_eq!(a.closure_hash()?, b.closure_hash()?);
//! ```
//!
//! # Merge is right-biased
//!
//! [`merge`] lets its right operand win on collisions. It is associative but
//! not commutative: `merge(a, b)` and `merge(b, a)` differ whenever both
//! define the same package name or variable key with different values.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::package::PackageRef;
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// The flattened view of an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvClosure {
  pub packages: BTreeMap<String, PackageRef>,
  pub variables: BTreeMap<String, String>,
}

impl Hashable for EnvClosure {}

#[derive(Debug)]
struct Layer {
  packages: BTreeMap<String, PackageRef>,
  variables: BTreeMap<String, String>,
  parent: Option<Environment>,
}

/// An immutable set of tools and variables a command runs under.
#[derive(Clone)]
pub struct Environment {
  layer: Arc<Layer>,
}

impl Environment {
  /// The environment with no packages and no variables.
  pub fn empty() -> Self {
    Self::from_closure(EnvClosure::default())
  }

  /// A single-layer environment holding exactly `closure`.
  pub fn from_closure(closure: EnvClosure) -> Self {
    Self {
      layer: Arc::new(Layer {
        packages: closure.packages,
        variables: closure.variables,
        parent: None,
      }),
    }
  }

  fn derive(&self, packages: BTreeMap<String, PackageRef>, variables: BTreeMap<String, String>) -> Self {
    Self {
      layer: Arc::new(Layer {
        packages,
        variables,
        parent: Some(self.clone()),
      }),
    }
  }

  /// Add tools on top of this environment.
  ///
  /// Last writer wins on name collision: a tool added here shadows an
  /// inherited tool of the same name, and within `refs` a later entry
  /// shadows an earlier one.
  pub fn with_dev_tools(&self, refs: impl IntoIterator<Item = PackageRef>) -> Self {
    let packages = refs.into_iter().map(|pkg| (pkg.name.clone(), pkg)).collect();
    self.derive(packages, BTreeMap::new())
  }

  /// Set one variable on top of this environment.
  pub fn with_variable(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.derive(BTreeMap::new(), BTreeMap::from([(key.into(), value.into())]))
  }

  /// Set several variables on top of this environment.
  pub fn with_variables<K, V>(&self, vars: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    let variables = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
    self.derive(BTreeMap::new(), variables)
  }

  /// Right-biased merge, see [`merge`].
  pub fn merge(&self, other: &Environment) -> Self {
    let closure = other.closure();
    self.derive(closure.packages, closure.variables)
  }

  /// The parent this environment was derived from, if any.
  pub fn parent(&self) -> Option<&Environment> {
    self.layer.parent.as_ref()
  }

  /// Whether both values share the same underlying layer.
  pub fn ptr_eq(&self, other: &Environment) -> bool {
    Arc::ptr_eq(&self.layer, &other.layer)
  }

  /// Layers from the root ancestor down to `self`.
  fn lineage(&self) -> Vec<&Layer> {
    let mut chain = Vec::new();
    let mut current = Some(self);
    while let Some(env) = current {
      chain.push(env.layer.as_ref());
      current = env.layer.parent.as_ref();
    }
    chain.reverse();
    chain
  }

  /// Effective packages keyed by name.
  pub fn effective_packages(&self) -> BTreeMap<String, PackageRef> {
    let mut packages = BTreeMap::new();
    for layer in self.lineage() {
      for (name, pkg) in &layer.packages {
        packages.insert(name.clone(), pkg.clone());
      }
    }
    packages
  }

  /// Effective variables.
  pub fn effective_variables(&self) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();
    for layer in self.lineage() {
      for (key, value) in &layer.variables {
        variables.insert(key.clone(), value.clone());
      }
    }
    variables
  }

  /// Effective packages and variables in one pass.
  pub fn closure(&self) -> EnvClosure {
    let mut closure = EnvClosure::default();
    for layer in self.lineage() {
      for (name, pkg) in &layer.packages {
        closure.packages.insert(name.clone(), pkg.clone());
      }
      for (key, value) in &layer.variables {
        closure.variables.insert(key.clone(), value.clone());
      }
    }
    closure
  }

  /// Hash of the effective closure.
  pub fn closure_hash(&self) -> Result<ObjectHash, HashError> {
    self.closure().compute_hash()
  }
}

/// Right-biased merge: `b` overrides `a` on conflicting package names and
/// variable keys.
///
/// Associative, `merge(merge(a, b), c) == merge(a, merge(b, c))`, but not
/// commutative when keys collide.
pub fn merge(a: &Environment, b: &Environment) -> Environment {
  a.merge(b)
}

impl Default for Environment {
  fn default() -> Self {
    Self::empty()
  }
}

impl PartialEq for Environment {
  fn eq(&self, other: &Self) -> bool {
    self.ptr_eq(other) || self.closure() == other.closure()
  }
}

impl Eq for Environment {}

impl Hash for Environment {
  fn hash<H: Hasher>(&self, state: &mut H) {
    let closure = self.closure();
    for (name, pkg) in &closure.packages {
      name.hash(state);
      pkg.hash(state);
    }
    closure.variables.hash(state);
  }
}

impl fmt::Debug for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let closure = self.closure();
    f.debug_struct("Environment")
      .field("packages", &closure.packages.keys().collect::<Vec<_>>())
      .field("variables", &closure.variables)
      .finish()
  }
}

impl Serialize for Environment {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.closure().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Environment {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    EnvClosure::deserialize(deserializer).map(Environment::from_closure)
  }
}
