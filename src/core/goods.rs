use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Internal numeric id of a tradeable good. Only meaningful within one
/// [`GoodRegistry`]; anything written to disk uses the good's name instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoodId(pub u32);

impl fmt::Display for GoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name <-> id mapping for the goods known to the running build.
#[derive(Debug, Clone, Default)]
pub struct GoodRegistry {
    by_name: HashMap<String, GoodId>,
    names: Vec<String>,
}

impl GoodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.register(name);
        }
        registry
    }

    /// Registers a good, returning the existing id if the name is known.
    pub fn register(&mut self, name: impl Into<String>) -> GoodId {
        let name = name.into();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let id = GoodId(self.names.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.names.push(name);
        id
    }

    pub fn id_of(&self, name: &str) -> Option<GoodId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: GoodId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
