use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::errors::{ArborError, Result};

/// Named services attached to a tree root
///
/// Model code reaches I/O (fetching, notifying, clocks) only through
/// services registered here; the tree passes them through untouched.
#[derive(Clone, Default)]
pub struct Environment {
    services: Rc<HashMap<String, Rc<dyn Any>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service under `name`
    pub fn with_service<T: 'static>(mut self, name: &str, service: T) -> Self {
        Rc::make_mut(&mut self.services).insert(name.to_string(), Rc::new(service));
        self
    }

    /// Look up a service by name and concrete type
    ///
    /// # Errors
    ///
    /// Returns `MissingService` when nothing is registered under `name` or
    /// the registered service has a different type.
    pub fn get<T: 'static>(&self, name: &str) -> Result<Rc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
            .ok_or_else(|| ArborError::MissingService {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();
        f.debug_struct("Environment").field("services", &names).finish()
    }
}
