use crate::storage_trait::Entity;
use crate::QueryError;
use std::rc::Rc;

/// Functions needed to implement a catalog. It keeps track of all available entities and their schemas.
pub trait Catalog {
    /// Looks up an entity by name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the entity.
    fn get_entity(&self, name: &str) -> Option<Rc<dyn Entity>>;

    /// Get the entity, failing if it is unknown.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the entity.
    fn get_entity_ptr(&self, name: &str) -> Result<Rc<dyn Entity>, QueryError> {
        self.get_entity(name)
            .ok_or_else(|| QueryError::ValidationError(format!("Table {} not found", name)))
    }

    /// Checks if the entity name is valid in the catalog.
    fn is_valid_table(&self, name: &str) -> bool {
        self.get_entity(name).is_some()
    }
}
