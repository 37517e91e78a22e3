//! Entities: the attribute set of one image file

use crate::attribute::Attribute;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Full attribute set plus path and timestamps for one image file
///
/// Attribute names are unique within an entity; the last `set_attribute`
/// for a name wins. `clone()` is a deep copy: entities own all of their
/// data, so a clone never shares mutable state with the original. Clones are
/// how entities cross thread boundaries in the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    path: PathBuf,
    last_write_time: DateTime<Utc>,
    last_access_time: DateTime<Utc>,
    attributes: BTreeMap<String, Attribute>,
}

impl Entity {
    /// New entity without attributes. Timestamps start at the Unix epoch.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let epoch = DateTime::<Utc>::from(UNIX_EPOCH);
        Self {
            path: path.into(),
            last_write_time: epoch,
            last_access_time: epoch,
            attributes: BTreeMap::new(),
        }
    }

    /// Build an entity from a list of attributes (later duplicates win)
    pub fn from_attributes(
        path: impl Into<PathBuf>,
        attributes: impl IntoIterator<Item = Attribute>,
    ) -> Self {
        let mut entity = Self::new(path);
        entity.extend(attributes);
        entity
    }

    /// Builder-style timestamp setter
    #[must_use]
    pub fn with_times(
        mut self,
        last_write_time: DateTime<Utc>,
        last_access_time: DateTime<Utc>,
    ) -> Self {
        self.last_write_time = last_write_time;
        self.last_access_time = last_access_time;
        self
    }

    pub fn set_times(&mut self, last_write_time: DateTime<Utc>, last_access_time: DateTime<Utc>) {
        self.last_write_time = last_write_time;
        self.last_access_time = last_access_time;
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-key the entity to a new path
    pub fn change_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    #[must_use]
    pub const fn last_write_time(&self) -> DateTime<Utc> {
        self.last_write_time
    }

    #[must_use]
    pub const fn last_access_time(&self) -> DateTime<Utc> {
        self.last_access_time
    }

    /// Look up an attribute by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Set an attribute, returning the one it replaced
    pub fn set_attribute(&mut self, attribute: Attribute) -> Option<Attribute> {
        self.attributes
            .insert(attribute.name().to_string(), attribute)
    }

    /// Remove an attribute by name
    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    /// Attributes in name order
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// User-editable attributes only
    pub fn custom_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values().filter(|a| a.is_custom())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Consume the entity, returning its attributes in name order
    #[must_use]
    pub fn into_attributes(self) -> Vec<Attribute> {
        self.attributes.into_values().collect()
    }
}

impl Extend<Attribute> for Entity {
    fn extend<I: IntoIterator<Item = Attribute>>(&mut self, iter: I) {
        for attribute in iter {
            self.set_attribute(attribute);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_last_set_wins() {
        let mut entity = Entity::new("/photos/a.jpg");
        assert!(entity.set_attribute(Attribute::int("rating", 3)).is_none());
        let previous = entity.set_attribute(Attribute::int("rating", 5));
        assert_eq!(previous, Some(Attribute::int("rating", 3)));
        assert_eq!(entity.len(), 1);
        assert_eq!(
            entity.get("rating").map(Attribute::value),
            Some(&Value::integer(5))
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = Entity::from_attributes(
            "/photos/a.jpg",
            [Attribute::text("caption", "Lake"), Attribute::int("rating", 2)],
        );
        let copy = original.clone();

        original.set_attribute(Attribute::text("caption", "Mountains"));
        original.remove_attribute("rating");
        original.change_path("/photos/b.jpg");

        assert_eq!(copy.path(), Path::new("/photos/a.jpg"));
        assert_eq!(copy.len(), 2);
        assert_eq!(
            copy.get("caption").and_then(|a| a.value().as_text()),
            Some("Lake")
        );
    }

    #[test]
    fn test_custom_attributes_filter() {
        let entity = Entity::from_attributes(
            "/photos/a.jpg",
            [
                Attribute::int("rating", 4),
                Attribute::metadata("FileSize", Value::integer(1024)),
            ],
        );
        let names: Vec<&str> = entity.custom_attributes().map(Attribute::name).collect();
        assert_eq!(names, vec!["rating"]);
        assert_eq!(entity.attributes().count(), 2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let entity = Entity::from_attributes("/photos/a.jpg", [Attribute::real("score", 0.5)]);
        let json = serde_json::to_string(&entity).unwrap();
        let parsed: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entity);
    }
}
