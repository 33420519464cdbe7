use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::{error::ErrorKind, Result};

use super::{decode, encode, Collectable, Identifiable};

#[derive(Clone, Debug)]
pub struct SledDb {
    inner: sled::Db,
}

impl SledDb {
    /// Opens (or creates) the database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let inner = sled::Config::default().path(path).open()?;
        Ok(Self { inner })
    }

    /// Opens a throwaway in-memory-ish database. Nothing is kept once the
    /// handle is dropped. Meant for tests and experiments.
    pub fn temporary() -> Result<Self> {
        let inner = sled::Config::new().temporary(true).open()?;
        Ok(Self { inner })
    }

    /// Gets a collection of entries of the same type from the collection
    /// defined for that type.
    pub fn get_collection<T: DeserializeOwned + Collectable>(&self) -> Result<Vec<T>> {
        self.get_collection_at(T::get_collection_name())
    }

    /// Gets a collection of entries of the same type from the collection
    /// specified by name.
    pub fn get_collection_at<T: DeserializeOwned>(
        &self,
        name: impl AsRef<[u8]>,
    ) -> Result<Vec<T>> {
        let tree = self.inner.open_tree(name)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, value_bytes) = entry?;
            let value: T = decode(&value_bytes)?;
            out.push(value);
        }
        Ok(out)
    }

    /// Returns the length of the collection as defined for the specified type.
    pub fn len<T: Collectable>(&self) -> Result<usize> {
        Ok(self.inner.open_tree(T::get_collection_name())?.len())
    }

    /// Gets an item from the collection defined for the item type.
    pub fn get<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<T> {
        self.get_at(T::get_collection_name(), id)
    }

    /// Gets an item by id from the collection specified by name.
    pub fn get_at<T: DeserializeOwned>(&self, collection: &str, id: Uuid) -> Result<T> {
        let tree = self.inner.open_tree(collection)?;
        match tree.get(id)? {
            Some(value_bytes) => decode(&value_bytes),
            None => Err(ErrorKind::DbError(format!(
                "entity with id '{}' not found in collection {}",
                id, collection
            ))
            .into()),
        }
    }

    /// Like [`Self::get`] but missing entries come back as `None` instead of
    /// an error.
    pub fn try_get<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<Option<T>> {
        let tree = self.inner.open_tree(T::get_collection_name())?;
        match tree.get(id)? {
            Some(value_bytes) => Ok(Some(decode(&value_bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + Identifiable + Collectable>(&self, value: &T) -> Result<()> {
        self.set_at(T::get_collection_name(), value)?;
        Ok(())
    }

    pub fn set_at<T: Serialize + Identifiable>(
        &self,
        collection: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        let encoded = encode(value)?;
        tree.insert(value.get_id(), encoded)?;
        Ok(())
    }

    pub fn remove<T: Identifiable + Collectable>(&self, value: &T) -> Result<()> {
        self.remove_at(T::get_collection_name(), value)
    }

    pub fn remove_at<T: Identifiable>(
        &self,
        collection: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        tree.remove(value.get_id())?;
        Ok(())
    }

    pub fn clear<T: Collectable>(&self) -> Result<()> {
        self.clear_at(T::get_collection_name())
    }

    pub fn clear_at(&self, collection: &str) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        tree.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
    struct Note {
        id: Uuid,
        body: String,
    }

    impl Collectable for Note {
        fn get_collection_name() -> &'static str {
            "note"
        }
    }

    impl Identifiable for Note {
        fn get_id(&self) -> Uuid {
            self.id
        }
    }

    #[test]
    fn stores_fetches_and_removes() {
        let db = SledDb::temporary().unwrap();
        let note = Note {
            id: Uuid::new_v4(),
            body: "hello".to_string(),
        };

        db.set(&note).unwrap();
        assert_eq!(db.len::<Note>().unwrap(), 1);
        assert_eq!(db.get::<Note>(note.id).unwrap(), note);

        let missing = Uuid::new_v4();
        assert!(db.get::<Note>(missing).is_err());
        assert_eq!(db.try_get::<Note>(missing).unwrap(), None);

        db.remove(&note).unwrap();
        assert_eq!(db.len::<Note>().unwrap(), 0);

        db.set(&note).unwrap();
        db.clear::<Note>().unwrap();
        assert!(db.get_collection::<Note>().unwrap().is_empty());
    }
}
