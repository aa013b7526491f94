//! Serializable pointers from one shared object to another.

use crate::access::DataAccess;
use crate::data::PipelineData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use tierstack_types::ObjectId;

/// A reference to an object of type `T`, stored as its storage identifier
/// and id and resolved through
/// [`Pipeline::resolve`](crate::Pipeline::resolve) when needed.
///
/// Serialized as `{"uuid": "...", "type": "<identifier>"}`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DataReference<T> {
    #[serde(rename = "uuid")]
    id: ObjectId,
    #[serde(rename = "type")]
    identifier: String,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T: PipelineData> DataReference<T> {
    pub fn new(identifier: impl Into<String>, id: ObjectId) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            _marker: PhantomData,
        }
    }

    /// Points at the object behind an access handle.
    pub fn to(access: &DataAccess<T>) -> Self {
        Self::new(access.key().identifier(), access.id())
    }
}

impl<T> DataReference<T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl<T> Clone for DataReference<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            identifier: self.identifier.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for DataReference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.identifier == other.identifier
    }
}

impl<T> Eq for DataReference<T> {}

impl<T> fmt::Debug for DataReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReference")
            .field("identifier", &self.identifier)
            .field("id", &self.id)
            .finish()
    }
}
