use crate::errors::DecodeError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A persistent domain record that can travel inside a job.
///
/// Live records are not transport-safe: they may hold open resources, and
/// they would be stale by the time a delayed job runs. Jobs therefore carry
/// them as [`ModelRef`] fields, which serialize as a `(model, key)` reference
/// and are re-loaded from the [`ModelStore`] when the job is decoded.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registered name of the model, matched against [`ModelStore::load`]
    /// lookups.
    const MODEL_NAME: &'static str;

    /// Primary-key type.
    type Key: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// The record's primary-key value.
    fn key(&self) -> Self::Key;
}

/// Read-only access to the storage that backs [`ModelRef`] fields.
///
/// Lookups are point-in-time reads; the store's own consistency guarantees
/// apply. The worker never writes through this interface.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Look up a record by model name and primary key.
    ///
    /// Returns `Ok(None)` when no such record exists, which the decoder
    /// treats as a hard decode error.
    async fn load(&self, model: &str, key: &Value) -> anyhow::Result<Option<Value>>;
}

/// A [`ModelStore`] holding no records, for applications whose jobs do not
/// carry model references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl ModelStore for NullStore {
    async fn load(&self, _model: &str, _key: &Value) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

enum State<M: Model> {
    Live(M),
    Detached(M::Key),
}

/// A job field referencing a [`Model`].
///
/// Serializes as `{"model": .., "key": ..}` whether it currently holds a
/// live record or not, so encoding never mutates the job. Deserialization
/// always produces a detached reference; the decoder resolves every
/// reference declared in [`Job::model_refs`](crate::Job::model_refs) before
/// the job runs.
pub struct ModelRef<M: Model>(State<M>);

impl<M: Model> ModelRef<M> {
    /// Wrap a live record.
    pub fn new(model: M) -> Self {
        Self(State::Live(model))
    }

    /// Primary key of the referenced record.
    pub fn key(&self) -> M::Key {
        match &self.0 {
            State::Live(model) => model.key(),
            State::Detached(key) => key.clone(),
        }
    }

    /// Whether the reference currently holds a live record.
    pub fn is_live(&self) -> bool {
        matches!(self.0, State::Live(_))
    }

    /// The live record.
    ///
    /// # Panics
    ///
    /// Panics when the reference has not been resolved. References inside a
    /// decoded job are always resolved before `run` is invoked, so this only
    /// fires on a manually deserialized job.
    pub fn get(&self) -> &M {
        match &self.0 {
            State::Live(model) => model,
            State::Detached(_) => {
                panic!("{} reference accessed before it was resolved", M::MODEL_NAME)
            }
        }
    }
}

impl<M: Model> From<M> for ModelRef<M> {
    fn from(model: M) -> Self {
        Self::new(model)
    }
}

impl<M: Model + fmt::Debug> fmt::Debug for ModelRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            State::Live(model) => f.debug_tuple("ModelRef").field(model).finish(),
            State::Detached(_) => write!(f, "ModelRef(detached {})", M::MODEL_NAME),
        }
    }
}

#[derive(Serialize)]
struct RawRef<'a, K: Serialize> {
    model: &'a str,
    key: K,
}

#[derive(Deserialize)]
struct OwnedRawRef<K> {
    model: String,
    key: K,
}

impl<M: Model> Serialize for ModelRef<M> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawRef {
            model: M::MODEL_NAME,
            key: self.key(),
        }
        .serialize(serializer)
    }
}

impl<'de, M: Model> Deserialize<'de> for ModelRef<M> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = OwnedRawRef::<M::Key>::deserialize(deserializer)?;
        if raw.model != M::MODEL_NAME {
            return Err(serde::de::Error::custom(format!(
                "expected a {} reference, found {}",
                M::MODEL_NAME,
                raw.model
            )));
        }
        Ok(Self(State::Detached(raw.key)))
    }
}

/// Object-safe view of a [`ModelRef`], used by the decoder to resolve the
/// references a job declares.
#[async_trait]
pub trait AnyModelRef: Send {
    /// Registered name of the referenced model.
    fn model_name(&self) -> &'static str;

    /// Replace a detached reference with a freshly loaded record. A no-op on
    /// references that are already live.
    async fn resolve(&mut self, store: &dyn ModelStore) -> Result<(), DecodeError>;
}

#[async_trait]
impl<M: Model> AnyModelRef for ModelRef<M> {
    fn model_name(&self) -> &'static str {
        M::MODEL_NAME
    }

    async fn resolve(&mut self, store: &dyn ModelStore) -> Result<(), DecodeError> {
        let State::Detached(key) = &self.0 else {
            return Ok(());
        };
        let key = serde_json::to_value(key)?;
        let record = store
            .load(M::MODEL_NAME, &key)
            .await
            .map_err(DecodeError::Lookup)?;
        let Some(record) = record else {
            return Err(DecodeError::ModelNotFound {
                model: M::MODEL_NAME,
                key,
            });
        };
        self.0 = State::Live(serde_json::from_value(record)?);
        Ok(())
    }
}
