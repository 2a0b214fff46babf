use crate::controller::{FieldKey, FieldRecord, FormController, FormResult};
use crate::subscription::Subscription;
use crate::validation::ValidationError;

#[derive(Clone)]
pub struct FieldHandle<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    controller: FormController<V, E>,
    key: FieldKey,
}

impl<V, E> FormController<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub fn register_field(
        &self,
        name: impl Into<FieldKey>,
        initial_value: Option<V>,
    ) -> FormResult<FieldHandle<V, E>> {
        let key = name.into();
        self.register(key.clone(), initial_value)?;
        Ok(FieldHandle {
            controller: self.clone(),
            key,
        })
    }
}

impl<V, E> FieldHandle<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn record(&self) -> FormResult<Option<FieldRecord<V, E>>> {
        self.controller.field_record(&self.key)
    }

    pub fn value(&self) -> FormResult<Option<V>> {
        Ok(self.record()?.and_then(|record| record.value))
    }

    pub fn errors(&self) -> FormResult<Vec<E>> {
        Ok(self
            .record()?
            .map(|record| record.errors)
            .unwrap_or_default())
    }

    pub fn set_value(&self, value: V) -> FormResult<()> {
        self.controller.set_value(&self.key, value)
    }

    pub async fn change(&self, value: V) -> FormResult<()> {
        self.controller.change(&self.key, value).await
    }

    pub fn enter(&self) -> FormResult<()> {
        self.controller.enter(&self.key)
    }

    pub async fn leave(&self) -> FormResult<()> {
        self.controller.leave(&self.key).await
    }

    pub async fn validate(&self) -> FormResult<bool> {
        self.controller.validate_field(&self.key).await
    }

    pub fn reset(&self) -> FormResult<()> {
        self.controller.reset_field(&self.key)
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.controller.subscribe_field(&self.key, listener)
    }

    pub fn deregister(&self) -> FormResult<()> {
        self.controller.deregister(&self.key)
    }
}
