use std::fmt;
use std::sync::Arc;

use super::{EntityRef, Errors};
use crate::error::Result;

/// Adds messages to `Errors` when the entity is invalid.
pub type Validator = Arc<dyn Fn(&EntityRef, &mut Errors) + Send + Sync>;

/// Lifecycle callback; returning false halts the operation.
pub type Callback = Arc<dyn Fn(&EntityRef) -> bool + Send + Sync>;

/// Validators and lifecycle callbacks of one model, held as data.
#[derive(Clone, Default)]
pub struct Hooks {
    validators: Vec<Validator>,
    before_create: Vec<Callback>,
    after_create: Vec<Callback>,
    before_destroy: Vec<Callback>,
    after_destroy: Vec<Callback>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("validators", &self.validators.len())
            .field("before_create", &self.before_create.len())
            .field("after_create", &self.after_create.len())
            .field("before_destroy", &self.before_destroy.len())
            .field("after_destroy", &self.after_destroy.len())
            .finish()
    }
}

impl Hooks {
    /// Empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validator.
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntityRef, &mut Errors) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(f));
        self
    }

    /// Appends a before-create callback.
    pub fn before_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntityRef) -> bool + Send + Sync + 'static,
    {
        self.before_create.push(Arc::new(f));
        self
    }

    /// Appends an after-create callback.
    pub fn after_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntityRef) -> bool + Send + Sync + 'static,
    {
        self.after_create.push(Arc::new(f));
        self
    }

    /// Appends a before-destroy callback.
    pub fn before_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntityRef) -> bool + Send + Sync + 'static,
    {
        self.before_destroy.push(Arc::new(f));
        self
    }

    /// Appends an after-destroy callback.
    pub fn after_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntityRef) -> bool + Send + Sync + 'static,
    {
        self.after_destroy.push(Arc::new(f));
        self
    }

    /// Runs every validator; true when none recorded a failure.
    pub fn is_valid(&self, entity: &EntityRef, errors: &mut Errors) -> bool {
        let before = errors.len();
        for validator in &self.validators {
            validator(entity, errors);
        }
        errors.len() == before
    }

    /// Validation followed by before-create callbacks, stopping at the first
    /// failure.
    pub fn before_create_passes(&self, entity: &EntityRef, errors: &mut Errors) -> bool {
        self.is_valid(entity, errors) && run_all(&self.before_create, entity)
    }

    /// After-create callbacks.
    pub fn run_after_create(&self, entity: &EntityRef) -> bool {
        run_all(&self.after_create, entity)
    }

    /// Before-destroy callbacks.
    pub fn run_before_destroy(&self, entity: &EntityRef) -> bool {
        run_all(&self.before_destroy, entity)
    }

    /// After-destroy callbacks.
    pub fn run_after_destroy(&self, entity: &EntityRef) -> bool {
        run_all(&self.after_destroy, entity)
    }

    /// Validation and before hooks, then `inner` only if they pass, then
    /// after hooks. Returns overall success.
    pub fn run_create_steps<F>(&self, entity: &EntityRef, errors: &mut Errors, inner: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Option<EntityRef>>,
    {
        if !self.before_create_passes(entity, errors) {
            return Ok(false);
        }
        match inner()? {
            Some(created) => Ok(self.run_after_create(&created)),
            None => Ok(false),
        }
    }
}

fn run_all(callbacks: &[Callback], entity: &EntityRef) -> bool {
    callbacks.iter().all(|callback| callback(entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn failed_validation_skips_inner_block() {
        let hooks = Hooks::new().validate(|entity, errors| {
            if entity.get("name").is_none() {
                errors.add("name", "can't be blank");
            }
        });
        let entity = EntityRef::new_node(vec!["Student".into()], props! {}, None);
        let mut errors = Errors::default();
        let ran = AtomicUsize::new(0);
        let ok = hooks
            .run_create_steps(&entity, &mut errors, || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(Some(entity.clone()))
            })
            .expect("run steps");
        assert!(!ok);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(errors.on("name"), vec!["can't be blank"]);
    }

    #[test]
    fn halting_before_callback_stops_later_callbacks() {
        let later = Arc::new(AtomicUsize::new(0));
        let seen = later.clone();
        let hooks = Hooks::new().before_create(|_| false).before_create(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });
        let entity = EntityRef::new_node(vec!["Student".into()], props! {}, None);
        assert!(!hooks.before_create_passes(&entity, &mut Errors::default()));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }
}
