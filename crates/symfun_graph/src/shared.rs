use crate::data::dtype::Type;
use crate::data::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SharedError {
    #[error("shared value '{name}' has been released")]
    Released { name: String },
    #[error("shared value '{name}' has type {expected}, cannot hold a value of type {got}")]
    TypeMismatch {
        name: String,
        expected: Type,
        got: Type,
    },
}

#[derive(Debug)]
struct SharedInner {
    name: String,
    ty: Type,
    value: Option<Value>,
}

/// Storage that outlives any single call.  Clones refer to the same container.
///
/// The type of a shared value fixes its dtype and rank; its dimensions stay unknown so that
/// `set_value` may change them between calls.
#[derive(Clone)]
pub struct SharedValue(Rc<RefCell<SharedInner>>);

impl SharedValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        let ty = Type::new(value.dtype(), vec![None; value.shape().len()]);
        SharedValue(Rc::new(RefCell::new(SharedInner {
            name: name.into(),
            ty,
            value: Some(value),
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn ty(&self) -> Type {
        self.0.borrow().ty.clone()
    }

    fn released(&self) -> SharedError {
        SharedError::Released { name: self.name() }
    }

    /// The current value.  Without `borrow` the caller gets a private copy; with it, an alias of
    /// the container's buffer, which later calls may overwrite.
    pub fn get_value(&self, borrow: bool) -> Result<Value, SharedError> {
        match &self.0.borrow().value {
            Some(value) if borrow => Ok(value.clone()),
            Some(value) => Ok(value.deep_copy()),
            None => Err(self.released()),
        }
    }

    pub fn set_value(&self, value: Value, borrow: bool) -> Result<(), SharedError> {
        let mut inner = self.0.borrow_mut();
        if inner.value.is_none() {
            return Err(SharedError::Released {
                name: inner.name.clone(),
            });
        }
        if value.dtype() != inner.ty.dtype || !inner.ty.accepts_shape(value.shape()) {
            return Err(SharedError::TypeMismatch {
                name: inner.name.clone(),
                expected: inner.ty.clone(),
                got: value.ty(),
            });
        }
        inner.value = Some(if borrow { value } else { value.deep_copy() });
        Ok(())
    }

    /// Drops the stored value.  Every later read, update, or compilation against this container
    /// fails with [`SharedError::Released`].
    pub fn release(&self) {
        self.0.borrow_mut().value = None;
    }

    pub fn is_released(&self) -> bool {
        self.0.borrow().value.is_none()
    }

    pub fn same_container(&self, other: &SharedValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        write!(f, "SharedValue({}: {})", inner.name, inner.ty)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::dtype::DType;

    #[test]
    fn get_value_copies_unless_borrowed() {
        let shared = SharedValue::new("w", Value::vector(vec![1.0, 2.0]));
        let copy = shared.get_value(false).unwrap();
        let alias = shared.get_value(true).unwrap();
        assert!(!copy.shares_storage(&alias));
        assert!(alias.shares_storage(&shared.get_value(true).unwrap()));
    }

    #[test]
    fn set_value_checks_dtype_and_rank() {
        let shared = SharedValue::new("w", Value::vector(vec![1.0, 2.0]));
        shared
            .set_value(Value::vector(vec![1.0, 2.0, 3.0]), false)
            .unwrap();
        assert!(matches!(
            shared.set_value(Value::scalar(DType::Float64, 1.0), false),
            Err(SharedError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn release_is_terminal() {
        let shared = SharedValue::new("w", Value::scalar(DType::Int64, 3.0));
        shared.release();
        assert!(shared.is_released());
        assert!(matches!(
            shared.get_value(false),
            Err(SharedError::Released { .. })
        ));
        assert!(shared
            .set_value(Value::scalar(DType::Int64, 1.0), false)
            .is_err());
    }
}
