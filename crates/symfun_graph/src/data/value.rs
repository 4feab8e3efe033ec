use crate::data::dtype::{DType, Type};
use crate::data::op::OpError;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A reference-counted element buffer.  Cloning a `Storage` aliases it.
#[derive(Clone)]
struct Storage(Rc<RefCell<Vec<f64>>>);

impl Storage {
    fn new(data: Vec<f64>) -> Self {
        Storage(Rc::new(RefCell::new(data)))
    }
}

/// A concrete array flowing through a compiled function.
///
/// Two values whose buffers are the same allocation are aliases: an in-place write through one is
/// visible through the other.  All elements are held as `f64` and normalized to the dtype on
/// every write.
#[derive(Clone)]
pub struct Value {
    dtype: DType,
    shape: Vec<usize>,
    storage: Storage,
}

impl Value {
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<f64>) -> Result<Self, OpError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(OpError::BadElementCount {
                shape,
                len: data.len(),
            });
        }
        Ok(Value {
            dtype,
            shape,
            storage: Storage::new(data.into_iter().map(|x| dtype.normalize(x)).collect()),
        })
    }

    pub fn scalar(dtype: DType, x: f64) -> Self {
        Value {
            dtype,
            shape: Vec::new(),
            storage: Storage::new(vec![dtype.normalize(x)]),
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Value {
            dtype: DType::Float64,
            shape: vec![data.len()],
            storage: Storage::new(data),
        }
    }

    pub fn filled(dtype: DType, shape: Vec<usize>, x: f64) -> Self {
        let len = shape.iter().product();
        Value {
            dtype,
            shape,
            storage: Storage::new(vec![dtype.normalize(x); len]),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.storage.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The narrowest static type describing this value.
    pub fn ty(&self) -> Type {
        Type::new(self.dtype, self.shape.iter().map(|&dim| Some(dim)).collect())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.storage.0.borrow().clone()
    }

    pub fn item(&self) -> Option<f64> {
        let data = self.storage.0.borrow();
        if data.len() == 1 {
            Some(data[0])
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.storage.0.borrow().get(index).copied()
    }

    /// Writes one element in place.  Every alias of this value observes the write.
    pub fn set(&self, index: usize, x: f64) -> Result<(), OpError> {
        let mut data = self.storage.0.borrow_mut();
        let len = data.len();
        match data.get_mut(index) {
            Some(slot) => {
                *slot = self.dtype.normalize(x);
                Ok(())
            }
            None => Err(OpError::IndexOutOfBounds { index, len }),
        }
    }

    /// Replaces the contents of the buffer in place, keeping its identity.
    pub fn overwrite(&self, data: Vec<f64>) -> Result<(), OpError> {
        let mut current = self.storage.0.borrow_mut();
        if current.len() != data.len() {
            return Err(OpError::BadElementCount {
                shape: self.shape.clone(),
                len: data.len(),
            });
        }
        for (slot, x) in current.iter_mut().zip(data) {
            *slot = self.dtype.normalize(x);
        }
        Ok(())
    }

    pub fn shares_storage(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.storage.0, &other.storage.0)
    }

    /// Whether no other value (in the caller's hands or in any slot) holds this buffer.
    pub fn is_uniquely_owned(&self) -> bool {
        Rc::strong_count(&self.storage.0) == 1
    }

    pub fn deep_copy(&self) -> Value {
        Value {
            dtype: self.dtype,
            shape: self.shape.clone(),
            storage: Storage::new(self.to_vec()),
        }
    }

    /// A value with a different shape over the same buffer.
    pub fn view_with_shape(&self, shape: Vec<usize>) -> Result<Value, OpError> {
        let len: usize = shape.iter().product();
        if len != self.len() {
            return Err(OpError::BadElementCount {
                shape,
                len: self.len(),
            });
        }
        Ok(Value {
            dtype: self.dtype,
            shape,
            storage: self.storage.clone(),
        })
    }

    pub fn cast(&self, dtype: DType) -> Value {
        Value {
            dtype,
            shape: self.shape.clone(),
            storage: Storage::new(self.to_vec().into_iter().map(|x| dtype.normalize(x)).collect()),
        }
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[f64]) -> R) -> R {
        f(&self.storage.0.borrow())
    }

    /// Element-wise comparison within an absolute-plus-relative tolerance.  Non-float values and
    /// a zero tolerance require exact equality.
    pub fn allclose(&self, other: &Value, tol: f64) -> bool {
        if self.shape != other.shape {
            return false;
        }
        let a = self.storage.0.borrow();
        let b = other.storage.0.borrow();
        a.iter().zip(b.iter()).all(|(&x, &y)| {
            if x.is_nan() || y.is_nan() {
                x.is_nan() && y.is_nan()
            } else if x == y {
                true
            } else {
                (x - y).abs() <= tol * (1.0 + y.abs())
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.shape == other.shape && self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}{:?}", self.dtype, self.shape, self.storage.0.borrow())
    }
}
