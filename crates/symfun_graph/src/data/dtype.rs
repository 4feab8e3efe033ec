use std::fmt;

/// Element types, ordered so that `max` is the upcast of two types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    Bool,
    Int64,
    Float64,
}

impl DType {
    pub fn upcast(self, other: DType) -> DType {
        self.max(other)
    }

    pub fn can_cast_safely_to(self, target: DType) -> bool {
        self <= target
    }

    /// Rounds a raw element to the representable set of this dtype.
    pub fn normalize(self, x: f64) -> f64 {
        match self {
            DType::Bool => {
                if x != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::Int64 => x.trunc(),
            DType::Float64 => x,
        }
    }

    pub fn is_float(self) -> bool {
        self == DType::Float64
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Static metadata of a symbolic variable.  A `None` dimension is unknown until call time.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type {
    pub dtype: DType,
    pub shape: Vec<Option<usize>>,
}

impl Type {
    pub fn new(dtype: DType, shape: Vec<Option<usize>>) -> Self {
        Type { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        Type {
            dtype,
            shape: Vec::new(),
        }
    }

    pub fn vector(dtype: DType) -> Self {
        Type {
            dtype,
            shape: vec![None],
        }
    }

    pub fn matrix(dtype: DType) -> Self {
        Type {
            dtype,
            shape: vec![None, None],
        }
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Type {
            dtype,
            shape: self.shape.clone(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Whether a concrete shape fits this type.
    pub fn accepts_shape(&self, shape: &[usize]) -> bool {
        self.shape.len() == shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(expected, actual)| expected.map_or(true, |dim| dim == *actual))
    }

    /// Merges two shapes that must describe the same array, keeping the better-known dimension.
    pub fn unify_shape(&self, other: &Type) -> Option<Vec<Option<usize>>> {
        if self.ndim() != other.ndim() {
            return None;
        }
        self.shape
            .iter()
            .zip(&other.shape)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) if a != b => None,
                (Some(a), _) => Some(Some(*a)),
                (None, b) => Some(*b),
            })
            .collect()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Some(dim) => write!(f, "{}", dim)?,
                None => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn upcast_follows_lattice() {
        assert_eq!(DType::Bool.upcast(DType::Int64), DType::Int64);
        assert_eq!(DType::Float64.upcast(DType::Int64), DType::Float64);
        assert!(DType::Int64.can_cast_safely_to(DType::Float64));
        assert!(!DType::Float64.can_cast_safely_to(DType::Int64));
    }

    #[test]
    fn unify_keeps_known_dims_and_rejects_conflicts() {
        let a = Type::new(DType::Float64, vec![Some(3), None]);
        let b = Type::new(DType::Float64, vec![None, Some(4)]);
        assert_eq!(a.unify_shape(&b), Some(vec![Some(3), Some(4)]));

        let c = Type::new(DType::Float64, vec![Some(2), None]);
        assert_eq!(a.unify_shape(&c), None);
        assert_eq!(a.unify_shape(&Type::vector(DType::Float64)), None);
    }

    #[test]
    fn display() {
        let t = Type::new(DType::Int64, vec![Some(2), None]);
        assert_eq!(t.to_string(), "int64[2, ?]");
    }
}
