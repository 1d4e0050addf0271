use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of uniform shapes a preset can declare and a program can
/// bind by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformKind {
    pub fn components(self) -> usize {
        match self {
            UniformKind::Float => 1,
            UniformKind::Vec2 => 2,
            UniformKind::Vec3 => 3,
            UniformKind::Vec4 => 4,
        }
    }

    pub fn byte_size(self) -> usize {
        self.components() * std::mem::size_of::<f32>()
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniformKind::Float => "float",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Scalar(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
        }
    }

    pub fn components(&self) -> &[f32] {
        match self {
            UniformValue::Scalar(value) => std::slice::from_ref(value),
            UniformValue::Vec2(values) => values,
            UniformValue::Vec3(values) => values,
            UniformValue::Vec4(values) => values,
        }
    }

    /// Builds a value of `kind` from exactly `kind.components()` numbers.
    pub fn from_components(kind: UniformKind, values: &[f32]) -> Option<Self> {
        let value = match (kind, values) {
            (UniformKind::Float, [x]) => UniformValue::Scalar(*x),
            (UniformKind::Vec2, [x, y]) => UniformValue::Vec2([*x, *y]),
            (UniformKind::Vec3, [x, y, z]) => UniformValue::Vec3([*x, *y, *z]),
            (UniformKind::Vec4, [x, y, z, w]) => UniformValue::Vec4([*x, *y, *z, *w]),
            _ => return None,
        };
        Some(value)
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            UniformValue::Scalar(value) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_match_kind() {
        let values = [
            UniformValue::Scalar(1.0),
            UniformValue::Vec2([1.0, 2.0]),
            UniformValue::Vec3([1.0, 2.0, 3.0]),
            UniformValue::Vec4([1.0, 2.0, 3.0, 4.0]),
        ];
        for value in values {
            assert_eq!(value.components().len(), value.kind().components());
            assert_eq!(
                UniformValue::from_components(value.kind(), value.components()),
                Some(value)
            );
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        assert_eq!(UniformValue::from_components(UniformKind::Vec3, &[1.0]), None);
        assert_eq!(UniformValue::from_components(UniformKind::Float, &[]), None);
    }
}
