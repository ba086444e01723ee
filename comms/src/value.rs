//! The values held by worker registers and carried inside commands.

use std::{
    error::Error,
    fmt::{self, Display},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// A single register value.
///
/// The set of variants is closed, every consumer matches on it exhaustively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    Tensor(Tensor),
    Op(OpHandle),
}

impl Value {
    /// Returns a short name of the variant, used for logging and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tensor(_) => "tensor",
            Value::Op(_) => "op",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Tensor> for Value {
    fn from(value: Tensor) -> Self {
        Self::Tensor(value)
    }
}

impl From<OpHandle> for Value {
    fn from(value: OpHandle) -> Self {
        Self::Op(value)
    }
}

/// Error returned whenever a tensor's shape doesn't describe its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeErr {
    /// The shape's element count differs from the data length.
    Mismatch { expected: usize, got: usize },
    /// The shape's element count doesn't fit in a `usize`.
    Overflow,
}

impl Display for ShapeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeErr::Mismatch { expected, got } => {
                write!(f, "tensor shape expects {expected} elements, got {got}")
            }
            ShapeErr::Overflow => f.write_str("tensor shape element count overflows"),
        }
    }
}

impl Error for ShapeErr {}

/// Returns the amount of elements a tensor of `shape` holds.
///
/// # Errors
/// `ShapeErr::Overflow` if the product of the dimensions overflows.
pub fn numel_of(shape: &[usize]) -> Result<usize, ShapeErr> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(ShapeErr::Overflow)
}

/// A dense, row-major `f32` tensor living on the worker's default device.
///
/// Elements are encoded one by one in serialized form, non-finite ones as the
/// strings `"nan"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawTensor", try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<Elem>,
}

impl From<Tensor> for RawTensor {
    fn from(tensor: Tensor) -> Self {
        Self {
            shape: tensor.shape,
            data: tensor.data.into_iter().map(Elem).collect(),
        }
    }
}

impl TryFrom<RawTensor> for Tensor {
    type Error = ShapeErr;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        let data = raw.data.into_iter().map(|Elem(x)| x).collect();
        Tensor::new(raw.shape, data)
    }
}

/// A tensor element, every `f32` widens to `f64` and narrows back exactly.
struct Elem(f32);

impl Serialize for Elem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        float_repr::serialize(&f64::from(self.0), serializer)
    }
}

impl<'de> Deserialize<'de> for Elem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        float_repr::deserialize(deserializer).map(|x| Elem(x as f32))
    }
}

/// Floats as plain numbers when finite, as a string otherwise, since JSON has
/// no literal for NaN nor the infinities.
mod float_repr {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match *x {
            x if x.is_finite() => serializer.serialize_f64(x),
            x if x.is_nan() => serializer.serialize_str("nan"),
            x if x > 0.0 => serializer.serialize_str("inf"),
            _ => serializer.serialize_str("-inf"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Num(x) => Ok(x),
            Repr::Special(s) => match s.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::custom(format!("invalid float {other:?}"))),
            },
        }
    }
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the tensor.
    /// * `data` - The flat row-major elements.
    ///
    /// # Returns
    /// The tensor or a `ShapeErr` if `data` doesn't fit `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeErr> {
        let expected = numel_of(&shape)?;
        if expected != data.len() {
            return Err(ShapeErr::Mismatch {
                expected,
                got: data.len(),
            });
        }

        Ok(Self { shape, data })
    }

    /// Creates a one dimensional tensor out of `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self, ShapeErr> {
        let data = vec![0.0; numel_of(&shape)?];
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// A reference to a registered operation, resolved by name on the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpHandle {
    name: String,
}

impl OpHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_rejects_mismatched_shape() {
        let err = Tensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(err, ShapeErr::Mismatch { expected: 6, got: 5 });
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let shape = vec![1 << 33, 1 << 33, 4];

        assert_eq!(Tensor::new(shape.clone(), vec![]), Err(ShapeErr::Overflow));
        assert_eq!(Tensor::zeros(shape), Err(ShapeErr::Overflow));

        let json = r#"{"shape":[8589934592,8589934592,4],"data":[]}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());
    }

    #[test]
    fn non_finite_elements_survive_json() {
        let tensor = Tensor::from_vec(vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1.5]);
        let json = serde_json::to_string(&Value::Tensor(tensor)).unwrap();

        let Value::Tensor(back) = serde_json::from_str(&json).unwrap() else {
            panic!("expected a tensor back from {json}");
        };
        assert!(back.data()[0].is_nan());
        assert_eq!(back.data()[1..], [f32::INFINITY, f32::NEG_INFINITY, 1.5]);

        let json = serde_json::to_string(&Value::Float(f64::NEG_INFINITY)).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), Value::Float(f64::NEG_INFINITY));
        assert!(serde_json::from_str::<Value>(r#"{"float":"huge"}"#).is_err());
    }

    #[test]
    fn tensor_deserialization_validates_shape() {
        let json = r#"{"shape":[2,2],"data":[1.0,2.0,3.0]}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());

        let json = r#"{"shape":[2,2],"data":[1.0,2.0,3.0,4.0]}"#;
        let tensor: Tensor = serde_json::from_str(json).unwrap();
        assert_eq!(tensor.shape(), &[2, 2]);
    }

    #[test]
    fn default_value_is_null() {
        assert!(Value::default().is_null());
    }
}
