//! Named operations that commands invoke against register values.

use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display},
};

use comms::value::{Tensor, Value};

use crate::{identity::WorkerInfo, registry};

/// The signature of every registered operation.
pub type OpFn = dyn Fn(&[&Value]) -> Result<Value, OpErr> + Send + Sync;

/// Failures raised by an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OpErr {
    Arity {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    BadOperand {
        op: &'static str,
        index: usize,
        got: &'static str,
    },
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    Overflow(&'static str),
    NoWorker,
    Custom(String),
}

impl Display for OpErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpErr::Arity { op, expected, got } => {
                write!(f, "{op} takes {expected} operands, got {got}")
            }
            OpErr::BadOperand { op, index, got } => {
                write!(f, "{op} can't take a {got} as operand {index}")
            }
            OpErr::ShapeMismatch { op, lhs, rhs } => {
                write!(f, "{op} got mismatched shapes {lhs:?} and {rhs:?}")
            }
            OpErr::Overflow(op) => write!(f, "{op} overflowed"),
            OpErr::NoWorker => f.write_str("no worker is installed on this thread"),
            OpErr::Custom(detail) => f.write_str(detail),
        }
    }
}

impl Error for OpErr {}

/// Table of operations a worker can invoke by name.
#[derive(Default)]
pub struct OpRegistry {
    ops: HashMap<String, Box<OpFn>>,
}

impl OpRegistry {
    /// Creates an empty `OpRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an `OpRegistry` holding the builtin operations.
    ///
    /// Arithmetic: `add`, `sub`, `mul` over ints, floats and tensors (a scalar
    /// operand is broadcast over a tensor), `copy` and `sum`. Worker queries:
    /// `worker_id`, `local_worker_id`, `num_workers`, `num_groups`, `device`
    /// and `ccl`, which read the worker installed on the current thread.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry
            .register("add", |args| {
                binary("add", args, |a, b| a + b, i64::checked_add)
            })
            .register("sub", |args| {
                binary("sub", args, |a, b| a - b, i64::checked_sub)
            })
            .register("mul", |args| {
                binary("mul", args, |a, b| a * b, i64::checked_mul)
            })
            .register("copy", |args| {
                let [value] = operands::<1>("copy", args)?;
                Ok(value.clone())
            })
            .register("sum", |args| match operands::<1>("sum", args)? {
                [Value::Tensor(tensor)] => Ok(Value::Float(
                    tensor.data().iter().map(|&x| f64::from(x)).sum(),
                )),
                [other] => Err(OpErr::BadOperand {
                    op: "sum",
                    index: 0,
                    got: other.kind(),
                }),
            });

        registry
            .register("worker_id", |_| {
                query(|worker| Value::Int(worker.worker_id() as i64))
            })
            .register("local_worker_id", |_| {
                query(|worker| Value::Int(worker.local_worker_id() as i64))
            })
            .register("num_workers", |_| {
                query(|worker| Value::Int(worker.num_workers() as i64))
            })
            .register("num_groups", |_| {
                query(|worker| Value::Int(worker.num_groups() as i64))
            })
            .register("device", |_| {
                query(|worker| Value::Str(worker.default_device().to_string()))
            })
            .register("ccl", |_| query(|worker| Value::Str(worker.ccl().to_string())));

        registry
    }

    /// Registers `op` under `name`, replacing any previous operation with that name.
    pub fn register<F>(&mut self, name: impl Into<String>, op: F) -> &mut Self
    where
        F: Fn(&[&Value]) -> Result<Value, OpErr> + Send + Sync + 'static,
    {
        self.ops.insert(name.into(), Box::new(op));
        self
    }

    pub fn get(&self, name: &str) -> Option<&OpFn> {
        self.ops.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

fn operands<'v, const N: usize>(
    op: &'static str,
    args: &[&'v Value],
) -> Result<[&'v Value; N], OpErr> {
    args.try_into().map_err(|_| OpErr::Arity {
        op,
        expected: N,
        got: args.len(),
    })
}

fn query(f: impl FnOnce(&WorkerInfo) -> Value) -> Result<Value, OpErr> {
    let worker = registry::current_worker().ok_or(OpErr::NoWorker)?;
    Ok(f(&worker))
}

fn scalar(value: &Value) -> Option<f64> {
    match value {
        Value::Int(x) => Some(*x as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn binary(
    op: &'static str,
    args: &[&Value],
    float: fn(f64, f64) -> f64,
    int: fn(i64, i64) -> Option<i64>,
) -> Result<Value, OpErr> {
    let [lhs, rhs] = operands::<2>(op, args)?;

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int(*a, *b).map(Value::Int).ok_or(OpErr::Overflow(op)),
        (Value::Tensor(a), Value::Tensor(b)) => {
            if a.shape() != b.shape() {
                return Err(OpErr::ShapeMismatch {
                    op,
                    lhs: a.shape().to_vec(),
                    rhs: b.shape().to_vec(),
                });
            }

            let mut out = a.clone();
            out.data_mut()
                .iter_mut()
                .zip(b.data())
                .for_each(|(x, &y)| *x = float(f64::from(*x), f64::from(y)) as f32);

            Ok(Value::Tensor(out))
        }
        (Value::Tensor(a), b) => {
            let b = scalar(b).ok_or_else(|| bad_operand(op, 1, b))?;
            Ok(Value::Tensor(map(a, |x| float(x, b))))
        }
        (a, Value::Tensor(b)) => {
            let a = scalar(a).ok_or_else(|| bad_operand(op, 0, a))?;
            Ok(Value::Tensor(map(b, |x| float(a, x))))
        }
        (a, b) => {
            let x = scalar(a).ok_or_else(|| bad_operand(op, 0, a))?;
            let y = scalar(b).ok_or_else(|| bad_operand(op, 1, b))?;
            Ok(Value::Float(float(x, y)))
        }
    }
}

fn map(tensor: &Tensor, f: impl Fn(f64) -> f64) -> Tensor {
    let mut out = tensor.clone();
    out.data_mut()
        .iter_mut()
        .for_each(|x| *x = f(f64::from(*x)) as f32);
    out
}

fn bad_operand(op: &'static str, index: usize, value: &Value) -> OpErr {
    OpErr::BadOperand {
        op,
        index,
        got: value.kind(),
    }
}
