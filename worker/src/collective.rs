//! Collective communication between the workers of a group.
//!
//! Every worker of a group must issue the same collectives in the same order. A
//! missing or misordered peer blocks the others forever, this is never detected.

use std::{
    error::Error,
    fmt::{self, Display},
    sync::Arc,
};

use comms::{
    msg::ReduceKind,
    value::{ShapeErr, Tensor},
};
use parking_lot::Mutex;
use tokio::sync::Barrier;

/// Failures of a collective, reported identically by every participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectiveErr {
    RankOutOfRange { rank: usize, size: usize },
    ShapeMismatch { rank: usize },
    MissingRoot { root: usize },
    Shape(ShapeErr),
}

impl Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::RankOutOfRange { rank, size } => {
                write!(f, "rank {rank} is out of range for a group of {size}")
            }
            CollectiveErr::ShapeMismatch { rank } => {
                write!(f, "rank {rank} contributed a tensor of a different shape")
            }
            CollectiveErr::MissingRoot { root } => {
                write!(f, "root {root} didn't contribute a tensor")
            }
            CollectiveErr::Shape(e) => write!(f, "collective result: {e}"),
        }
    }
}

impl Error for CollectiveErr {}

impl From<ShapeErr> for CollectiveErr {
    fn from(value: ShapeErr) -> Self {
        Self::Shape(value)
    }
}

/// A collective communication backend shared by the workers of one group.
#[async_trait::async_trait]
pub trait Collective: Send + Sync {
    /// The name reported as the worker's `ccl`.
    fn name(&self) -> &str;

    /// The amount of workers that must take part in every call.
    fn group_size(&self) -> usize;

    /// Reduces `tensor` element-wise across the group, every rank gets the result.
    async fn all_reduce(
        &self,
        rank: usize,
        tensor: Tensor,
        reduce: ReduceKind,
    ) -> Result<Tensor, CollectiveErr>;

    /// Sends the tensor of `root` to every rank, the others pass `None`.
    async fn broadcast(
        &self,
        rank: usize,
        root: usize,
        tensor: Option<Tensor>,
    ) -> Result<Tensor, CollectiveErr>;

    /// Concatenates the tensors of every rank along the first dimension, in rank order.
    async fn all_gather(&self, rank: usize, tensor: Tensor) -> Result<Tensor, CollectiveErr>;

    /// Waits until every rank reaches the barrier.
    async fn barrier(&self, rank: usize) -> Result<(), CollectiveErr>;
}

/// An in-process backend for groups whose workers are threads of the same process.
///
/// Each call deposits the contribution of a rank, waits for the whole group, reads
/// every contribution and waits again, so the next call can't overwrite a slot
/// before all ranks read it.
#[derive(Debug)]
pub struct LocalCollective {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Option<Tensor>>>,
}

impl LocalCollective {
    pub const NAME: &'static str = "local";

    /// Creates a new `LocalCollective` for a group of `size` workers.
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![None; size]),
        })
    }

    async fn exchange(
        &self,
        rank: usize,
        tensor: Option<Tensor>,
    ) -> Result<Vec<Option<Tensor>>, CollectiveErr> {
        if rank >= self.size {
            return Err(CollectiveErr::RankOutOfRange {
                rank,
                size: self.size,
            });
        }

        self.slots.lock()[rank] = tensor;
        self.barrier.wait().await;
        let contributions = self.slots.lock().clone();
        self.barrier.wait().await;

        Ok(contributions)
    }
}

#[async_trait::async_trait]
impl Collective for LocalCollective {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn group_size(&self) -> usize {
        self.size
    }

    async fn all_reduce(
        &self,
        rank: usize,
        tensor: Tensor,
        reduce: ReduceKind,
    ) -> Result<Tensor, CollectiveErr> {
        let contributions = self.exchange(rank, Some(tensor)).await?;
        let tensors = present(contributions)?;
        reduce_all(&tensors, reduce)
    }

    async fn broadcast(
        &self,
        rank: usize,
        root: usize,
        tensor: Option<Tensor>,
    ) -> Result<Tensor, CollectiveErr> {
        let tensor = if rank == root { tensor } else { None };
        let mut contributions = self.exchange(rank, tensor).await?;

        contributions
            .get_mut(root)
            .and_then(Option::take)
            .ok_or(CollectiveErr::MissingRoot { root })
    }

    async fn all_gather(&self, rank: usize, tensor: Tensor) -> Result<Tensor, CollectiveErr> {
        let contributions = self.exchange(rank, Some(tensor)).await?;
        let tensors = present(contributions)?;
        gather(&tensors)
    }

    async fn barrier(&self, rank: usize) -> Result<(), CollectiveErr> {
        self.exchange(rank, None).await.map(drop)
    }
}

fn present(contributions: Vec<Option<Tensor>>) -> Result<Vec<Tensor>, CollectiveErr> {
    contributions
        .into_iter()
        .enumerate()
        .map(|(rank, tensor)| tensor.ok_or(CollectiveErr::ShapeMismatch { rank }))
        .collect()
}

fn reduce_all(tensors: &[Tensor], reduce: ReduceKind) -> Result<Tensor, CollectiveErr> {
    let Some((first, rest)) = tensors.split_first() else {
        return Err(CollectiveErr::RankOutOfRange { rank: 0, size: 0 });
    };

    let mut out = first.clone();
    for (i, tensor) in rest.iter().enumerate() {
        if tensor.shape() != first.shape() {
            return Err(CollectiveErr::ShapeMismatch { rank: i + 1 });
        }

        out.data_mut()
            .iter_mut()
            .zip(tensor.data())
            .for_each(|(acc, &x)| {
                *acc = match reduce {
                    ReduceKind::Sum | ReduceKind::Avg => *acc + x,
                    ReduceKind::Prod => *acc * x,
                    ReduceKind::Min => acc.min(x),
                    ReduceKind::Max => acc.max(x),
                }
            });
    }

    if reduce == ReduceKind::Avg {
        let n = tensors.len() as f32;
        out.data_mut().iter_mut().for_each(|x| *x /= n);
    }

    Ok(out)
}

fn gather(tensors: &[Tensor]) -> Result<Tensor, CollectiveErr> {
    let Some(first) = tensors.first() else {
        return Err(CollectiveErr::RankOutOfRange { rank: 0, size: 0 });
    };

    let mut data = Vec::with_capacity(first.numel() * tensors.len());
    for (rank, tensor) in tensors.iter().enumerate() {
        if tensor.shape() != first.shape() {
            return Err(CollectiveErr::ShapeMismatch { rank });
        }

        data.extend_from_slice(tensor.data());
    }

    let mut shape = first.shape().to_vec();
    match shape.first_mut() {
        Some(dim) => *dim = dim.checked_mul(tensors.len()).ok_or(ShapeErr::Overflow)?,
        None => shape.push(tensors.len()),
    }

    Tensor::new(shape, data).map_err(CollectiveErr::Shape)
}
