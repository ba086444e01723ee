use comms::{
    msg::{CollectiveOp, ReduceKind},
    value::Tensor,
};
use orchestrator::{Result, Session};

const NUM_WORKERS: usize = 4;
const NUM_GROUPS: usize = 2;

fn main() -> Result<()> {
    env_logger::init();

    let mut session = Session::new(NUM_WORKERS, NUM_GROUPS)?;

    for worker_id in 0..NUM_WORKERS {
        let tensor = Tensor::from_vec(vec![worker_id as f32; 4]);
        session.upload_tensor(worker_id, 0, &tensor)?;
    }

    session.collective(CollectiveOp::AllReduce {
        input: 0,
        out: 1,
        reduce: ReduceKind::Avg,
    })?;

    for worker_id in 0..NUM_WORKERS {
        let reduced = session.download_tensor(worker_id, 1)?;
        println!("worker {worker_id} group average: {reduced:?}");
    }

    session.shutdown()
}
