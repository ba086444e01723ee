use std::io;

use log::info;
use tokio::{net::TcpListener, signal};

use worker::{WorkerBuilder, WorkerZeroData, config::WorkerConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    env_logger::init();

    let cfg = WorkerConfig::from_env()?;
    let addr = cfg.addr();

    let list = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    let (stream, peer) = list.accept().await?;
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);
    info!("controller connected from {peer}");

    let worker_zero_data = (cfg.local_worker_id == 0).then(WorkerZeroData::new);

    let mut worker =
        WorkerBuilder::from_config(&cfg)?.build(worker_zero_data.as_ref(), &mut rx, &mut tx)?;
    let _installed = worker.install()?;

    tokio::select! {
        ret = worker.main_loop() => {
            ret?;
            info!("worker shut down");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
    }

    Ok(())
}
