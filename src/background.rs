//! 定期保留清扫的后台任务，随进程关闭通过取消令牌停止。

use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cleanup::sweep_all;

/// 启动保留清扫任务；间隔为 0 时不启动。
pub fn spawn_retention_sweep(
    dirs: Vec<PathBuf>,
    retention: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("retention sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("retention sweep stopped");
                    break;
                }
                _ = interval.tick() => {
                    sweep_all(&dirs, retention).await;
                }
            }
        }
    }))
}
