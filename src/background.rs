//! 会话过期清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::SessionRegistry;

/// 按固定间隔清理过期会话；间隔为 0 时不启动。
pub fn spawn_session_pruner(
    sessions: Arc<SessionRegistry>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = sessions.prune_expired().await;
            if removed > 0 {
                let remaining = sessions.len().await;
                debug!(removed, remaining, "pruned expired sessions");
            }
        }
    }))
}
