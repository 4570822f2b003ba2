use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Tri-state seen by consumers of a polled resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FetchState<T> {
    Loading,
    #[serde(rename = "success")]
    Ready { data: T },
    #[serde(rename = "error")]
    Failed { error: String },
}

impl<T> FetchState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            FetchState::Ready { data } => Some(data),
            _ => None,
        }
    }
}

impl<T> From<Result<T>> for FetchState<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => FetchState::Ready { data },
            Err(e) => FetchState::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Calls `fetch` immediately and then once per `period`, publishing every
/// outcome on `tx`. Runs until every receiver is dropped; callers that want
/// to stop earlier abort the task.
pub async fn run_poller<T, F, Fut>(
    name: &'static str,
    period: Duration,
    mut fetch: F,
    tx: watch::Sender<FetchState<T>>,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    info!("Starting {} poller with period={:?}", name, period);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let start = Instant::now();
                let state = FetchState::from(fetch().await);

                match &state {
                    FetchState::Failed { error } => warn!("{} poll failed: {}", name, error),
                    _ => debug!("{} poll completed in {:.3}s", name, start.elapsed().as_secs_f64()),
                }

                if tx.send(state).is_err() {
                    break;
                }
            }

            _ = tx.closed() => {
                break;
            }
        }
    }

    info!("{} poller stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_state_from_result() {
        let ok: FetchState<u32> = Ok(3).into();
        assert_eq!(ok.data(), Some(&3));

        let failed: FetchState<u32> = Err(Error::ApiSemantic("down".to_string())).into();
        assert_eq!(
            failed,
            FetchState::Failed {
                error: "API error: down".to_string()
            }
        );
        assert!(FetchState::<u32>::Loading.is_loading());
    }

    #[test]
    fn test_state_serialization() {
        let ready = serde_json::to_value(FetchState::Ready { data: vec![1, 2] }).unwrap();
        assert_eq!(ready, serde_json::json!({"state": "success", "data": [1, 2]}));

        let loading = serde_json::to_value(FetchState::<u8>::Loading).unwrap();
        assert_eq!(loading, serde_json::json!({"state": "loading"}));

        let failed = serde_json::to_value(FetchState::<u8>::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(failed, serde_json::json!({"state": "error", "error": "boom"}));
    }

    #[tokio::test]
    async fn test_poller_publishes_and_stops_when_receivers_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = watch::channel(FetchState::Loading);

        let counter = calls.clone();
        let handle = tokio::spawn(run_poller(
            "test",
            Duration::from_millis(200),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(Error::ApiSemantic("first call fails".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            },
            tx,
        ));

        assert!(rx.borrow().is_loading());

        rx.changed().await.unwrap();
        assert!(matches!(&*rx.borrow_and_update(), FetchState::Failed { .. }));

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().data().is_some());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller should stop once receivers are gone")
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
