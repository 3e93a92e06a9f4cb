//! Call Supervision
//!
//! Runs playback as its own task once the call is up, and ends the call on
//! whichever comes first: a local shutdown request or the call ending.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::asset::AssetStore;
use super::engine::{PlaybackEngine, PlaybackReport};
use super::session::{CallControl, MediaSession};
use super::PlaybackError;

/// How the call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Local shutdown; the call was hung up
    Shutdown,
    /// The call ended on its own (remote hangup, media timeout)
    Ended,
}

/// Result of a supervised call
#[derive(Debug)]
pub struct CallSummary {
    pub outcome: CallOutcome,
    /// Playback report, if the playback task finished in time
    pub playback: Option<PlaybackReport>,
}

/// Play `assets` to the caller and wait for the call to end.
///
/// On `shutdown` playback is cancelled and the call hung up, bounded by
/// `hangup_timeout`. When the call ends by itself playback is cancelled and
/// the function returns without hanging up. Playback finishing first does
/// not end the call. A playback transport failure hangs up the call and is
/// returned as the error.
pub async fn run_call<S, C, A, F>(
    session: S,
    control: &C,
    store: Arc<A>,
    assets: Vec<String>,
    engine: PlaybackEngine,
    hangup_timeout: Duration,
    shutdown: F,
) -> Result<CallSummary, PlaybackError>
where
    S: MediaSession + 'static,
    C: CallControl + ?Sized,
    A: AssetStore + ?Sized + 'static,
    F: Future<Output = ()>,
{
    let cancel = engine.cancel_token();

    let mut playback: JoinHandle<Result<PlaybackReport, PlaybackError>> =
        tokio::spawn(async move {
            let mut session = session;
            engine.play(&mut session, store.as_ref(), &assets).await
        });
    let mut report: Option<PlaybackReport> = None;
    let mut playback_done = false;

    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, hanging up");
                cancel.cancel();
                hangup(control, hangup_timeout).await;
                break CallOutcome::Shutdown;
            }
            _ = control.done() => {
                tracing::info!("Call ended");
                cancel.cancel();
                break CallOutcome::Ended;
            }
            joined = &mut playback, if !playback_done => {
                playback_done = true;
                match joined {
                    Ok(Ok(r)) => {
                        tracing::info!("Playback done, waiting for the call to end");
                        report = Some(r);
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Playback failed: {}", e);
                        hangup(control, hangup_timeout).await;
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::error!("Playback task failed: {}", e);
                    }
                }
            }
        }
    };

    if !playback_done {
        // Cancelled above, so the task stops at its next suspension point
        match tokio::time::timeout(hangup_timeout, &mut playback).await {
            Ok(Ok(Ok(r))) => report = Some(r),
            Ok(Ok(Err(e))) => tracing::warn!("Playback ended with error after call end: {}", e),
            Ok(Err(e)) => tracing::error!("Playback task failed: {}", e),
            Err(_) => {
                tracing::warn!("Playback task did not stop in {:?}, aborting", hangup_timeout);
                playback.abort();
            }
        }
    }

    Ok(CallSummary {
        outcome,
        playback: report,
    })
}

async fn hangup<C: CallControl + ?Sized>(control: &C, timeout: Duration) {
    match tokio::time::timeout(timeout, control.hangup(timeout)).await {
        Ok(Ok(())) => tracing::info!("Call hung up"),
        Ok(Err(e)) => tracing::warn!("Hangup failed: {}", e),
        Err(_) => tracing::warn!("Hangup timed out after {:?}", timeout),
    }
}
