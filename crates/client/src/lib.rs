use std::time::Duration;

use async_trait::async_trait;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Task {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()>;
}

pub type Command<Req, Res, Err = anyhow::Error> = (Req, oneshot::Sender<Result<Res, Err>>);
pub type ChannelCommandSink<Req, Res, Err = anyhow::Error> = flume::Sender<Command<Req, Res, Err>>;
pub type ChannelCommandSource<Req, Res, Err = anyhow::Error> =
    flume::Receiver<Command<Req, Res, Err>>;

/// Error returned when a request could not make it to the task that serves
/// it, or the task dropped the reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("command channel closed")]
    Closed,

    #[error("timed out waiting for command reply")]
    Timeout,
}

#[async_trait]
pub trait CommandSink {
    type Request;
    type Response;

    async fn command(&self, request: Self::Request) -> Result<Self::Response, ChannelError>;

    /// Like `command`, but stops waiting for the reply after `timeout`. The
    /// request keeps its place in the queue even if the caller gives up.
    async fn command_timeout(
        &self,
        request: Self::Request,
        timeout: Duration,
    ) -> Result<Self::Response, ChannelError>;
}

#[async_trait]
impl<Req: Send, Res: Send, Err: Send> CommandSink for ChannelCommandSink<Req, Res, Err> {
    type Request = Req;
    type Response = Result<Res, Err>;

    async fn command(&self, request: Self::Request) -> Result<Self::Response, ChannelError> {
        let (tx, rx) = oneshot::channel();
        if let Err(_) = self.send_async((request, tx)).await {
            return Err(ChannelError::Closed);
        }
        rx.await.map_err(|_| ChannelError::Closed)
    }

    async fn command_timeout(
        &self,
        request: Self::Request,
        timeout: Duration,
    ) -> Result<Self::Response, ChannelError> {
        match tokio::time::timeout(timeout, self.command(request)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout),
        }
    }
}

/// Fastest rate a periodic task may be configured for.
pub const MAX_RATE_HZ: f32 = 1000.0;

/// Converts a rate in hertz into a tick period. Returns `None` for rates that
/// are not positive, not finite or above [`MAX_RATE_HZ`].
pub fn period_from_hz(hz: f32) -> Option<Duration> {
    if !(hz > 0.0 && hz <= MAX_RATE_HZ) {
        return None;
    }

    Duration::try_from_secs_f32(1.0 / hz)
        .ok()
        .filter(|period| !period.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_roundtrips_through_channel() {
        let (tx, rx): (ChannelCommandSink<u32, u32>, _) = flume::bounded(4);

        tokio::spawn(async move {
            while let Ok((req, ret)) = rx.recv_async().await {
                let _ = ret.send(Ok(req * 2));
            }
        });

        let result = tx.command_timeout(21, Duration::from_secs(1)).await;
        assert_eq!(result.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let (tx, rx) = flume::bounded::<Command<(), (), ()>>(1);
        drop(rx);

        let result = tx.command(()).await;
        assert_eq!(result, Err(ChannelError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_times_out() {
        let (tx, rx) = flume::bounded::<Command<(), (), ()>>(1);

        // hold the request without answering it
        let _held = tokio::spawn(async move {
            let cmd = rx.recv_async().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(cmd);
        });

        let result = tx.command_timeout((), Duration::from_millis(100)).await;
        assert_eq!(result, Err(ChannelError::Timeout));
    }

    #[test]
    fn rates_map_to_periods() {
        assert_eq!(period_from_hz(4.0), Some(Duration::from_millis(250)));
        assert!(period_from_hz(MAX_RATE_HZ).map_or(false, |period| !period.is_zero()));

        for hz in [0.0, -5.0, f32::NAN, f32::INFINITY, 1e9, f32::MIN_POSITIVE / 4.0] {
            assert_eq!(period_from_hz(hz), None, "{hz} should be rejected");
        }
    }
}
