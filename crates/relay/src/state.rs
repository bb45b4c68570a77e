use std::sync::Arc;

use dr_types::{FrameBuffer, TelemetrySnapshot};
use tokio::sync::watch;

/// A telemetry snapshot and the frame rendered in the same tick.
#[derive(Clone, Debug, PartialEq)]
pub struct StatePair {
    pub telemetry: TelemetrySnapshot,
    pub frame: FrameBuffer,
}

/// The latest rendered pair. There is one writer (the render loop); readers
/// get [`StateReader`] handles. Publishing swaps a single `Arc`, so a reader
/// always sees a telemetry snapshot together with the frame it was stored
/// with.
#[derive(Debug)]
pub struct SharedState {
    tx: watch::Sender<Arc<StatePair>>,
    rx: watch::Receiver<Arc<StatePair>>,
}

impl SharedState {
    /// Creates the cell holding `placeholder`, which readers see until the
    /// first publish.
    pub fn new(placeholder: FrameBuffer) -> Self {
        let (tx, rx) = watch::channel(Arc::new(StatePair {
            telemetry: TelemetrySnapshot::default(),
            frame: placeholder,
        }));

        Self { tx, rx }
    }

    pub fn publish(&self, telemetry: TelemetrySnapshot, frame: FrameBuffer) {
        // cannot fail, self.rx keeps the channel open
        let _ = self.tx.send(Arc::new(StatePair { telemetry, frame }));
    }

    pub fn read(&self) -> Arc<StatePair> {
        self.rx.borrow().clone()
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            rx: self.rx.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StateReader {
    rx: watch::Receiver<Arc<StatePair>>,
}

impl StateReader {
    pub fn read(&self) -> Arc<StatePair> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use dr_types::{DeviceTelemetry, FrameBuffer, TelemetrySnapshot};

    use super::*;

    fn pair(n: u64) -> (TelemetrySnapshot, FrameBuffer) {
        let telemetry = TelemetrySnapshot {
            device: DeviceTelemetry {
                altitude: n as f32,
                ..Default::default()
            },
            ..Default::default()
        };

        let frame = FrameBuffer {
            jpeg: Bytes::from(n.to_le_bytes().to_vec()),
            width: 1,
            height: 1,
            sequence: n,
            detections: Arc::from(Vec::new()),
        };

        (telemetry, frame)
    }

    #[test]
    fn placeholder_before_first_publish() {
        let state = SharedState::new(FrameBuffer::not_ready());
        let current = state.reader().read();

        assert!(current.frame.is_placeholder());
        assert_eq!(current.telemetry, TelemetrySnapshot::default());
    }

    #[test]
    fn publish_replaces_whole_pair() {
        let state = SharedState::new(FrameBuffer::not_ready());
        let reader = state.reader();

        let (telemetry, frame) = pair(3);
        state.publish(telemetry.clone(), frame.clone());

        let current = reader.read();
        assert_eq!(current.telemetry, telemetry);
        assert_eq!(current.frame, frame);
        assert_eq!(state.read(), current);
    }

    #[test]
    fn concurrent_readers_never_see_mixed_pairs() {
        let state = Arc::new(SharedState::new(FrameBuffer::not_ready()));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = state.reader();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..20_000 {
                        let current = reader.read();
                        let sequence = current.frame.sequence;

                        if sequence != 0 {
                            assert_eq!(current.telemetry.device.altitude, sequence as f32);
                            assert_eq!(&current.frame.jpeg[..], &sequence.to_le_bytes()[..]);
                        }

                        // one writer, so a reader never goes backwards
                        assert!(sequence >= last);
                        last = sequence;
                    }
                })
            })
            .collect();

        for n in 1..=5_000 {
            let (telemetry, frame) = pair(n);
            state.publish(telemetry, frame);
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
