//! Send-side orchestrator: hands rendered messages to a playback sink and
//! schedules replays.
//!
//! Replays run on one worker thread with a fixed delay between the end of
//! one playback and the start of the next. Cancellation flips a flag under
//! the scheduling mutex and wakes any pending interval wait, so a replay
//! that has not started yet will never fire.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;

use crate::error::{Result, SonalinkError};
use crate::message::Message;

/// Sink for one fully rendered PCM buffer; blocks until playback ends.
pub trait PlaybackSink: Send {
    fn play(&mut self, samples: &[i16]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Sending,
}

struct Shared {
    inner: Mutex<Inner>,
    signal: Condvar,
}

struct Inner {
    state: SenderState,
    cancelled: bool,
}

/// Requests cancellation of a running send job from any thread.
#[derive(Clone)]
pub struct SenderHandle {
    shared: Arc<Shared>,
}

impl SenderHandle {
    pub fn cancel(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.cancelled = true;
        self.shared.signal.notify_all();
    }
}

pub struct Sender {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Sender {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SenderState::Idle,
                    cancelled: false,
                }),
                signal: Condvar::new(),
            }),
            worker: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.shared.inner.lock().unwrap().state
    }

    pub fn handle(&self) -> SenderHandle {
        SenderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Sends a rendered message once.
    pub fn send(&mut self, message: &Message, sink: Box<dyn PlaybackSink>) -> Result<()> {
        self.send_repeated(message, 1, Duration::ZERO, sink)
    }

    /// Sends a rendered message `n_times` with a fixed delay between the
    /// end of one playback and the start of the next.
    ///
    /// Fails when the sender is already sending, when `n_times` is zero, or
    /// when the message carries no rendered audio.
    pub fn send_repeated(
        &mut self,
        message: &Message,
        n_times: usize,
        interval: Duration,
        mut sink: Box<dyn PlaybackSink>,
    ) -> Result<()> {
        if n_times < 1 {
            return Err(SonalinkError::InvalidState(
                "cannot send a message less than one time".into(),
            ));
        }
        let samples = message
            .raw_audio()
            .ok_or_else(|| {
                SonalinkError::InvalidState("message carries no rendered audio".into())
            })?
            .to_vec();

        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state == SenderState::Sending {
                return Err(SonalinkError::InvalidState(
                    "send() called on a sender already sending".into(),
                ));
            }
            inner.state = SenderState::Sending;
            inner.cancelled = false;
        }

        // The previous job already reached Idle; reap its thread.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let shared = Arc::clone(&self.shared);
        self.worker = Some(std::thread::spawn(move || {
            for run in 0..n_times {
                if shared.inner.lock().unwrap().cancelled {
                    break;
                }
                if let Err(error) = sink.play(&samples) {
                    warn!("playback failed on run {}: {}", run + 1, error);
                    break;
                }
                if run + 1 < n_times && !wait_interval(&shared, interval) {
                    break;
                }
            }
            let mut inner = shared.inner.lock().unwrap();
            inner.state = SenderState::Idle;
            shared.signal.notify_all();
        }));
        Ok(())
    }

    /// Blocks until the current send job (if any) finished or was
    /// cancelled.
    pub fn wait_until_idle(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        while inner.state != SenderState::Idle {
            inner = self.shared.signal.wait(inner).unwrap();
        }
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.handle().cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Sleeps for `interval` or until cancellation. Returns false when the
/// wait ended because the job was cancelled.
fn wait_interval(shared: &Arc<Shared>, interval: Duration) -> bool {
    let deadline = std::time::Instant::now() + interval;
    let mut inner = shared.inner.lock().unwrap();
    loop {
        if inner.cancelled {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        let (guard, _) = shared
            .signal
            .wait_timeout(inner, deadline - now)
            .unwrap();
        inner = guard;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered_message() -> Message {
        let mut message = Message::for_sending(b"ping".to_vec());
        message.set_raw_audio(vec![0i16; 512]);
        message
    }

    struct CountingSink {
        plays: Arc<Mutex<usize>>,
    }

    impl PlaybackSink for CountingSink {
        fn play(&mut self, samples: &[i16]) -> Result<()> {
            assert_eq!(samples.len(), 512);
            *self.plays.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_send_plays_once() {
        let mut sender = Sender::new();
        let plays = Arc::new(Mutex::new(0));
        let sink = CountingSink {
            plays: Arc::clone(&plays),
        };
        sender.send(&rendered_message(), Box::new(sink)).unwrap();
        sender.wait_until_idle();
        assert_eq!(*plays.lock().unwrap(), 1);
        assert_eq!(sender.state(), SenderState::Idle);
    }

    #[test]
    fn test_send_repeated_plays_n_times() {
        let mut sender = Sender::new();
        let plays = Arc::new(Mutex::new(0));
        let sink = CountingSink {
            plays: Arc::clone(&plays),
        };
        sender
            .send_repeated(&rendered_message(), 3, Duration::from_millis(5), Box::new(sink))
            .unwrap();
        sender.wait_until_idle();
        assert_eq!(*plays.lock().unwrap(), 3);
    }

    #[test]
    fn test_cancel_prevents_scheduled_replays() {
        // The sink cancels its own sender during the first playback; the
        // four remaining replays must never fire.
        struct CancellingSink {
            plays: Arc<Mutex<usize>>,
            handle: SenderHandle,
        }
        impl PlaybackSink for CancellingSink {
            fn play(&mut self, _samples: &[i16]) -> Result<()> {
                *self.plays.lock().unwrap() += 1;
                self.handle.cancel();
                Ok(())
            }
        }

        let mut sender = Sender::new();
        let plays = Arc::new(Mutex::new(0));
        let sink = CancellingSink {
            plays: Arc::clone(&plays),
            handle: sender.handle(),
        };
        sender
            .send_repeated(&rendered_message(), 5, Duration::from_secs(60), Box::new(sink))
            .unwrap();
        sender.wait_until_idle();
        assert_eq!(*plays.lock().unwrap(), 1);
    }

    #[test]
    fn test_send_while_sending_is_rejected() {
        struct SlowSink;
        impl PlaybackSink for SlowSink {
            fn play(&mut self, _samples: &[i16]) -> Result<()> {
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            }
        }

        let mut sender = Sender::new();
        sender.send(&rendered_message(), Box::new(SlowSink)).unwrap();
        let result = sender.send(&rendered_message(), Box::new(SlowSink));
        assert!(matches!(result, Err(SonalinkError::InvalidState(_))));
        sender.wait_until_idle();
    }

    #[test]
    fn test_zero_repeats_rejected() {
        let mut sender = Sender::new();
        let plays = Arc::new(Mutex::new(0));
        let sink = CountingSink {
            plays: Arc::clone(&plays),
        };
        let result =
            sender.send_repeated(&rendered_message(), 0, Duration::ZERO, Box::new(sink));
        assert!(matches!(result, Err(SonalinkError::InvalidState(_))));
        assert_eq!(sender.state(), SenderState::Idle);
    }

    #[test]
    fn test_unrendered_message_rejected() {
        let mut sender = Sender::new();
        let plays = Arc::new(Mutex::new(0));
        let sink = CountingSink {
            plays: Arc::clone(&plays),
        };
        let message = Message::for_sending(b"no audio".to_vec());
        let result = sender.send(&message, Box::new(sink));
        assert!(matches!(result, Err(SonalinkError::InvalidState(_))));
    }
}
