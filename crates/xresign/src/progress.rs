//! Progress reporting.
//!
//! The pipeline announces each milestone as a plain text message. Front-ends
//! receive them through a [`ProgressObserver`]; events arrive in order, on
//! the thread running the pipeline, and a slow observer stalls the run.

use std::sync::mpsc::Sender;

/// Receives progress messages from a resigning run.
pub trait ProgressObserver {
    fn on_event(&self, message: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str),
{
    fn on_event(&self, message: &str) {
        self(message)
    }
}

/// Forwards messages over a channel, e.g. to a UI thread.
///
/// Messages sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver(pub Sender<String>);

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, message: &str) {
        let _ = self.0.send(message.to_string());
    }
}

/// Observer that ignores every message. The default of a
/// [`Resigner`](crate::Resigner).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_event(&self, _message: &str) {}
}
