//! The boundary between the attribution engine and everything downstream
//! of it. The engine never encodes a wire format itself (per the Purpose
//! & Scope non-goal); it hands [`Sample`] values to a [`Sink`], and an
//! external collaborator turns those into an HTTP scrape response.

use std::sync::mpsc::{Receiver, SendError, Sender};

/// Whether a sample's value should be rendered as a monotonic counter or
/// an instantaneous gauge by the downstream exposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One `(metric, label-set, value)` triple, the unit of output for every
/// sub-collector. Labels are kept as an ordered vec rather than a map:
/// the label alphabet per metric is small and fixed, and preserving
/// insertion order makes golden-output tests readable.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: &'static str,
    pub kind: MetricKind,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

impl Sample {
    #[must_use]
    pub fn counter(name: &'static str, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            value,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn gauge(name: &'static str, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            value,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }
}

/// A destination for samples, safe to share across the concurrent
/// sub-collectors of a single scrape.
pub trait Sink: Send + Sync {
    fn emit(&self, sample: Sample);

    fn emit_all(&self, samples: impl IntoIterator<Item = Sample>)
    where
        Self: Sized,
    {
        for sample in samples {
            self.emit(sample);
        }
    }
}

/// An `mpsc`-backed sink: every sub-collector holds a cloned [`Sender`],
/// so concurrent emission needs no lock, and the orchestrator drains the
/// paired [`Receiver`] after `join`ing the scatter/gather fan-out.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Sample>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, Receiver<Sample>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, sample: Sample) -> Result<(), SendError<Sample>> { self.tx.send(sample) }
}

impl Sink for ChannelSink {
    fn emit(&self, sample: Sample) {
        // The receiving end is only ever dropped at shutdown, after every
        // sub-collector has been stopped; a send error at that point is
        // expected and not worth logging per-sample.
        let _ = self.tx.send(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order_per_sender() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(Sample::gauge("units", 3.0).with_label("manager", "slurm"));
        sink.emit(Sample::counter("cpu_total_seconds", 1.5).with_label("uuid", "1009249"));

        let first = rx.recv().unwrap();
        assert_eq!(first.name, "units");
        assert_eq!(first.labels, vec![("manager", "slurm".to_owned())]);

        let second = rx.recv().unwrap();
        assert_eq!(second.kind, MetricKind::Counter);
        assert_eq!(second.value, 1.5);
    }
}
