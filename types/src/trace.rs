//! Trace helpers: event recording and clock-skew correction.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::task::trace_event::Kind;
use crate::task::{Metadata, Trace, TraceEvent};

/// Wall-clock nanoseconds since the Unix epoch.
pub fn now_unixnano() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Append a trace event to task metadata. Only records when the metadata
/// carries a trace, so untraced tasks pay nothing.
pub fn record(info: &mut Metadata, kind: Kind) {
    if let Some(trace) = info.trace.as_mut() {
        if trace.events.capacity() == 0 {
            trace.events.reserve(20);
        }
        trace.events.push(TraceEvent { event: kind as i32, unixnano: now_unixnano() });
    }
}

/// The component that emitted an event, encoded in the enum value range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Unknown,
    Client,
    Broker,
    Provider,
}

impl Kind {
    pub fn component(self) -> Component {
        match self as i32 {
            10..=19 => Component::Client,
            20..=29 => Component::Broker,
            30..=39 => Component::Provider,
            _ => Component::Unknown,
        }
    }
}

impl Trace {
    /// Correct for clock skew between components by centering child spans
    /// within their surrounding parent span, assuming symmetric latency in
    /// both directions. Broker events are centered within the client span
    /// and provider events within the broker span.
    pub fn clock_skew_correction(&mut self) {
        if self.events.len() < 3 {
            return;
        }
        center_spans(
            &mut self.events,
            Kind::ClientTransmitRequest,
            Kind::ClientReceivedResponse,
            Component::Client,
        );
        center_spans(
            &mut self.events,
            Kind::BrokerTransmitProviderTask,
            Kind::BrokerReceivedProviderResult,
            Component::Broker,
        );
    }
}

/// Shift every event between a `start`/`end` pair of the parent component
/// so that the child chain sits centered in the parent span, preserving the
/// relative deltas between child events. Inconsistent traces (negative
/// latency, interleaved parent events) are left untouched.
fn center_spans(events: &mut [TraceEvent], start: Kind, end: Kind, parent: Component) {
    let mut parent_start: Option<i64> = None;
    let mut children: Vec<usize> = Vec::new();

    for i in 0..events.len() {
        let event = events[i].clone();
        let kind = event.event;

        if kind == start as i32 {
            parent_start = Some(event.unixnano);
            children.clear();
            continue;
        }

        if kind == end as i32 {
            let Some(span_start) = parent_start.take() else { continue };
            if children.is_empty() {
                continue;
            }
            let child_start = events[children[0]].unixnano;
            let child_end = events[*children.last().unwrap()].unixnano;
            let latency = ((event.unixnano - span_start) - (child_end - child_start)) / 2;
            if latency < 0 {
                continue; // inconsistent trace, leave as-is
            }
            let shift = (span_start + latency) - child_start;
            for &c in &children {
                events[c].unixnano += shift;
            }
            continue;
        }

        if parent_start.is_some() {
            // another parent event inside the span means the trace is not
            // well-nested; abandon this span
            let is_parent = Kind::try_from(kind)
                .map(|k| k.component() == parent)
                .unwrap_or(false);
            if is_parent {
                parent_start = None;
                children.clear();
                continue;
            }
            children.push(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: Kind, unixnano: i64) -> TraceEvent {
        TraceEvent { event: kind as i32, unixnano }
    }

    #[test]
    fn component_ranges() {
        assert_eq!(Kind::ClientTransmitRequest.component(), Component::Client);
        assert_eq!(Kind::BrokerQueueTask.component(), Component::Broker);
        assert_eq!(Kind::ProviderReceivedTask.component(), Component::Provider);
        assert_eq!(Kind::Unknown.component(), Component::Unknown);
    }

    #[test]
    fn record_appends_only_with_trace() {
        let mut info = Metadata::default();
        record(&mut info, Kind::BrokerQueueTask);
        assert!(info.trace.is_none());

        info.trace = Some(Trace::default());
        record(&mut info, Kind::BrokerQueueTask);
        assert_eq!(info.trace.as_ref().unwrap().events.len(), 1);
    }

    #[test]
    fn centering_preserves_child_deltas() {
        // client span 0..100, child events on a skewed clock at 1000/1020
        let mut trace = Trace {
            events: vec![
                event(Kind::ClientTransmitRequest, 0),
                event(Kind::BrokerReceivedClientRequest, 1000),
                event(Kind::BrokerQueueTask, 1020),
                event(Kind::ClientReceivedResponse, 100),
            ],
        };
        trace.clock_skew_correction();
        // child duration 20, parent 100, latency (100-20)/2 = 40
        assert_eq!(trace.events[1].unixnano, 40);
        assert_eq!(trace.events[2].unixnano, 60);
    }

    #[test]
    fn negative_latency_leaves_trace_untouched() {
        let mut trace = Trace {
            events: vec![
                event(Kind::ClientTransmitRequest, 0),
                event(Kind::BrokerReceivedClientRequest, 500),
                event(Kind::BrokerQueueTask, 900),
                event(Kind::ClientReceivedResponse, 100),
            ],
        };
        let before = trace.clone();
        trace.clock_skew_correction();
        assert_eq!(trace, before);
    }
}
