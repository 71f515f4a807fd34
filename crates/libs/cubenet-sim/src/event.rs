use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use cubenet_units::Time;
use cubenet_wire::Frame;

use crate::message::{Message, Subscriber};
use crate::network::NodeId;

/// Which component a timeout fires on. Cancellation lives with the target:
/// each target keeps the set of timeout ids it still cares about, and a
/// fired id it no longer knows is a no-op. Cancelled events therefore stay
/// in the queue instead of being dug out of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTarget {
    MainSm(NodeId),
    PapSm(NodeId),
    HblSm(NodeId),
    RoutingTable(NodeId),
    RvServer(NodeId),
    RvClient(NodeId),
}

impl TimeoutTarget {
    pub fn node(&self) -> NodeId {
        match *self {
            TimeoutTarget::MainSm(id)
            | TimeoutTarget::PapSm(id)
            | TimeoutTarget::HblSm(id)
            | TimeoutTarget::RoutingTable(id)
            | TimeoutTarget::RvServer(id)
            | TimeoutTarget::RvClient(id) => id,
        }
    }
}

/// The effect of a scheduled event.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A frame leaves a physical layer onto the wire. The destination and
    /// link delay are captured when the frame is committed, so frames
    /// already on the wire survive the link being torn down.
    SendBits { dest: NodeId, delay: Time, frame: Frame },
    /// A frame arrives at a node's physical layer.
    ReceiveBits { node: NodeId, frame: Frame },
    /// A timeout fires on a component.
    Timeout { target: TimeoutTarget, id: u64 },
    /// An intra-node message is delivered to one subscriber.
    ReceiveMessage { node: NodeId, subscriber: Subscriber, message: Rc<Message> },
    /// A scenario command runs against the network.
    RunCommand { command: String },
}

/// A scheduled event. Ordering is `(fire_at, seq)` ascending; the sequence
/// number is assigned once at creation and survives periodic rescheduling,
/// which keeps co-scheduled events in insertion order.
#[derive(Debug)]
pub struct QueuedEvent {
    pub fire_at: Time,
    pub period: Time,
    pub seq: u64,
    pub kind: EventKind,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap max is the earliest event.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The scheduler's priority queue with its monotone sequence counter.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a fresh event, assigning the next sequence number.
    pub fn push(&mut self, fire_at: Time, period: Time, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEvent { fire_at, period, seq, kind });
    }

    /// Re-enqueue a periodic event keeping its original sequence number.
    pub fn reschedule(&mut self, event: QueuedEvent) {
        self.heap.push(event);
    }

    pub fn next_fire_at(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.fire_at)
    }

    pub fn pop(&mut self) -> Option<QueuedEvent> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str) -> EventKind {
        EventKind::RunCommand { command: name.to_string() }
    }

    fn pop_name(queue: &mut EventQueue) -> String {
        match queue.pop().map(|e| e.kind) {
            Some(EventKind::RunCommand { command }) => command,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn earliest_event_first() {
        let mut q = EventQueue::new();
        q.push(Time::from_millis(20), Time::ZERO, command("late"));
        q.push(Time::from_millis(10), Time::ZERO, command("early"));
        assert_eq!(q.next_fire_at(), Some(Time::from_millis(10)));
        assert_eq!(pop_name(&mut q), "early");
        assert_eq!(pop_name(&mut q), "late");
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut q = EventQueue::new();
        for name in ["first", "second", "third"] {
            q.push(Time::from_millis(5), Time::ZERO, command(name));
        }
        assert_eq!(pop_name(&mut q), "first");
        assert_eq!(pop_name(&mut q), "second");
        assert_eq!(pop_name(&mut q), "third");
    }

    #[test]
    fn rescheduled_event_keeps_its_sequence() {
        let mut q = EventQueue::new();
        q.push(Time::from_millis(1), Time::from_millis(10), command("periodic"));
        let mut ev = q.pop().expect("event");
        ev.fire_at += ev.period;
        q.reschedule(ev);
        // A newer event at the same time loses the tie to the older seq.
        q.push(Time::from_millis(11), Time::ZERO, command("newer"));
        assert_eq!(pop_name(&mut q), "periodic");
        assert_eq!(pop_name(&mut q), "newer");
    }
}
