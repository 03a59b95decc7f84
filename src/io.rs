//! Per-writer lossy links feeding a single shared, single-consumer queue.
//!
//! Every neighbor of a device gets its own [`WriteEnd`] so that each link can
//! carry a different reliability, but all writers for a given device share
//! one [`BoundedQueue`] - there is exactly one [`ReadEnd`] per device.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;

use crate::clock::ClockView;
use crate::message::{DeviceId, Message};
use crate::queue::BoundedQueue;

type Shared<T> = Rc<RefCell<BoundedQueue<T>>>;

/// A single item delivered to a device: who it came from, and the message.
pub type Delivery = (DeviceId, Message);

/// Result of attempting to hand a message to a [`WriteEnd`].
pub enum WriteOutcome {
    /// The write-reliability roll failed; the message never reaches the queue.
    Lost,
    /// The message was enqueued, possibly evicting the oldest queued entry.
    Delivered { evicted: Option<Delivery> },
}

/// The write side of one directed link into a device's input queue.
///
/// Each write independently rolls against [`write_reliability`] to decide
/// whether the message is actually delivered, modelling a lossy link.
pub struct WriteEnd {
    queue: Shared<Delivery>,
    writer_id: DeviceId,
    write_reliability: f64,
}

impl WriteEnd {
    fn new(queue: Shared<Delivery>, writer_id: DeviceId, write_reliability: f64) -> Self {
        Self {
            queue,
            writer_id,
            write_reliability,
        }
    }

    pub fn write<R: Rng + ?Sized>(&self, msg: Message, rng: &mut R) -> WriteOutcome {
        let delivered = rng.gen_bool(self.write_reliability.clamp(0.0, 1.0));
        if !delivered {
            return WriteOutcome::Lost;
        }
        let evicted = self
            .queue
            .borrow_mut()
            .push((self.writer_id, msg))
            .map(|(_, item)| item);
        WriteOutcome::Delivered { evicted }
    }
}

/// The single consumer side of a device's input queue. Cloning shares the
/// same underlying queue - used to hand the canonical queue to its owning
/// device while still letting the builder derive writers from it.
#[derive(Clone)]
pub struct ReadEnd {
    queue: Shared<Delivery>,
}

impl ReadEnd {
    pub fn new(clock: ClockView, capacity: Option<usize>) -> Self {
        Self {
            queue: Rc::new(RefCell::new(BoundedQueue::new(clock, capacity))),
        }
    }

    /// Creates a new writer feeding this queue.
    pub fn writer_for(&self, writer_id: DeviceId, write_reliability: f64) -> WriteEnd {
        WriteEnd::new(self.queue.clone(), writer_id, write_reliability)
    }

    pub fn try_read(&self) -> Option<Delivery> {
        self.queue.borrow_mut().pop()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn max_used(&self) -> usize {
        self.queue.borrow().max_used()
    }
}
