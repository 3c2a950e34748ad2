use std::collections::VecDeque;

use watcher_protocol::Observation;

/// FIFO of observations awaiting transmission.
///
/// New observations beyond `capacity` evict the oldest queued one. Batches
/// that failed to send go back to the front in their original order and are
/// exempt from the cap.
#[derive(Debug)]
pub struct ObservationQueue {
	items: VecDeque<Observation>,
	capacity: usize,
}

impl ObservationQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			items: VecDeque::new(),
			capacity: capacity.max(1),
		}
	}

	/// Appends `observation`, returning whether an older one was evicted.
	pub fn push(&mut self, observation: Observation) -> bool {
		let evicted = if self.items.len() >= self.capacity {
			self.items.pop_front();
			true
		} else {
			false
		};
		self.items.push_back(observation);
		evicted
	}

	/// Removes up to `max` observations from the front.
	pub fn take_batch(&mut self, max: usize) -> Vec<Observation> {
		let n = max.min(self.items.len());
		self.items.drain(..n).collect()
	}

	/// Puts a failed batch back ahead of everything queued since.
	pub fn requeue_front(&mut self, observations: Vec<Observation>) {
		for observation in observations.into_iter().rev() {
			self.items.push_front(observation);
		}
	}

	pub fn contains_stream(&self, stream_id: &str) -> bool {
		self.items.iter().any(|o| o.stream_id == stream_id)
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

/// Batches written to the Brain that have not been acknowledged yet, in
/// send order.
#[derive(Debug, Default)]
pub struct InFlightBatches {
	batches: Vec<(String, Vec<Observation>)>,
}

impl InFlightBatches {
	pub fn insert(&mut self, batch_id: String, observations: Vec<Observation>) {
		self.batches.push((batch_id, observations));
	}

	/// Forgets `batch_id`, handing back its observations if it was pending.
	pub fn remove(&mut self, batch_id: &str) -> Option<Vec<Observation>> {
		let index = self.batches.iter().position(|(id, _)| id == batch_id)?;
		Some(self.batches.remove(index).1)
	}

	/// Every pending observation, oldest batch first.
	pub fn take_all(&mut self) -> Vec<Observation> {
		self.batches.drain(..).flat_map(|(_, observations)| observations).collect()
	}

	pub fn contains_stream(&self, stream_id: &str) -> bool {
		self.batches
			.iter()
			.any(|(_, observations)| observations.iter().any(|o| o.stream_id == stream_id))
	}

	pub fn observations(&self) -> usize {
		self.batches.iter().map(|(_, observations)| observations.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.batches.is_empty()
	}
}
