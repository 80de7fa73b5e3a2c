use std::collections::BTreeMap;

use kairos_backend::{DeviceId, Error, QueueFamily, QueueKinds, QueueSelection, QueueTraits, Result, SurfaceId};
use kairos_shared::log::{info, log_enabled, Level};

/// A logical queue of a surface that needs a device queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub surface: SurfaceId,
    pub logical_queue: usize,
    pub traits: QueueTraits,
}

/// Assignment of the logical queues of all surfaces of one device to device queues
#[derive(Debug, Clone, Default)]
pub struct QueuePlan {
    /// The distinct queues that are used according to the plan
    pub queues: Vec<QueueSelection>,
    /// Mapping from surface and logical queue to the index into `queues`
    pub mapping: BTreeMap<(SurfaceId, usize), usize>,
    /// The requests in the order in which they were planned
    order: Vec<(SurfaceId, usize)>,
}

impl QueuePlan {
    /// Creates a new `QueuePlan` for the queue families of a device.
    ///
    /// The requests are planned in the given order so that earlier requests get the unshared queues.
    pub fn new(device: DeviceId, queue_families: &[QueueFamily], requests: impl IntoIterator<Item = QueueRequest>) -> Result<Self> {
        let requests = requests.into_iter().collect::<Vec<_>>();

        // Print a table that summarizes which family supports which request
        if log_enabled!(Level::Info) && !requests.is_empty() {
            let mut message = String::new();
            message.push_str(&format!("| {:<16} | {:<8} | {:<20} | {:<40} | {:<9} |\n", "Surface", "Queue", "Family", "Flags", "Supported"));
            for request in &requests {
                for (family_index, family) in queue_families.iter().enumerate() {
                    let line = format!(
                        "| {:<16} | {:<8} | {:<20} | {:<40} | {:<9} |\n",
                        request.surface.to_string(),
                        request.logical_queue,
                        family_index,
                        format!("{:?}", family.kinds),
                        request.traits.is_supported_by(family)
                    );
                    message.push_str(&line);
                }
            }
            info!("Queue support of {device}:\n{message}");
        }

        plan_queues(device, queue_families, &requests)
    }

    pub fn selection(&self, surface: SurfaceId, logical_queue: usize) -> Option<QueueSelection> {
        self.mapping
            .get(&(surface, logical_queue))
            .and_then(|index| self.queues.get(*index))
            .copied()
    }

    /// Returns the queues that are used by more than one surface together with their users in planning order.
    ///
    /// A surface is listed once per queue even when several of its logical queues map to it.
    pub fn shared_queues(&self) -> BTreeMap<QueueSelection, Vec<(SurfaceId, usize)>> {
        let mut users = BTreeMap::<QueueSelection, Vec<(SurfaceId, usize)>>::new();
        for (surface, logical_queue) in &self.order {
            if let Some(selection) = self.selection(*surface, *logical_queue) {
                let entry = users.entry(selection).or_default();
                if !entry.iter().any(|(user, _)| user == surface) {
                    entry.push((*surface, *logical_queue));
                }
            }
        }
        users.retain(|_, users| users.len() > 1);
        users
    }
}

fn plan_queues(device: DeviceId, queue_families: &[QueueFamily], requests: &[QueueRequest]) -> Result<QueuePlan> {
    // Keeps track of which queue is assigned to which logical queue
    let mut assigned = BTreeMap::<(SurfaceId, usize), QueueSelection>::new();
    for request in requests {
        let selection = find_unshared_queue(device, queue_families, &request.traits, &assigned)
            .or_else(|| find_least_stressed_queue(device, queue_families, &request.traits, &assigned))
            .or_else(|| find_any_queue(device, queue_families, &request.traits))
            .ok_or(Error::NoSuitableQueue {
                device,
                surface: request.surface,
                kinds: request.traits.kinds,
            })?;
        assigned.insert((request.surface, request.logical_queue), selection);
    }

    // Collapse the queues so that a `QueueSelection` is only emitted once
    let mut queues = Vec::new();
    let mut mapping = BTreeMap::new();
    for (key, selection) in &assigned {
        if let Some(index) = queues.iter().position(|queue| queue == selection) {
            mapping.insert(*key, index);
        } else {
            mapping.insert(*key, queues.len());
            queues.push(*selection);
        }
    }

    Ok(QueuePlan {
        queues,
        mapping,
        order: requests.iter().map(|request| (request.surface, request.logical_queue)).collect(),
    })
}

/// Find a queue that satisfies the traits without considering whether it is already assigned
fn find_any_queue(device: DeviceId, queue_families: &[QueueFamily], traits: &QueueTraits) -> Option<QueueSelection> {
    queue_families
        .iter()
        .enumerate()
        .find(|(_, family)| family.queue_count > 0 && traits.is_supported_by(family))
        .map(|(family_index, _)| QueueSelection::new(device, family_index as u32, 0))
}

/// Find a queue that is not already assigned and belongs to the least capable family that satisfies the traits
fn find_unshared_queue(
    device: DeviceId,
    queue_families: &[QueueFamily],
    traits: &QueueTraits,
    assigned: &BTreeMap<(SurfaceId, usize), QueueSelection>,
) -> Option<QueueSelection> {
    for (family_index, family) in sort_by_capability_count(queue_families) {
        if traits.is_supported_by(family) {
            if let Some(queue_index) = find_next_free_queue_index(assigned, family_index, family) {
                return Some(QueueSelection::new(device, family_index, queue_index));
            }
        }
    }
    None
}

/// Find the queue that is assigned the least number of times
fn find_least_stressed_queue(
    device: DeviceId,
    queue_families: &[QueueFamily],
    traits: &QueueTraits,
    assigned: &BTreeMap<(SurfaceId, usize), QueueSelection>,
) -> Option<QueueSelection> {
    let mut candidates = queue_families
        .iter()
        .enumerate()
        // We are only interested in the queue families that satisfy the traits
        .filter(|(_, family)| traits.is_supported_by(family))
        // Create a QueueSelection for every queue in the queue families
        .flat_map(|(family_index, family)| {
            (0..family.queue_count).map(move |queue_index| QueueSelection::new(device, family_index as u32, queue_index))
        })
        .collect::<Vec<_>>();

    // Sort the queues by the number of logical queues that are assigned to them
    candidates.sort_by_key(|candidate| assigned.values().filter(|selection| *selection == candidate).count());
    candidates.first().copied()
}

/// Find the queue index that is not already assigned in the queue family
fn find_next_free_queue_index(
    assigned: &BTreeMap<(SurfaceId, usize), QueueSelection>,
    family_index: u32,
    family: &QueueFamily,
) -> Option<u32> {
    let max_queue_index = assigned
        .values()
        .filter(|selection| selection.family_index == family_index)
        .map(|selection| selection.queue_index)
        .max();
    let next_queue_index = max_queue_index.map(|index| index + 1).unwrap_or(0);
    (next_queue_index < family.queue_count).then_some(next_queue_index)
}

/// Returns the number of capabilities that are supported by the queue family
fn capability_count(kinds: QueueKinds) -> u32 {
    kinds.bits().count_ones()
}

/// Sort the queue families by the number of capabilities that they support
fn sort_by_capability_count(queue_families: &[QueueFamily]) -> Vec<(u32, &QueueFamily)> {
    let mut queue_families = queue_families
        .iter()
        .enumerate()
        .map(|(index, family)| (index as u32, family))
        .collect::<Vec<_>>();
    queue_families.sort_by_key(|(_, family)| capability_count(family.kinds));
    queue_families
}
