use std::collections::HashSet;

use crate::ids::SensorId;

/// Sensors a connection wants to hear about. The empty set means
/// "every sensor". Fixed for the lifetime of the connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscription {
    sensors: HashSet<SensorId>,
}

impl Subscription {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sensor(id: SensorId) -> Self {
        Self {
            sensors: HashSet::from([id]),
        }
    }

    pub fn sensors(ids: impl IntoIterator<Item = SensorId>) -> Self {
        Self {
            sensors: ids.into_iter().collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn matches(&self, sensor: &SensorId) -> bool {
        self.sensors.is_empty() || self.sensors.contains(sensor)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorId> {
        self.sensors.iter()
    }
}
