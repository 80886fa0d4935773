use std::time::Duration;

use super::config::Config;

/// Runtime knobs of one [`Service`](crate::service::Service).
///
/// Fields:
/// - `name`: Shown in logs and returned by `ServiceHandle::name`.
/// - `update_interval`: Length of one processing cycle.
/// - `max_events_per_cycle`: Engine events delivered per cycle at most, so
///   update hooks keep running under load.
/// - `event_queue_capacity`: Bound of the engine-to-service queue; engines
///   wait when it is full.
/// - `max_sessions`: Reserved plus live sessions the registry allows.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub name: String,
    pub update_interval: Duration,
    pub max_events_per_cycle: usize,
    pub event_queue_capacity: usize,
    pub max_sessions: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: String::from("netfacade"),
            update_interval: Duration::from_millis(50),
            max_events_per_cycle: 1024,
            event_queue_capacity: 1024,
            max_sessions: 1024,
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            name: config.name.clone(),
            update_interval: config.update_interval(),
            max_events_per_cycle: config.max_events_per_cycle,
            event_queue_capacity: config.event_queue_capacity,
            max_sessions: config.max_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_defaults() {
        assert_eq!(ServiceSettings::from(&Config::default()), ServiceSettings::default());
    }
}
