use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use sensorcast_core::{AssetId, ChangeEvent, Frame};
use sensorcast_telemetry::MetricsRecorder;

use crate::connection::Connection;
use crate::metrics::{EVENTS_DISPATCHED, FRAMES_DELIVERED};
use crate::registry::ClientRegistry;

/// Outcome of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections whose subscription matched.
    pub matched: usize,
    /// Frames accepted by a sink.
    pub delivered: usize,
    /// Connections removed because their write failed.
    pub evicted: usize,
}

impl AddAssign for DispatchReport {
    fn add_assign(&mut self, rhs: Self) {
        self.matched += rhs.matched;
        self.delivered += rhs.delivered;
        self.evicted += rhs.evicted;
    }
}

/// Matches change events against subscriptions and writes frames to the
/// matching connections.
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    metrics: Arc<MetricsRecorder>,
    aggregate_by_asset: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>, aggregate_by_asset: bool) -> Self {
        let metrics = Arc::clone(registry.metrics());
        Self {
            registry,
            metrics,
            aggregate_by_asset,
        }
    }

    pub fn aggregates_by_asset(&self) -> bool {
        self.aggregate_by_asset
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Fan one event out to every matching active connection.
    pub fn on_event(&self, event: &ChangeEvent) -> DispatchReport {
        let frame = match Frame::sensor(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(sensor_id = %event.sensor_id, error = %e, "failed to encode sensor frame");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        self.registry.for_each_active(|conn| {
            if !conn.subscription().matches(&event.sensor_id) {
                return;
            }
            report.matched += 1;
            self.deliver(conn, frame.clone(), &mut report);
        });

        trace!(
            sensor_id = %event.sensor_id,
            matched = report.matched,
            delivered = report.delivered,
            "event dispatched"
        );
        self.record(1, &report);
        report
    }

    /// Aggregated fan-out: each connection gets one frame holding the
    /// subset of `events` its subscription matches.
    pub fn on_asset_event(&self, asset_id: &AssetId, events: &[ChangeEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        if events.is_empty() {
            return report;
        }

        let all: Vec<&ChangeEvent> = events.iter().collect();
        // Match-all subscribers share one serialized frame.
        let mut full_frame: Option<Frame> = None;

        self.registry.for_each_active(|conn| {
            let subscription = conn.subscription();
            let visible: Vec<&ChangeEvent> = if subscription.is_all() {
                all.clone()
            } else {
                all.iter()
                    .copied()
                    .filter(|e| subscription.matches(&e.sensor_id))
                    .collect()
            };
            if visible.is_empty() {
                return;
            }
            report.matched += 1;

            let frame = if visible.len() == all.len() {
                if let Some(frame) = &full_frame {
                    Ok(frame.clone())
                } else {
                    let encoded = Frame::asset(asset_id, &all);
                    if let Ok(frame) = &encoded {
                        full_frame = Some(frame.clone());
                    }
                    encoded
                }
            } else {
                Frame::asset(asset_id, &visible)
            };

            match frame {
                Ok(frame) => self.deliver(conn, frame, &mut report),
                Err(e) => warn!(asset_id = %asset_id, error = %e, "failed to encode asset frame"),
            }
        });

        debug!(
            asset_id = %asset_id,
            sensors = events.len(),
            matched = report.matched,
            "asset update dispatched"
        );
        self.record(events.len(), &report);
        report
    }

    /// Dispatch one detection cycle's worth of events.
    pub fn dispatch_cycle(&self, events: Vec<ChangeEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !self.aggregate_by_asset {
            for event in &events {
                report += self.on_event(event);
            }
            return report;
        }

        let mut by_asset: BTreeMap<AssetId, Vec<ChangeEvent>> = BTreeMap::new();
        for event in events {
            match event.asset_id.clone() {
                Some(asset_id) => by_asset.entry(asset_id).or_default().push(event),
                None => report += self.on_event(&event),
            }
        }
        for (asset_id, group) in &by_asset {
            report += self.on_asset_event(asset_id, group);
        }
        report
    }

    fn deliver(&self, conn: &Arc<Connection>, frame: Frame, report: &mut DispatchReport) {
        match conn.send(frame) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(conn_id = %conn.id(), error = %e, "write failed, removing connection");
                if self.registry.remove(conn.id(), e.into()) {
                    report.evicted += 1;
                }
            }
        }
    }

    fn record(&self, events: usize, report: &DispatchReport) {
        self.metrics.counter_inc(EVENTS_DISPATCHED, &[], events as u64);
        if report.delivered > 0 {
            self.metrics
                .counter_inc(FRAMES_DELIVERED, &[], report.delivered as u64);
        }
    }
}
