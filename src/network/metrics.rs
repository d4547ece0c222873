use prometheus::{CounterVec, Gauge};

use protocol::ApiKeys;

/// Request metrics, registered once in the default prometheus registry
/// and shared by every connection whose config enables them.
pub struct Metrics {
    requests: CounterVec,
    in_flight: Gauge,
}

lazy_static! {
    static ref SHARED: Option<Metrics> = Metrics::new()
        .map_err(|err| warn!("fail to register metrics, {}", err))
        .ok();
}

impl Metrics {
    fn new() -> ::std::result::Result<Metrics, ::prometheus::Error> {
        Ok(Metrics {
               requests: register_counter_vec!("kafka_wire_requests_total",
                                               "Requests sent, labelled by API.",
                                               &["api"])?,
               in_flight: register_gauge!("kafka_wire_in_flight_requests",
                                          "Requests handed to a socket and awaiting a response.")?,
           })
    }

    pub fn shared() -> Option<&'static Metrics> {
        SHARED.as_ref()
    }

    pub fn request(&self, api_key: ApiKeys) {
        self.requests
            .with_label_values(&[&format!("{:?}", api_key)])
            .inc();
    }

    pub fn in_flight_inc(&self) {
        self.in_flight.inc();
    }

    pub fn in_flight_dec(&self) {
        self.in_flight.dec();
    }
}
