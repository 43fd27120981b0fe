//! Metrics definitions for the failover router.
//!
//! Each definition is tagged with `role`, so one name covers both upstreams.

use shared::metrics::MetricDef;

pub const RESPONSE_RECEIVED: MetricDef = MetricDef {
    name: "upstream.response.received",
    tag_keys: &["role"],
    description: "Upstream outcomes received before the deadline. \
                  role=secondary is response_received_webpa_count, \
                  role=primary is response_received_xmidt_count.",
};

pub const RESPONSE_USED: MetricDef = MetricDef {
    name: "upstream.response.used",
    tag_keys: &["role"],
    description: "Outcomes selected as the final response. \
                  role=secondary is response_used_webpa_count, \
                  role=primary is response_used_xmidt_count.",
};

pub const ALL_METRICS: &[MetricDef] = &[RESPONSE_RECEIVED, RESPONSE_USED];
