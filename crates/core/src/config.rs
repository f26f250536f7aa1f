/// How aggregation packets (PayloadHdr type 48, RFC 7798 §4.4.2) are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationMode {
    /// Fail with [`DepayError::UnsupportedPacketMode`](crate::DepayError::UnsupportedPacketMode).
    #[default]
    Reject,
    /// Unpack every aggregation unit into its own start-code-delimited NAL
    /// unit. DONL/DOND fields are assumed absent (`sprop-max-don-diff` = 0).
    Depacketize,
}

/// Depacketizer behavior knobs.
#[derive(Debug, Clone)]
pub struct DepacketizerConfig {
    pub aggregation_packets: AggregationMode,
    /// Drop FU continuation fragments that arrive with no start fragment in
    /// progress (stream joined mid-NAL, or a seek). When `false` they are
    /// appended as if continuing a NAL unit.
    pub drop_orphan_fragments: bool,
}

impl Default for DepacketizerConfig {
    fn default() -> Self {
        Self {
            aggregation_packets: AggregationMode::Reject,
            drop_orphan_fragments: true,
        }
    }
}
