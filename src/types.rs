/// Integer type used for global DOF indices, entity ids and the words of the packed buffer
pub type DofIdType = u64;

/// Integer type used for processor (rank) ids
pub type ProcessorIdType = u16;

/// Sentinel marking an unassigned id or DOF index
pub const INVALID_ID: DofIdType = DofIdType::MAX;

/// Sentinel marking an unset processor id
pub const INVALID_PROCESSOR_ID: ProcessorIdType = ProcessorIdType::MAX;

/// Map a sentinel-encoded id onto an `Option`
pub(crate) fn id_from_raw(raw: DofIdType) -> Option<DofIdType> {
    if raw == INVALID_ID {
        None
    } else {
        Some(raw)
    }
}

/// Map an optional id back onto its sentinel encoding
pub(crate) fn id_to_raw(id: Option<DofIdType>) -> DofIdType {
    id.unwrap_or(INVALID_ID)
}
