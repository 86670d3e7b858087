//! Store keys and the record ↔ [`StoredValue`] mapping.
//!
//! Records are stored as JSON. The store-level version always mirrors
//! `record.version`, so conditional writes never have to parse a payload;
//! a value where the two disagree is treated as corrupt.

use gambit_protocol::{
    Codec, JoinTicket, JsonCodec, RECORD_SCHEMA_VERSION, SessionId,
    SessionRecord, TicketId,
};
use gambit_store::StoredValue;

use crate::MatchError;

pub(crate) fn session_key(id: &SessionId) -> String {
    format!("session:{id}")
}

pub(crate) fn ticket_key(id: &TicketId) -> String {
    format!("ticket:{}", id.as_str())
}

pub(crate) fn encode_session(
    record: &SessionRecord,
) -> Result<StoredValue, MatchError> {
    let data = JsonCodec.encode(record).map_err(|e| {
        MatchError::corrupt(Some(&record.session_id), e.to_string())
    })?;
    Ok(StoredValue::new(record.version, data))
}

pub(crate) fn decode_session(
    id: &SessionId,
    value: StoredValue,
) -> Result<SessionRecord, MatchError> {
    let record: SessionRecord = JsonCodec
        .decode(&value.data)
        .map_err(|e| MatchError::corrupt(Some(id), e.to_string()))?;

    if record.schema > RECORD_SCHEMA_VERSION {
        return Err(MatchError::corrupt(
            Some(id),
            format!("unsupported record schema {}", record.schema),
        ));
    }
    if record.version != value.version {
        return Err(MatchError::corrupt(
            Some(id),
            format!(
                "stored version {} disagrees with record version {}",
                value.version, record.version
            ),
        ));
    }
    if record.session_id != *id {
        return Err(MatchError::corrupt(
            Some(id),
            format!("record belongs to session {}", record.session_id),
        ));
    }
    Ok(record)
}

/// Tickets are never updated in place, so they are always stored at
/// version 0.
pub(crate) fn encode_ticket(
    ticket: &JoinTicket,
) -> Result<StoredValue, MatchError> {
    let data = JsonCodec.encode(ticket).map_err(|e| {
        MatchError::corrupt(Some(&ticket.session_id), e.to_string())
    })?;
    Ok(StoredValue::new(0, data))
}

pub(crate) fn decode_ticket(
    value: StoredValue,
) -> Result<JoinTicket, MatchError> {
    let ticket: JoinTicket = JsonCodec
        .decode(&value.data)
        .map_err(|e| MatchError::corrupt(None, e.to_string()))?;
    if ticket.schema > RECORD_SCHEMA_VERSION {
        return Err(MatchError::corrupt(
            Some(&ticket.session_id),
            format!("unsupported ticket schema {}", ticket.schema),
        ));
    }
    Ok(ticket)
}
