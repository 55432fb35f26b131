//! Service Discovery Protocol PDUs and data elements.
//!
//! Only the client half of `ServiceSearchAttributeRequest` is implemented:
//! build a request for one service class UUID, follow continuation states,
//! then decode the attribute lists into [`ServiceRecord`]s.
//!
//! PDU layout:
//! ```text
//! [pdu_id: 1] [transaction_id: 2 BE] [parameter_length: 2 BE] [parameters...]
//! ```

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::{Error, Result};

/// L2CAP PSM the SDP server listens on.
pub const SDP_PSM: u16 = 0x0001;

const PDU_ERROR_RESPONSE: u8 = 0x01;
const PDU_SERVICE_SEARCH_ATTR_REQ: u8 = 0x06;
const PDU_SERVICE_SEARCH_ATTR_RSP: u8 = 0x07;
const PDU_HEADER_LEN: usize = 5;

/// Upper bound we ask the server to respect per response.
pub const MAX_ATTRIBUTE_BYTES: u16 = 0xFFFF;

pub const ATTR_PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
pub const ATTR_SERVICE_NAME: u16 = 0x0100;

const L2CAP_UUID16: u16 = 0x0100;
const RFCOMM_UUID16: u16 = 0x0003;
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Deepest sequence/alternative nesting accepted from a server.
pub const MAX_NESTING: usize = 16;

/// Expand a 16- or 32-bit UUID onto the Bluetooth base UUID.
pub fn short_uuid(value: u32) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((value as u128) << 96))
}

/// A decoded SDP data element.
#[derive(Debug, Clone, PartialEq)]
pub enum DataElement {
    Nil,
    Uint(u128),
    Int(i128),
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(String),
}

impl DataElement {
    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[DataElement]> {
        match self {
            Self::Sequence(items) | Self::Alternative(items) => Some(items),
            _ => None,
        }
    }
}

/// Decode one data element, returning it and the number of bytes consumed.
pub fn decode_element(data: &[u8]) -> Result<(DataElement, usize)> {
    decode_nested(data, 0)
}

fn decode_nested(data: &[u8], depth: usize) -> Result<(DataElement, usize)> {
    if depth > MAX_NESTING {
        return Err(Error::Sdp("data element nesting too deep".into()));
    }
    let header = *data
        .first()
        .ok_or_else(|| Error::Sdp("empty data element".into()))?;
    let kind = header >> 3;
    let size_index = header & 0x07;

    let (len, header_len) = match size_index {
        0..=4 if kind == 0 => (0, 1),
        0..=4 => (1usize << size_index, 1),
        5 => (*data.get(1).ok_or_else(|| truncated(2, data.len()))? as usize, 2),
        6 => {
            let b = data.get(1..3).ok_or_else(|| truncated(3, data.len()))?;
            (u16::from_be_bytes([b[0], b[1]]) as usize, 3)
        }
        _ => {
            let b = data.get(1..5).ok_or_else(|| truncated(5, data.len()))?;
            (u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize, 5)
        }
    };

    let end = header_len + len;
    let body = data
        .get(header_len..end)
        .ok_or_else(|| truncated(end, data.len()))?;

    let element = match kind {
        0 => DataElement::Nil,
        1 => DataElement::Uint(be_uint(body)?),
        2 => {
            let raw = be_uint(body)?;
            let bits = body.len() * 8;
            let value = if bits < 128 && raw & (1u128 << (bits - 1)) != 0 {
                (raw | (!0u128 << bits)) as i128
            } else {
                raw as i128
            };
            DataElement::Int(value)
        }
        3 => DataElement::Uuid(match body.len() {
            2 => short_uuid(u16::from_be_bytes([body[0], body[1]]) as u32),
            4 => short_uuid(u32::from_be_bytes([body[0], body[1], body[2], body[3]])),
            16 => Uuid::from_slice(body).map_err(|e| Error::Sdp(e.to_string()))?,
            n => return Err(Error::Sdp(format!("invalid UUID size {n}"))),
        }),
        4 => DataElement::Text(text(body)),
        5 => DataElement::Bool(body.first().is_some_and(|&b| b != 0)),
        6 => DataElement::Sequence(decode_all(body, depth + 1)?),
        7 => DataElement::Alternative(decode_all(body, depth + 1)?),
        8 => DataElement::Url(text(body)),
        other => return Err(Error::Sdp(format!("unknown data element type {other}"))),
    };

    Ok((element, end))
}

fn decode_all(mut data: &[u8], depth: usize) -> Result<Vec<DataElement>> {
    let mut items = Vec::new();
    while !data.is_empty() {
        let (element, used) = decode_nested(data, depth)?;
        items.push(element);
        data = &data[used..];
    }
    Ok(items)
}

fn be_uint(body: &[u8]) -> Result<u128> {
    if body.is_empty() || body.len() > 16 {
        return Err(Error::Sdp(format!("invalid integer size {}", body.len())));
    }
    Ok(body.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
}

fn text(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .trim_end_matches('\0')
        .to_string()
}

fn truncated(needed: usize, have: usize) -> Error {
    Error::Sdp(format!("data element truncated: need {needed} bytes, have {have}"))
}

/// Build a `ServiceSearchAttributeRequest` for every attribute of the
/// records matching `uuid`.
pub fn search_attribute_request(transaction_id: u16, uuid: Uuid, continuation: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(32 + continuation.len());

    // ServiceSearchPattern: sequence { uuid128 }
    params.extend_from_slice(&[0x35, 17, 0x1C]);
    params.extend_from_slice(uuid.as_bytes());

    params.extend_from_slice(&MAX_ATTRIBUTE_BYTES.to_be_bytes());

    // AttributeIDList: sequence { uint32 range 0x0000..=0xFFFF }
    params.extend_from_slice(&[0x35, 5, 0x0A, 0x00, 0x00, 0xFF, 0xFF]);

    params.push(continuation.len() as u8);
    params.extend_from_slice(continuation);

    let mut pdu = Vec::with_capacity(PDU_HEADER_LEN + params.len());
    pdu.push(PDU_SERVICE_SEARCH_ATTR_REQ);
    pdu.extend_from_slice(&transaction_id.to_be_bytes());
    pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    pdu.extend_from_slice(&params);
    pdu
}

/// One (possibly partial) `ServiceSearchAttributeResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeResponse {
    pub transaction_id: u16,
    /// Fragment of the attribute lists byte stream.
    pub attribute_lists: Vec<u8>,
    /// Empty when this is the last fragment.
    pub continuation: Vec<u8>,
}

pub fn parse_attribute_response(data: &[u8]) -> Result<AttributeResponse> {
    if data.len() < PDU_HEADER_LEN {
        return Err(Error::Sdp(format!("PDU too short: {} bytes", data.len())));
    }
    let pdu_id = data[0];
    let transaction_id = u16::from_be_bytes([data[1], data[2]]);
    let param_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    let params = data
        .get(PDU_HEADER_LEN..PDU_HEADER_LEN + param_len)
        .ok_or_else(|| Error::Sdp(format!("PDU parameters truncated ({param_len} declared)")))?;

    match pdu_id {
        PDU_SERVICE_SEARCH_ATTR_RSP => {}
        PDU_ERROR_RESPONSE => {
            let code = params
                .get(..2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .unwrap_or(0);
            return Err(Error::Sdp(format!("server returned error 0x{code:04X}")));
        }
        other => return Err(Error::Sdp(format!("unexpected PDU 0x{other:02X}"))),
    }

    let byte_count = params
        .get(..2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| Error::Sdp("missing attribute byte count".into()))?;
    let lists_end = 2 + byte_count;
    let attribute_lists = params
        .get(2..lists_end)
        .ok_or_else(|| Error::Sdp("attribute lists truncated".into()))?
        .to_vec();

    let cont_len = *params
        .get(lists_end)
        .ok_or_else(|| Error::Sdp("missing continuation state".into()))? as usize;
    let continuation = params
        .get(lists_end + 1..lists_end + 1 + cont_len)
        .ok_or_else(|| Error::Sdp("continuation state truncated".into()))?
        .to_vec();

    Ok(AttributeResponse {
        transaction_id,
        attribute_lists,
        continuation,
    })
}

/// Transport protocol a service record is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rfcomm,
    L2cap,
    Unknown,
}

/// A service record: attribute ID -> value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRecord {
    pub attributes: BTreeMap<u16, DataElement>,
}

impl ServiceRecord {
    pub fn name(&self) -> Option<&str> {
        match self.attributes.get(&ATTR_SERVICE_NAME) {
            Some(DataElement::Text(name)) => Some(name),
            _ => None,
        }
    }

    /// Topmost transport in the protocol stack and its port: the RFCOMM
    /// channel if RFCOMM is present, else the L2CAP PSM.
    pub fn endpoint(&self) -> (Protocol, Option<u16>) {
        let Some(mut stacks) = self
            .attributes
            .get(&ATTR_PROTOCOL_DESCRIPTOR_LIST)
            .and_then(DataElement::as_sequence)
        else {
            return (Protocol::Unknown, None);
        };

        // An alternative of stacks: use the first one.
        if let Some(first) = stacks.first() {
            if matches!(first, DataElement::Sequence(inner) if inner.first().and_then(DataElement::as_sequence).is_some())
            {
                stacks = first.as_sequence().unwrap_or(&[]);
            }
        }

        let mut result = (Protocol::Unknown, None);
        for layer in stacks {
            let Some(items) = layer.as_sequence() else {
                continue;
            };
            let Some(uuid) = items.first().and_then(DataElement::as_uuid) else {
                continue;
            };
            let port = items
                .get(1)
                .and_then(DataElement::as_uint)
                .and_then(|p| u16::try_from(p).ok());

            if uuid == short_uuid(RFCOMM_UUID16 as u32) {
                return (Protocol::Rfcomm, port);
            }
            if uuid == short_uuid(L2CAP_UUID16 as u32) {
                result = (Protocol::L2cap, port);
            }
        }
        result
    }
}

/// Decode the concatenated attribute lists of a complete response.
pub fn parse_records(attribute_lists: &[u8]) -> Result<Vec<ServiceRecord>> {
    if attribute_lists.is_empty() {
        return Ok(Vec::new());
    }

    let (outer, _) = decode_element(attribute_lists)?;
    let DataElement::Sequence(lists) = outer else {
        return Err(Error::Sdp("attribute lists are not a sequence".into()));
    };

    let mut records = Vec::with_capacity(lists.len());
    for list in lists {
        let DataElement::Sequence(items) = list else {
            return Err(Error::Sdp("attribute list is not a sequence".into()));
        };
        if items.len() % 2 != 0 {
            return Err(Error::Sdp("attribute list has a dangling ID".into()));
        }

        let mut record = ServiceRecord::default();
        for pair in items.chunks(2) {
            let id = pair[0]
                .as_uint()
                .and_then(|id| u16::try_from(id).ok())
                .ok_or_else(|| Error::Sdp(format!("invalid attribute ID {:?}", pair[0])))?;
            record.attributes.insert(id, pair[1].clone());
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(items: &[&[u8]]) -> Vec<u8> {
        let body: Vec<u8> = items.concat();
        let mut out = vec![0x35, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    fn attr_id(id: u16) -> Vec<u8> {
        let mut out = vec![0x09];
        out.extend_from_slice(&id.to_be_bytes());
        out
    }

    fn rfcomm_record(channel: u8, name: &str) -> Vec<u8> {
        let l2cap = seq(&[&[0x19, 0x01, 0x00]]);
        let rfcomm = seq(&[&[0x19, 0x00, 0x03], &[0x08, channel]]);
        let pdl = seq(&[&l2cap, &rfcomm]);
        let mut text = vec![0x25, name.len() as u8];
        text.extend_from_slice(name.as_bytes());
        seq(&[
            &attr_id(ATTR_PROTOCOL_DESCRIPTOR_LIST),
            &pdl,
            &attr_id(ATTR_SERVICE_NAME),
            &text,
        ])
    }

    fn response(tid: u16, lists: &[u8], continuation: &[u8]) -> Vec<u8> {
        let mut params = (lists.len() as u16).to_be_bytes().to_vec();
        params.extend_from_slice(lists);
        params.push(continuation.len() as u8);
        params.extend_from_slice(continuation);

        let mut pdu = vec![PDU_SERVICE_SEARCH_ATTR_RSP];
        pdu.extend_from_slice(&tid.to_be_bytes());
        pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
        pdu.extend_from_slice(&params);
        pdu
    }

    #[test]
    fn test_short_uuid() {
        assert_eq!(
            short_uuid(0x111E).to_string(),
            "0000111e-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_request_layout() {
        let uuid = crate::protocol::commands::SONY_CONTROL_UUID;
        let pdu = search_attribute_request(0x0102, uuid, &[]);
        assert_eq!(pdu[0], 0x06);
        assert_eq!(&pdu[1..3], &[0x01, 0x02]);
        let param_len = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
        assert_eq!(param_len, pdu.len() - 5);
        assert_eq!(&pdu[5..8], &[0x35, 17, 0x1C]);
        assert_eq!(&pdu[8..24], uuid.as_bytes());
        assert_eq!(&pdu[24..26], &[0xFF, 0xFF]);
        assert_eq!(*pdu.last().unwrap(), 0); // no continuation
    }

    #[test]
    fn test_request_carries_continuation() {
        let pdu = search_attribute_request(1, Uuid::nil(), &[0xAA, 0xBB]);
        assert_eq!(&pdu[pdu.len() - 3..], &[2, 0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode_element(&[0x00]).unwrap(), (DataElement::Nil, 1));
        assert_eq!(
            decode_element(&[0x09, 0x12, 0x34]).unwrap(),
            (DataElement::Uint(0x1234), 3)
        );
        assert_eq!(
            decode_element(&[0x10, 0xFF]).unwrap(),
            (DataElement::Int(-1), 2)
        );
        assert_eq!(
            decode_element(&[0x28, 0x01]).unwrap(),
            (DataElement::Bool(true), 2)
        );
        assert_eq!(
            decode_element(&[0x25, 0x03, b'a', b'b', 0]).unwrap(),
            (DataElement::Text("ab".into()), 5)
        );
    }

    #[test]
    fn test_decode_truncated() {
        assert!(decode_element(&[0x35, 0x05, 0x08]).is_err());
        assert!(decode_element(&[]).is_err());
    }

    /// `0x36 <u16 len>` sequence headers wrapped `levels` deep around a nil.
    fn nested(levels: usize) -> Vec<u8> {
        let mut out = vec![0x00];
        for _ in 0..levels {
            let mut outer = vec![0x36];
            outer.extend_from_slice(&(out.len() as u16).to_be_bytes());
            outer.extend_from_slice(&out);
            out = outer;
        }
        out
    }

    #[test]
    fn test_nesting_limit() {
        assert!(decode_element(&nested(MAX_NESTING)).is_ok());

        let err = decode_element(&nested(MAX_NESTING + 1)).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"));
    }

    #[test]
    fn test_deeply_nested_response_is_rejected() {
        // Nested headers only, as a hostile server could send in 32 KB.
        let mut lists = Vec::new();
        for i in 0..10_000usize {
            let remaining = (10_000 - i - 1) * 3;
            lists.push(0x36);
            lists.extend_from_slice(&(remaining as u16).to_be_bytes());
        }
        assert!(parse_records(&lists).is_err());
    }

    #[test]
    fn test_parse_rfcomm_record() {
        let lists = seq(&[&rfcomm_record(9, "Sony")]);
        let resp = parse_attribute_response(&response(7, &lists, &[])).unwrap();
        assert_eq!(resp.transaction_id, 7);
        assert!(resp.continuation.is_empty());

        let records = parse_records(&resp.attribute_lists).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), Some("Sony"));
        assert_eq!(records[0].endpoint(), (Protocol::Rfcomm, Some(9)));
    }

    #[test]
    fn test_l2cap_only_record() {
        let l2cap = seq(&[&[0x19, 0x01, 0x00], &[0x09, 0x00, 0x17]]);
        let pdl = seq(&[&l2cap]);
        let record = seq(&[&attr_id(ATTR_PROTOCOL_DESCRIPTOR_LIST), &pdl]);
        let records = parse_records(&seq(&[&record])).unwrap();
        assert_eq!(records[0].endpoint(), (Protocol::L2cap, Some(0x17)));
        assert_eq!(records[0].name(), None);
    }

    #[test]
    fn test_continuation_fragments_reassemble() {
        let lists = seq(&[&rfcomm_record(3, "HF"), &rfcomm_record(4, "HF2")]);
        let (a, b) = lists.split_at(10);

        let first = parse_attribute_response(&response(1, a, &[0x01, 0x02])).unwrap();
        assert_eq!(first.continuation, vec![0x01, 0x02]);
        let second = parse_attribute_response(&response(2, b, &[])).unwrap();

        let mut all = first.attribute_lists;
        all.extend_from_slice(&second.attribute_lists);
        let records = parse_records(&all).unwrap();
        let ports: Vec<_> = records.iter().map(|r| r.endpoint().1).collect();
        assert_eq!(ports, vec![Some(3), Some(4)]);
    }

    #[test]
    fn test_empty_result() {
        let resp = parse_attribute_response(&response(1, &seq(&[]), &[])).unwrap();
        assert!(parse_records(&resp.attribute_lists).unwrap().is_empty());
    }

    #[test]
    fn test_error_response() {
        let pdu = [0x01, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03];
        let err = parse_attribute_response(&pdu).unwrap_err();
        assert!(err.to_string().contains("0x0003"));
    }
}
