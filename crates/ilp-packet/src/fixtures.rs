//! Deterministic packet fixtures shared by the unit tests in this crate.

use std::time::SystemTime;

use bytes::BytesMut;
use chrono::{TimeZone, Utc};

use crate::{Address, ErrorCode, Fulfill, FulfillBuilder, Prepare, PrepareBuilder, Reject, RejectBuilder};

pub static EXECUTION_CONDITION: &[u8; 32] = &[
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12,
    0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
];

pub static FULFILLMENT: &[u8; 32] = &[
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x2b, 0x2c, 0x2d, 0x2e, 0x2f, 0x30, 0x31, 0x32,
    0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
];

pub static DATA: &[u8] = b"example data";

pub fn expires_at() -> SystemTime {
    SystemTime::from(Utc.ymd(2018, 1, 1).and_hms_milli(0, 0, 0, 0))
}

pub fn prepare_builder() -> PrepareBuilder<'static> {
    PrepareBuilder {
        amount: 9377,
        expires_at: expires_at(),
        execution_condition: EXECUTION_CONDITION,
        destination: Address::new(b"example.destination"),
        data: DATA,
    }
}

pub fn prepare() -> Prepare {
    prepare_builder().build()
}

pub fn prepare_bytes() -> BytesMut {
    BytesMut::from(prepare())
}

pub fn fulfill_builder() -> FulfillBuilder<'static> {
    FulfillBuilder {
        fulfillment: FULFILLMENT,
        data: DATA,
    }
}

pub fn fulfill() -> Fulfill {
    fulfill_builder().build()
}

pub fn fulfill_bytes() -> BytesMut {
    BytesMut::from(fulfill())
}

/// Leaks a fresh `Address` so callers can build a `RejectBuilder<'static>`
/// without threading a borrow through every test.
fn triggered_by() -> &'static Address {
    Box::leak(Box::new(Address::new(b"example.connector")))
}

pub fn reject_builder() -> RejectBuilder<'static> {
    RejectBuilder {
        code: ErrorCode::F99_APPLICATION_ERROR,
        message: b"oops",
        triggered_by: Some(triggered_by()),
        data: DATA,
    }
}

pub fn reject() -> Reject {
    reject_builder().build()
}

pub fn reject_bytes() -> BytesMut {
    BytesMut::from(reject())
}
