//! Typed projection of answer sections
//!
//! A response may carry records of other types next to the ones asked for
//! (CNAME chains, stray glue). [`RecordKind`] ties a query type to the Rust
//! value it yields, and [`project`] keeps only the matching records.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use trust_dns_resolver::proto::rr::{RData, Record, RecordType};

/// Query type paired with the value extracted from each matching record
pub trait RecordKind {
    type Output;

    const RECORD_TYPE: RecordType;

    fn extract(rdata: &RData) -> Option<Self::Output>;
}

/// Keep answers of kind `K`, in wire order, skipping everything else
pub fn project<K: RecordKind>(answers: &[Record]) -> Vec<K::Output> {
    answers
        .iter()
        .filter(|record| record.record_type() == K::RECORD_TYPE)
        .filter_map(|record| record.data())
        .filter_map(K::extract)
        .collect()
}

/// Mail exchanger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mx {
    pub host: String,
    pub pref: u16,
}

/// DANE TLSA association (RFC 6698)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tlsa {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub cert_data: Vec<u8>,
}

pub struct PtrKind;
pub struct AKind;
pub struct AaaaKind;
pub struct MxKind;
pub struct TxtKind;
pub struct TlsaKind;

impl RecordKind for PtrKind {
    type Output = String;
    const RECORD_TYPE: RecordType = RecordType::PTR;

    fn extract(rdata: &RData) -> Option<String> {
        match rdata {
            RData::PTR(ptr) => Some(ptr.0.to_string()),
            _ => None,
        }
    }
}

impl RecordKind for AKind {
    type Output = Ipv4Addr;
    const RECORD_TYPE: RecordType = RecordType::A;

    fn extract(rdata: &RData) -> Option<Ipv4Addr> {
        match rdata {
            RData::A(a) => Some(a.0),
            _ => None,
        }
    }
}

impl RecordKind for AaaaKind {
    type Output = Ipv6Addr;
    const RECORD_TYPE: RecordType = RecordType::AAAA;

    fn extract(rdata: &RData) -> Option<Ipv6Addr> {
        match rdata {
            RData::AAAA(aaaa) => Some(aaaa.0),
            _ => None,
        }
    }
}

impl RecordKind for MxKind {
    type Output = Mx;
    const RECORD_TYPE: RecordType = RecordType::MX;

    fn extract(rdata: &RData) -> Option<Mx> {
        match rdata {
            RData::MX(mx) => Some(Mx {
                host: mx.exchange().to_string(),
                pref: mx.preference(),
            }),
            _ => None,
        }
    }
}

impl RecordKind for TxtKind {
    type Output = String;
    const RECORD_TYPE: RecordType = RecordType::TXT;

    // Character-strings of one record are concatenated (RFC 7208 3.3, RFC 6376 3.6.2.2)
    fn extract(rdata: &RData) -> Option<String> {
        match rdata {
            RData::TXT(txt) => Some(
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl RecordKind for TlsaKind {
    type Output = Tlsa;
    const RECORD_TYPE: RecordType = RecordType::TLSA;

    fn extract(rdata: &RData) -> Option<Tlsa> {
        match rdata {
            RData::TLSA(tlsa) => Some(Tlsa {
                usage: u8::from(tlsa.cert_usage()),
                selector: u8::from(tlsa.selector()),
                matching_type: u8::from(tlsa.matching()),
                cert_data: tlsa.cert_data().to_vec(),
            }),
            _ => None,
        }
    }
}
