// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use hickory_server::authority::{Catalog, ZoneType};
use hickory_server::proto::rr::{rdata, LowerName, Name, RData, Record, RecordType, RrKey};
use hickory_server::server::ServerFuture;
use hickory_server::store::in_memory::InMemoryAuthority;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

pub const ZONE: &str = "example.com.";
pub const PROBE_NAME: &str = "probe.example.com.";

// Starts a nameserver which answers PROBE_NAME with 127.0.0.1.
//
// Unit tests inside the crate cannot reach this module, so DNS tests live
// under tests/ only.
pub async fn dns_server() -> SocketAddr {
    let zone = Name::from_utf8(ZONE).unwrap();
    let records = BTreeMap::from([
        (
            RrKey::new(LowerName::from_str(ZONE).unwrap(), RecordType::SOA),
            Record::from_rdata(
                zone.clone(),
                0,
                RData::SOA(rdata::SOA::new(zone.clone(), zone.clone(), 0, 0, 0, 0, 0)),
            )
            .into(),
        ),
        (
            RrKey::new(LowerName::from_str(PROBE_NAME).unwrap(), RecordType::A),
            Record::from_rdata(
                Name::from_utf8(PROBE_NAME).unwrap(),
                60,
                RData::A(rdata::A::from(Ipv4Addr::LOCALHOST)),
            )
            .into(),
        ),
    ]);
    let authority = InMemoryAuthority::new(zone, records, ZoneType::Primary, false).unwrap();
    let mut catalog = Catalog::new();
    catalog.upsert(
        LowerName::from_str(ZONE).unwrap(),
        Box::new(Arc::new(authority)),
    );

    let listener = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let mut server = ServerFuture::new(catalog);
    server.register_socket(listener);
    tokio::task::spawn(async move {
        server.block_until_done().await.unwrap();
    });
    address
}
