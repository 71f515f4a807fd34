//! Query-result builders for the wire and table types reported in
//! notifications.

use cubenet_units::Time;
use cubenet_wire::{ControlPacket, DataPacket};

use crate::neighbour::Neighbour;
use crate::notification::QueryResult;

pub fn control_packet_query(packet: &ControlPacket) -> QueryResult {
    let mut qr = QueryResult::with_id("Packet", packet.name());
    qr.insert("physicalAddress", packet.header().mac.to_string());
    qr.insert("primaryAddress", packet.header().primary.to_string());
    match packet {
        ControlPacket::Pap { proposed, reconnect, .. } => {
            match proposed {
                Some(p) => {
                    let mut proposal = QueryResult::new("AddressProposal");
                    proposal.insert("proposedAddress", p.address.to_string());
                    proposal.insert("mask", p.mask.unwrap_or(0).to_string());
                    qr.insert_multi(proposal);
                }
                None => qr.insert("addressExhausted", "true"),
            }
            if !reconnect.is_empty() {
                let mut list = QueryResult::new("reconnectionAddresses");
                for r in reconnect {
                    let mut entry = QueryResult::new("reconnectionAddress");
                    entry.insert("proposedAddress", r.address.to_string());
                    entry.insert("mask", r.mask.unwrap_or(0).to_string());
                    list.insert_multi(entry);
                }
                qr.insert_multi(list);
            }
        }
        ControlPacket::San { accepted, .. } => {
            qr.insert("isAccepted", if *accepted { "true" } else { "false" });
        }
        ControlPacket::Disc { has_child, .. } => {
            qr.insert("hasChild", if *has_child { "true" } else { "false" });
        }
        _ => {}
    }
    qr
}

pub fn data_packet_query(packet: &DataPacket) -> QueryResult {
    let mut qr = QueryResult::with_id("Packet", "DataPacket");
    qr.insert("source", packet.src.to_string());
    qr.insert("destination", packet.dst.to_string());
    qr.insert("totalLength", packet.total_length().to_string());
    qr.insert("TTL", packet.ttl.to_string());
    if packet.rendez_vous() {
        qr.insert("rendezVous", "true");
    }
    if packet.returned() {
        qr.insert("returned", "true");
    }
    if packet.unloop() {
        qr.insert("unloop", "true");
    }
    qr
}

pub fn neighbour_query(neighbour: &Neighbour, resolved_id: &str) -> QueryResult {
    let mut qr = QueryResult::with_id("neighbour", resolved_id);
    qr.insert("primaryAddress", neighbour.primary.to_string());
    qr.insert("physicalAddress", neighbour.mac.to_string());
    qr.insert("type", neighbour.role.name());
    qr.insert("lastSeen", neighbour.last_seen.format_in(Time::SEC));
    qr
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubenet_addr::{HypercubeMaskAddress, MacAddress};
    use cubenet_wire::{AdditionalAddress, ControlHeader, TRANSPORT_UDP};

    #[test]
    fn pap_query_reports_proposal() {
        let packet = ControlPacket::Pap {
            header: ControlHeader {
                mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
                primary: HypercubeMaskAddress::new("10000000".parse().unwrap(), 1),
            },
            proposed: Some(AdditionalAddress::proposal("11000000".parse().unwrap(), 2, 0)),
            reconnect: vec![],
        };
        let qr = control_packet_query(&packet);
        assert_eq!(qr.id(), Some("PAP"));
        let rendered = crate::notification::XmlFormatter::default().format(&qr);
        assert!(rendered.contains("<proposedAddress>11000000</proposedAddress>"));
        assert!(rendered.contains("<mask>2</mask>"));
    }

    #[test]
    fn exhausted_pap_query_reports_flag() {
        let packet = ControlPacket::Pap {
            header: ControlHeader::default(),
            proposed: None,
            reconnect: vec![],
        };
        let rendered =
            crate::notification::XmlFormatter::default().format(&control_packet_query(&packet));
        assert!(rendered.contains("<addressExhausted>true</addressExhausted>"));
    }

    #[test]
    fn data_packet_query_includes_flags() {
        let mut packet = DataPacket::new(
            "10000000".parse().unwrap(),
            "01000000".parse().unwrap(),
            TRANSPORT_UDP,
            vec![],
        );
        packet.set_returned(true);
        let rendered =
            crate::notification::XmlFormatter::default().format(&data_packet_query(&packet));
        assert!(rendered.contains("<returned>true</returned>"));
        assert!(!rendered.contains("rendezVous"));
    }
}
