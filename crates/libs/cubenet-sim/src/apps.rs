//! The node applications riding on the UDP-like transport: trace-route
//! and the three-leg echo test application.

use cubenet_addr::UniversalAddress;
use cubenet_units::Time;
use cubenet_wire::{ByteReader, ByteWriter, DataPacket, MAX_TTL};

use crate::node::Node;
use crate::notification::QueryResult;
use crate::simulator::Simulator;
use crate::SimError;

/// Port of the trace-route application.
pub const TRACE_ROUTE_PORT: u16 = 9901;
/// Port of the rendez-vous server.
pub const RV_SERVER_PORT: u16 = 9902;
/// Port of the rendez-vous client.
pub const RV_CLIENT_PORT: u16 = 9903;
/// Port of the echo test application.
pub const TEST_APP_PORT: u16 = 9920;

impl Node {
    /// `traceRoute.trace(addr)`: route a marked packet and let the routing
    /// layer record every hop.
    pub(crate) fn trace_route_trace(
        &mut self,
        sim: &mut Simulator,
        dest: cubenet_addr::HypercubeAddress,
    ) -> Result<(), SimError> {
        let data = format!(
            "Trace Route at {} from {} to {}",
            sim.now().format_in(Time::SEC),
            self.primary_address(),
            dest
        );
        self.transport_send(sim, dest, TRACE_ROUTE_PORT, TRACE_ROUTE_PORT, data.into_bytes())
    }

    /// `traceRoute.assert(addr, expected)`: like `trace`, but the arrival
    /// side checks the recorded hop list against `expected`.
    pub(crate) fn trace_route_assert(
        &mut self,
        sim: &mut Simulator,
        dest: cubenet_addr::HypercubeAddress,
        expected: &str,
    ) -> Result<(), SimError> {
        let data = format!(
            "Assert Route at {} from {} to {}=({})",
            sim.now().format_in(Time::SEC),
            self.primary_address(),
            dest,
            expected
        );
        self.transport_send(sim, dest, TRACE_ROUTE_PORT, TRACE_ROUTE_PORT, data.into_bytes())
    }

    /// `traceRoute.traceUAddr(identity)`: trace towards an identity,
    /// resolving it through the rendez-vous layer first.
    pub(crate) fn trace_route_by_identity(
        &mut self,
        sim: &mut Simulator,
        dest: &UniversalAddress,
    ) -> Result<(), SimError> {
        let data = format!(
            "Trace Route at {} from {} to {}",
            sim.now().format_in(Time::SEC),
            self.name,
            dest
        );
        self.rv_client_send(sim, dest, TRACE_ROUTE_PORT, TRACE_ROUTE_PORT, data.into_bytes())
    }

    /// `testApplication.send(dest[, tag])`: start the three-leg echo. The
    /// payload carries eight strings: source, destination, tag, three
    /// timestamps and two hop distances, filled in leg by leg.
    pub(crate) fn test_app_send(
        &mut self,
        sim: &mut Simulator,
        dest: &str,
        tag: &str,
    ) -> Result<(), SimError> {
        let mut w = ByteWriter::new();
        w.string(self.name.as_str());
        w.string(dest);
        w.string(tag);
        w.string(&sim.now().value().to_string());
        w.string("");
        w.string("");
        w.string("");
        w.string("");
        self.rv_client_send(sim, &UniversalAddress::new(dest), TEST_APP_PORT, TEST_APP_PORT, w.into_bytes())
    }

    /// A test packet arrived: bounce it for the next leg, or report the
    /// full round-trip on the third.
    pub(crate) fn test_app_receive(
        &mut self,
        sim: &mut Simulator,
        payload: &[u8],
        packet: &DataPacket,
    ) -> Result<(), SimError> {
        let mut r = ByteReader::new(payload);
        let src = r.string()?;
        let dest = r.string()?;
        let tag = r.string()?;
        let t1 = r.string()?;
        let mut t2 = r.string()?;
        let mut t3 = r.string()?;
        let mut d1 = r.string()?;
        let mut d2 = r.string()?;

        let hop_distance = i64::from(MAX_TTL) - i64::from(packet.ttl);

        let next = if d1.is_empty() {
            d1 = hop_distance.to_string();
            t2 = sim.now().value().to_string();
            UniversalAddress::new(src.clone())
        } else if d2.is_empty() {
            d2 = hop_distance.to_string();
            t3 = sim.now().value().to_string();
            UniversalAddress::new(dest.clone())
        } else {
            let parse = |text: &str| {
                Time::parse(text, Time::NANOSEC).map_err(|e| SimError::protocol(e.to_string()))
            };
            let time1 = parse(&t1)?;
            let time2 = parse(&t2)?;
            let time3 = parse(&t3)?;

            let mut qr = QueryResult::new("Data");
            qr.insert("source", src.clone());
            qr.insert("destination", dest);
            qr.insert("tag", tag);
            qr.insert(
                "shortestPath",
                sim.network.shortest_path(&src, self.name.as_str(), false, Some(self)).to_string(),
            );
            qr.insert("distance1", d1);
            qr.insert("elapsedTime1", (time2 - time1).format_in(Time::SEC));
            qr.insert("distance2", d2);
            qr.insert("elapsedTime2", (time3 - time2).format_in(Time::SEC));
            qr.insert("distance3", hop_distance.to_string());
            qr.insert("elapsedTime3", (sim.now() - time3).format_in(Time::SEC));
            return sim.notify("node.testApplication.received", Some(qr));
        };

        let mut w = ByteWriter::new();
        w.string(&src);
        w.string(&dest);
        w.string(&tag);
        w.string(&t1);
        w.string(&t2);
        w.string(&t3);
        w.string(&d1);
        w.string(&d2);
        self.rv_client_send(sim, &next, TEST_APP_PORT, TEST_APP_PORT, w.into_bytes())
    }
}
