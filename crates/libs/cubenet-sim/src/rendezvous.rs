//! The rendez-vous directory: a distributed identity -> address map. Each
//! identity has a home node (the owner of the sub-cube its hash falls in);
//! registration, lookup and table handoff all travel as rendez-vous
//! flagged data packets.

use std::collections::{BTreeMap, HashMap};

use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress, UniversalAddress};
use cubenet_units::Time;
use cubenet_wire::{DataPacket, RendezVousPacket, RvTableEntry, MAX_TTL};

use crate::apps::{RV_CLIENT_PORT, RV_SERVER_PORT};
use crate::event::TimeoutTarget;
use crate::message::Message;
use crate::node::Node;
use crate::notification::QueryResult;
use crate::simulator::Simulator;
use crate::SimError;

/// Per-node rendez-vous server state.
#[derive(Debug, Default)]
pub struct RvServer {
    /// The directory slice this node owns: identity -> primary address.
    pub lookup: BTreeMap<String, HypercubeAddress>,
    /// Tables shipped on space delegation, purged only when acknowledged.
    pending_sent: Vec<(u16, Vec<RvTableEntry>)>,
    next_table_id: u16,
    parent: HypercubeMaskAddress,
    will_disconnect: bool,
}

/// Per-node rendez-vous client state: a lookup cache plus the queue of
/// sends waiting for a resolution.
#[derive(Debug, Default)]
pub struct RvClient {
    cache: HashMap<String, CacheEntry>,
    wait_queue: Vec<(String, QueuedSend)>,
    timeouts: HashMap<u64, String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    address: HypercubeAddress,
    used: bool,
}

#[derive(Debug, Clone)]
struct QueuedSend {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
    enqueued_at: Time,
}

impl RvClient {
    pub fn cached(&self, identity: &str) -> Option<&HypercubeAddress> {
        self.cache.get(identity).map(|e| &e.address)
    }

    pub fn queued(&self, identity: &str) -> usize {
        self.wait_queue.iter().filter(|(id, _)| id == identity).count()
    }
}

impl Node {
    /// Where an identity's directory entry lives on the current plane.
    fn rv_home(&self, identity: &UniversalAddress) -> HypercubeAddress {
        identity.hash_to_hypercube(self.primary_address().bit_len())
    }

    pub(crate) fn rv_server_receive(
        &mut self,
        sim: &mut Simulator,
        from: HypercubeAddress,
        payload: &[u8],
        packet: &DataPacket,
    ) -> Result<(), SimError> {
        match RendezVousPacket::decode(payload)? {
            RendezVousPacket::Register { address, identity } => {
                self.rv_server.lookup.insert(identity.to_string(), address.clone());

                let mut qr = QueryResult::new("client");
                qr.insert("universalAddress", identity.to_string());
                qr.insert("primaryAddress", address.to_string());
                qr.insert("distance", (i64::from(MAX_TTL) - i64::from(packet.ttl)).to_string());
                qr.insert(
                    "shortestPath",
                    sim.network.shortest_path(identity.as_str(), self.name.as_str(), false, Some(self)).to_string(),
                );
                qr.insert(
                    "shortestPathAllConnections",
                    sim.network.shortest_path(identity.as_str(), self.name.as_str(), true, Some(self)).to_string(),
                );
                sim.notify_node("node.rvserver.register", Some(qr), self.name.as_str())
            }
            RendezVousPacket::Deregister { address, identity } => {
                if self.rv_server.lookup.remove(identity.as_str()).is_none() {
                    return Err(SimError::protocol(format!(
                        "trying to deregister an identity that is not registered: {identity}"
                    )));
                }
                let mut qr = QueryResult::new("client");
                qr.insert("universalAddress", identity.to_string());
                qr.insert("primaryAddress", address.to_string());
                sim.notify_node("node.rvserver.unregister", Some(qr), self.name.as_str())
            }
            RendezVousPacket::AddressSolve { identity } => {
                let found = self.rv_server.lookup.get(identity.as_str()).cloned();
                let reply = RendezVousPacket::AddressLookup {
                    address: found.clone().unwrap_or_default(),
                    identity,
                    solved: found.is_some(),
                };
                self.transport_send(sim, from, RV_SERVER_PORT, RV_CLIENT_PORT, reply.encode())
            }
            RendezVousPacket::LookupTable { id, entries } => {
                for entry in entries {
                    self.rv_server.lookup.insert(entry.identity.to_string(), entry.address);
                }
                let ack = RendezVousPacket::LookupTableReceived { id };
                self.transport_send(sim, from, RV_SERVER_PORT, RV_SERVER_PORT, ack.encode())
            }
            RendezVousPacket::LookupTableReceived { id } => {
                if let Some(pos) = self.rv_server.pending_sent.iter().position(|(tid, _)| *tid == id) {
                    let (_, entries) = self.rv_server.pending_sent.remove(pos);
                    // The handoff completed; the entries now live on the
                    // other side.
                    for entry in &entries {
                        self.rv_server.lookup.remove(entry.identity.as_str());
                    }
                }
                if self.rv_server.will_disconnect {
                    sim.put_message(self.id, Message::ReadyForDisc { port: RV_SERVER_PORT });
                }
                Ok(())
            }
            RendezVousPacket::AddressLookup { .. } => Ok(()),
        }
    }

    pub(crate) fn rv_server_on_message(
        &mut self,
        sim: &mut Simulator,
        msg: &Message,
    ) -> Result<(), SimError> {
        match msg {
            Message::Connected { primary, parent } => {
                self.rv_server.parent = parent.clone();
                let home = self.name.hash_to_hypercube(primary.bit_len());
                let register = RendezVousPacket::Register {
                    address: primary.address().clone(),
                    identity: self.name.clone(),
                };
                self.transport_send(sim, home, RV_SERVER_PORT, RV_SERVER_PORT, register.encode())
            }
            Message::WillDisconnect => {
                self.rv_server.will_disconnect = true;
                sim.put_message(self.id, Message::WaitMe { port: RV_SERVER_PORT });

                // Ship the whole slice to the parent, each entry re-homed
                // for the plane without this node.
                let entries: Vec<RvTableEntry> = self
                    .rv_server
                    .lookup
                    .iter()
                    .map(|(identity, _)| RvTableEntry {
                        address: self.rv_home(&UniversalAddress::new(identity.clone())),
                        identity: UniversalAddress::new(identity.clone()),
                    })
                    .collect();
                let id = self.rv_server.next_table_id;
                self.rv_server.next_table_id = self.rv_server.next_table_id.wrapping_add(1);
                let table = RendezVousPacket::LookupTable { id, entries };
                let parent = self.rv_server.parent.address().clone();
                self.transport_send(sim, parent, RV_SERVER_PORT, RV_SERVER_PORT, table.encode())?;

                let home = self.rv_home(&self.name);
                let deregister = RendezVousPacket::Deregister {
                    address: self.primary_address().address().clone(),
                    identity: self.name.clone(),
                };
                self.transport_send(sim, home, RV_SERVER_PORT, RV_SERVER_PORT, deregister.encode())?;

                // Disconnect regardless if the acknowledgement never comes.
                let delay = sim.params.rendez_vous_lookup_table_received_timeout;
                sim.schedule_timeout(TimeoutTarget::RvServer(self.id), delay);
                Ok(())
            }
            Message::AddressGiven { given, recipient } => {
                let entries: Vec<RvTableEntry> = self
                    .rv_server
                    .lookup
                    .iter()
                    .filter(|(identity, _)| {
                        let home = self.rv_home(&UniversalAddress::new((*identity).clone()));
                        home.bit_len() == given.bit_len() && given.covers(&home)
                    })
                    .map(|(identity, address)| RvTableEntry {
                        address: address.clone(),
                        identity: UniversalAddress::new(identity.clone()),
                    })
                    .collect();

                if entries.is_empty() {
                    return Ok(());
                }
                let id = self.rv_server.next_table_id;
                self.rv_server.next_table_id = self.rv_server.next_table_id.wrapping_add(1);
                let table = RendezVousPacket::LookupTable { id, entries: entries.clone() };
                self.transport_send(sim, recipient.clone(), RV_SERVER_PORT, RV_SERVER_PORT, table.encode())?;
                self.rv_server.pending_sent.push((id, entries));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The table acknowledgement never arrived; disconnect anyway.
    pub(crate) fn rv_server_on_timeout(&mut self, sim: &mut Simulator) {
        sim.put_message(self.id, Message::ReadyForDisc { port: RV_SERVER_PORT });
    }

    /// Re-register this node's own identity, mainly for scenario scripts.
    pub(crate) fn rv_server_send_register(&mut self, sim: &mut Simulator) -> Result<(), SimError> {
        let home = self.rv_home(&self.name);
        let register = RendezVousPacket::Register {
            address: self.primary_address().address().clone(),
            identity: self.name.clone(),
        };
        self.transport_send(sim, home, RV_SERVER_PORT, RV_SERVER_PORT, register.encode())
    }

    pub(crate) fn rv_server_query(&self, size_only: bool) -> QueryResult {
        let mut qr = QueryResult::new("RendezVousServer");
        if size_only {
            qr.insert("size", self.rv_server.lookup.len().to_string());
            qr.insert("nodeMask", self.primary_address().mask().to_string());
        } else {
            for (identity, address) in &self.rv_server.lookup {
                let mut entry = QueryResult::new("Entry");
                entry.insert("node", identity.clone());
                entry.insert("address", address.to_string());
                qr.insert_multi(entry);
            }
        }
        qr
    }

    /// Send application data to an identity, resolving its address first
    /// if needed; unresolved sends wait in the queue.
    pub(crate) fn rv_client_send(
        &mut self,
        sim: &mut Simulator,
        dest: &UniversalAddress,
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    ) -> Result<(), SimError> {
        if let Some(entry) = self.rv_client.cache.get_mut(dest.as_str()) {
            entry.used = true;
            let address = entry.address.clone();
            return self.transport_send(sim, address, src_port, dst_port, payload);
        }

        self.rv_client.wait_queue.push((
            dest.to_string(),
            QueuedSend { src_port, dst_port, payload, enqueued_at: sim.now() },
        ));

        let home = self.rv_home(dest);
        let solve = RendezVousPacket::AddressSolve { identity: dest.clone() };
        self.transport_send(sim, home, RV_CLIENT_PORT, RV_SERVER_PORT, solve.encode())
    }

    pub(crate) fn rv_client_receive(
        &mut self,
        sim: &mut Simulator,
        payload: &[u8],
    ) -> Result<(), SimError> {
        let RendezVousPacket::AddressLookup { address, identity, solved } =
            RendezVousPacket::decode(payload)?
        else {
            return Ok(());
        };
        if !solved {
            return Ok(());
        }

        self.rv_client_add_entry(sim, identity.to_string(), address.clone());

        // Flush everything that was waiting for this identity.
        let mut drained = Vec::new();
        let mut remaining = Vec::new();
        for (id, send) in std::mem::take(&mut self.rv_client.wait_queue) {
            if id == identity.as_str() {
                drained.push(send);
            } else {
                remaining.push((id, send));
            }
        }
        self.rv_client.wait_queue = remaining;

        let mut min_time = sim.now();
        for send in &drained {
            if send.enqueued_at < min_time {
                min_time = send.enqueued_at;
            }
        }
        for send in drained {
            self.transport_send(sim, address.clone(), send.src_port, send.dst_port, send.payload)?;
        }

        let elapsed = sim.now() - min_time;
        let qr = QueryResult::with_id("elapsedTime", elapsed.format_in(Time::SEC));
        sim.notify_node("node.rvclient.solved", Some(qr), self.name.as_str())
    }

    fn rv_client_add_entry(&mut self, sim: &mut Simulator, identity: String, address: HypercubeAddress) {
        self.rv_client.cache.insert(identity.clone(), CacheEntry { address, used: false });
        let delay = sim.params.rendez_vous_client_cache_cleaning_period;
        let id = sim.schedule_timeout(TimeoutTarget::RvClient(self.id), delay);
        self.rv_client.timeouts.insert(id, identity);
    }

    /// Cache-cleaning tick for one entry: re-arm when it was used since,
    /// drop it otherwise.
    pub(crate) fn rv_client_on_timeout(&mut self, sim: &mut Simulator, id: u64) {
        let Some(identity) = self.rv_client.timeouts.remove(&id) else {
            return;
        };
        let Some(entry) = self.rv_client.cache.get(&identity) else {
            return;
        };
        if entry.used {
            let address = entry.address.clone();
            self.rv_client_add_entry(sim, identity, address);
        } else {
            self.rv_client.cache.remove(&identity);
        }
    }

}
