//! The simulator façade: the virtual clock, the event queue, the
//! notification stream, and the scenario command runner.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use cubenet_units::{Bandwidth, Time};

use crate::command::{Command, Function};
use crate::event::{EventKind, EventQueue, TimeoutTarget};
use crate::message::{subscribers, Message};
use crate::network::{ConnId, Network, NodeId};
use crate::node::Node;
use crate::notification::{Notificator, QueryResult, TypeFilter};
use crate::params::Params;
use crate::SimError;

/// The owner of everything: clock, scheduler, network and notification
/// stream. Effects receive it by mutable borrow; there is no global state.
#[derive(Debug)]
pub struct Simulator {
    now: Time,
    end_time: Time,
    queue: EventQueue,
    next_timeout_id: u64,
    pub params: Params,
    pub network: Network,
    filter: TypeFilter,
    notificator: Notificator,
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator {
            now: Time::ZERO,
            end_time: Time::ZERO,
            queue: EventQueue::new(),
            next_timeout_id: 1,
            params: Params::default(),
            network: Network::default(),
            filter: TypeFilter::default(),
            notificator: Notificator::default(),
        }
    }
}

/// Where a command step lands next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Network,
    Sim,
    NotifFilter,
    Formatter,
    Node(NodeId),
    Connection(ConnId),
    TraceRoute(NodeId),
    RvServer(NodeId),
    TestApp(NodeId),
    Routing(NodeId),
    RoutingTable(NodeId),
}

/// Result of running one command step.
enum Outcome {
    One(Target),
    Many(Vec<Target>),
    Query(QueryResult),
}

/// Result of a whole command chain.
enum ChainResult {
    Query(QueryResult),
    Unit,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Time {
        self.now
    }

    pub fn end_time(&self) -> Time {
        self.end_time
    }

    pub fn set_end_time(&mut self, end_time: Time) {
        self.end_time = end_time;
    }

    pub fn set_output_path(&mut self, path: PathBuf) {
        self.notificator.set_path(path);
    }

    pub fn set_output_writer(&mut self, writer: Box<dyn std::io::Write>) {
        self.notificator.set_writer(writer);
    }

    /// Close the notification document.
    pub fn finish(&mut self) -> Result<(), SimError> {
        self.notificator.close().map_err(SimError::from)
    }

    // ----- scheduling -----------------------------------------------------

    pub(crate) fn schedule_relative(&mut self, kind: EventKind, delay: Time) {
        self.queue.push(self.now + delay, Time::ZERO, kind);
    }

    pub(crate) fn schedule_absolute(&mut self, kind: EventKind, at: Time) {
        self.queue.push(at, Time::ZERO, kind);
    }

    /// Arm a timeout; the returned id is what the target must remember to
    /// keep the timeout alive.
    pub(crate) fn schedule_timeout(&mut self, target: TimeoutTarget, delay: Time) -> u64 {
        let id = self.next_timeout_id;
        self.next_timeout_id += 1;
        self.schedule_relative(EventKind::Timeout { target, id }, delay);
        id
    }

    /// Publish an intra-node message; each subscriber receives it through
    /// its own event at the current time.
    pub(crate) fn put_message(&mut self, node: NodeId, msg: Message) {
        let message = Rc::new(msg);
        for &subscriber in subscribers(message.kind()) {
            self.schedule_relative(
                EventKind::ReceiveMessage { node, subscriber, message: Rc::clone(&message) },
                Time::ZERO,
            );
        }
    }

    // ----- notifications --------------------------------------------------

    pub(crate) fn notify(&mut self, ntype: &str, body: Option<QueryResult>) -> Result<(), SimError> {
        self.notify_extra(ntype, body, None)
    }

    pub(crate) fn notify_node(
        &mut self,
        ntype: &str,
        body: Option<QueryResult>,
        node: &str,
    ) -> Result<(), SimError> {
        self.notify_extra(ntype, body, Some(("node", node.to_string())))
    }

    fn notify_extra(
        &mut self,
        ntype: &str,
        body: Option<QueryResult>,
        extra: Option<(&str, String)>,
    ) -> Result<(), SimError> {
        if !self.filter.is_accepted(ntype) {
            return Ok(());
        }
        let mut qr = QueryResult::new(ntype);
        qr.set_attr("time", self.now.format_in(Time::SEC));
        if let Some((key, value)) = extra {
            qr.insert(key, value);
        }
        if let Some(body) = body {
            qr.insert_multi(body);
        }
        self.notificator.write(&qr).map_err(SimError::from)
    }

    /// Error reports bypass the filter.
    fn write_error(&mut self, error: &SimError) -> Result<(), SimError> {
        let mut qr = QueryResult::new("Error");
        qr.set_attr("time", self.now.format_in(Time::SEC));
        qr.insert("ErrorMessage", error.to_string());
        self.notificator.write(&qr).map_err(SimError::from)
    }

    // ----- the event loop -------------------------------------------------

    /// Run a single event. Returns false when the queue is exhausted or
    /// the next event lies past the end time.
    pub fn simulate_step(&mut self) -> Result<bool, SimError> {
        let Some(fire_at) = self.queue.next_fire_at() else {
            return Ok(false);
        };
        if self.end_time > Time::ZERO && fire_at > self.end_time {
            return Ok(false);
        }
        let Some(mut event) = self.queue.pop() else {
            return Ok(false);
        };
        self.now = event.fire_at;
        let kind = event.kind.clone();
        if event.period > Time::ZERO {
            event.fire_at += event.period;
            self.queue.reschedule(event);
        }
        if let Err(error) = self.run_event(kind) {
            let _ = self.write_error(&error);
            return Err(error);
        }
        Ok(true)
    }

    /// Run events until the end time, then discard whatever is left.
    pub fn simulate(&mut self) -> Result<(), SimError> {
        let mut steps = 0u64;
        while self.simulate_step()? {
            steps += 1;
        }
        log::info!("simulation finished after {steps} events at {}", self.now);
        self.queue.clear();
        Ok(())
    }

    fn run_event(&mut self, kind: EventKind) -> Result<(), SimError> {
        match kind {
            EventKind::SendBits { dest, delay, frame } => {
                self.schedule_relative(EventKind::ReceiveBits { node: dest, frame }, delay);
                Ok(())
            }
            EventKind::ReceiveBits { node, frame } => {
                if self.network.node_ref(node).is_none() {
                    return Ok(());
                }
                self.with_node(node, |n, sim| n.receive_frame(sim, frame))
            }
            EventKind::Timeout { target, id } => {
                let node = target.node();
                if self.network.node_ref(node).is_none() {
                    return Ok(());
                }
                self.with_node(node, |n, sim| n.on_timeout(sim, target, id))
            }
            EventKind::ReceiveMessage { node, subscriber, message } => {
                if self.network.node_ref(node).is_none() {
                    return Ok(());
                }
                self.with_node(node, |n, sim| n.deliver_message(sim, subscriber, &message))
            }
            EventKind::RunCommand { command } => self.exec(&command),
        }
    }

    /// Take a node out of the arena, run against it, and put it back.
    /// While taken, the rest of the simulator stays borrowable.
    pub(crate) fn with_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut Node, &mut Simulator) -> Result<R, SimError>,
    ) -> Result<R, SimError> {
        let mut node = self
            .network
            .take_node(id)
            .ok_or_else(|| SimError::protocol("node is unavailable for the current event"))?;
        let result = f(&mut node, self);
        self.network.put_node(node);
        result
    }

    // ----- scenario loading -----------------------------------------------

    /// Load a scenario file: `#` starts a comment, a leading `[time]`
    /// schedules the rest of the line, a bare line runs immediately.
    /// Scheduled times raise the simulation end time.
    pub fn load_file(&mut self, path: &Path) -> Result<(), SimError> {
        let text = std::fs::read_to_string(path)?;
        self.load_str(&text)
    }

    pub fn load_str(&mut self, text: &str) -> Result<(), SimError> {
        for (index, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (time, rest) = if let Some(stripped) = line.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| {
                    SimError::scenario(format!("missing ']' in line {}", index + 1))
                })?;
                let time = Time::parse(stripped[..close].trim(), Time::SEC)
                    .map_err(|e| SimError::scenario(format!("line {}: {e}", index + 1)))?;
                (Some(time), stripped[close + 1..].trim())
            } else {
                (None, line)
            };

            if rest.is_empty() {
                continue;
            }

            match time {
                Some(time) => {
                    if time > self.end_time {
                        self.end_time = time;
                    }
                    self.schedule_absolute(EventKind::RunCommand { command: rest.to_string() }, time);
                }
                None => {
                    // Setup commands run now; a bad line is reported and
                    // the loader moves on.
                    if let Err(error) = self.exec(rest) {
                        match error {
                            SimError::Scenario(_) => {
                                let _ = self.write_error(&error);
                                log::error!("scenario line {}: {error}", index + 1);
                            }
                            other => return Err(other),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ----- command execution ----------------------------------------------

    /// Parse and run a command against the network, reporting a query
    /// result through the notification stream.
    pub fn exec(&mut self, command: &str) -> Result<(), SimError> {
        let parsed = Command::parse(command)?;
        match self.run_chain(Target::Network, parsed.functions())? {
            ChainResult::Query(qr) => {
                self.notify_extra("simulator.exec.query", Some(qr), Some(("command", command.to_string())))
            }
            ChainResult::Unit => {
                self.notify_extra("simulator.exec", None, Some(("command", command.to_string())))
            }
        }
    }

    fn run_chain(&mut self, target: Target, functions: &[Function]) -> Result<ChainResult, SimError> {
        let Some((function, rest)) = functions.split_first() else {
            return Ok(ChainResult::Unit);
        };
        match self.run_step(target, function)? {
            Outcome::One(next) => {
                if rest.is_empty() {
                    Ok(ChainResult::Unit)
                } else {
                    self.run_chain(next, rest)
                }
            }
            Outcome::Many(targets) => {
                if rest.is_empty() {
                    return Ok(ChainResult::Unit);
                }
                let mut aggregate =
                    QueryResult::with_id(self.target_name(target), self.target_id(target));
                for next in targets {
                    if let ChainResult::Query(qr) = self.run_chain(next, rest)? {
                        if qr.name() == self.target_name(next) {
                            aggregate.insert_multi(qr);
                        } else {
                            let mut wrapped =
                                QueryResult::with_id(self.target_name(next), self.target_id(next));
                            wrapped.insert_multi(qr);
                            aggregate.insert_multi(wrapped);
                        }
                    }
                }
                if aggregate.is_empty() {
                    Ok(ChainResult::Unit)
                } else {
                    Ok(ChainResult::Query(aggregate))
                }
            }
            Outcome::Query(qr) => {
                if rest.is_empty() {
                    Ok(ChainResult::Query(qr))
                } else {
                    Err(SimError::scenario(format!(
                        "unexpected query result in the middle of command at '{}'",
                        function.original()
                    )))
                }
            }
        }
    }

    fn target_name(&self, target: Target) -> &'static str {
        match target {
            Target::Network => "Network",
            Target::Sim => "simulator",
            Target::NotifFilter => "TypeFilter",
            Target::Formatter => "XMLFormatter",
            Target::Node(_) => "Node",
            Target::Connection(_) => "Connection",
            Target::TraceRoute(_) => "TraceRoute",
            Target::RvServer(_) => "RendezVousServer",
            Target::TestApp(_) => "TestApplication",
            Target::Routing(_) => "ReactiveRouting",
            Target::RoutingTable(_) => "RoutingTable",
        }
    }

    fn target_id(&self, target: Target) -> String {
        match target {
            Target::Node(id)
            | Target::TraceRoute(id)
            | Target::RvServer(id)
            | Target::TestApp(id)
            | Target::Routing(id)
            | Target::RoutingTable(id) => {
                self.network.node_ref(id).map(|n| n.name.to_string()).unwrap_or_default()
            }
            Target::Connection(id) => self
                .network
                .connection(id)
                .map(|c| {
                    let a = self.network.node_ref(c.a).map(|n| n.name.to_string()).unwrap_or_default();
                    let b = self.network.node_ref(c.b).map(|n| n.name.to_string()).unwrap_or_default();
                    format!("({a},{b})")
                })
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn run_step(&mut self, target: Target, function: &Function) -> Result<Outcome, SimError> {
        match target {
            Target::Network => self.network_command(function),
            Target::Sim => match function.name() {
                "notifFilter" => Ok(Outcome::One(Target::NotifFilter)),
                "formatter" => Ok(Outcome::One(Target::Formatter)),
                other => Err(SimError::scenario(format!("simulator - bad function: {other}"))),
            },
            Target::NotifFilter => {
                match function.name() {
                    "accept" => {
                        for param in function.params() {
                            self.filter.accept(param.clone());
                        }
                    }
                    "deny" => {
                        for param in function.params() {
                            self.filter.deny(param.clone());
                        }
                    }
                    "setDefault" => self.filter.set_default(function.bool_param(0)?),
                    "clear" => self.filter.clear(),
                    other => {
                        return Err(SimError::scenario(format!("notifFilter - bad function: {other}")))
                    }
                }
                Ok(Outcome::One(Target::NotifFilter))
            }
            Target::Formatter => match function.name() {
                "setStylesheet" => {
                    self.notificator.formatter.set_stylesheet(function.string_param(0)?);
                    Ok(Outcome::One(Target::Formatter))
                }
                other => Err(SimError::scenario(format!("formatter - bad function: {other}"))),
            },
            Target::Node(id) => self.node_command(id, function),
            Target::Connection(id) => self.connection_command(id, function),
            Target::TraceRoute(id) => {
                match function.name() {
                    "trace" => {
                        let dest = function.address_param(0)?;
                        self.with_node(id, |node, sim| node.trace_route_trace(sim, dest))?;
                    }
                    "assert" => {
                        let dest = function.address_param(0)?;
                        let expected = function.string_param(1)?.to_string();
                        self.with_node(id, |node, sim| node.trace_route_assert(sim, dest, &expected))?;
                    }
                    "traceUAddr" => {
                        let dest = cubenet_addr::UniversalAddress::new(function.string_param(0)?);
                        self.with_node(id, |node, sim| node.trace_route_by_identity(sim, &dest))?;
                    }
                    other => {
                        return Err(SimError::scenario(format!("traceRoute - bad function: {other}")))
                    }
                }
                Ok(Outcome::One(Target::TraceRoute(id)))
            }
            Target::RvServer(id) => match function.name() {
                "query" => {
                    let size_only = function.params().first().is_some_and(|p| p == "size");
                    let node = self
                        .network
                        .node_ref(id)
                        .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                    Ok(Outcome::Query(node.rv_server_query(size_only)))
                }
                "sendRegister" => {
                    self.with_node(id, |node, sim| node.rv_server_send_register(sim))?;
                    Ok(Outcome::One(Target::RvServer(id)))
                }
                other => Err(SimError::scenario(format!("rendezVousServer - bad function: {other}"))),
            },
            Target::TestApp(id) => match function.name() {
                "send" => {
                    let dest = function.string_param(0)?.to_string();
                    let tag = function.params().get(1).cloned().unwrap_or_default();
                    self.with_node(id, |node, sim| node.test_app_send(sim, &dest, &tag))?;
                    Ok(Outcome::One(Target::TestApp(id)))
                }
                other => Err(SimError::scenario(format!("testApplication - bad function: {other}"))),
            },
            Target::Routing(id) => match function.name() {
                "table" => Ok(Outcome::One(Target::RoutingTable(id))),
                other => Err(SimError::scenario(format!("routing - bad function: {other}"))),
            },
            Target::RoutingTable(id) => match function.name() {
                "query" => {
                    let node = self
                        .network
                        .node_ref(id)
                        .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                    let mut qr = QueryResult::new("RoutingTable");
                    if function.params().first().is_some_and(|p| p == "size") {
                        qr.insert("size", node.routing.table.len().to_string());
                    } else {
                        for entry in node.routing.table.iter_in_order() {
                            qr.insert_multi(entry.query());
                        }
                    }
                    Ok(Outcome::Query(qr))
                }
                other => Err(SimError::scenario(format!("routing table - bad function: {other}"))),
            },
        }
    }

    fn network_command(&mut self, function: &Function) -> Result<Outcome, SimError> {
        match function.name() {
            "simulator" => Ok(Outcome::One(Target::Sim)),
            "query" => {
                let mut qr = QueryResult::new("network");
                qr.insert("addressLength", self.network.address_length().to_string());
                qr.insert("nodeCount", self.network.node_count().to_string());
                let biggest = self
                    .network
                    .node_ids()
                    .into_iter()
                    .filter_map(|id| self.network.node_ref(id))
                    .map(|n| n.primary_address().mask())
                    .max()
                    .unwrap_or(0);
                qr.insert("biggestMask", biggest.to_string());
                Ok(Outcome::Query(qr))
            }
            "setAddressLength" => {
                self.network.set_address_length(function.int_param(0)? as u16);
                Ok(Outcome::One(Target::Network))
            }
            "newNode" => {
                let id = self.network.add_node(function.string_param(0)?)?;
                Ok(Outcome::One(Target::Node(id)))
            }
            "node" => {
                let id = self.network.node_id(function.string_param(0)?)?;
                Ok(Outcome::One(Target::Node(id)))
            }
            "allNodes" => {
                Ok(Outcome::Many(self.network.node_ids().into_iter().map(Target::Node).collect()))
            }
            "deleteNode" => {
                let id = self.network.node_id(function.string_param(0)?)?;
                self.network.remove_node(id)?;
                Ok(Outcome::One(Target::Network))
            }
            "newConnection" => {
                let a = self.network.node_id(function.string_param(0)?)?;
                let b = self.network.node_id(function.string_param(1)?)?;
                let bandwidth = if function.param_count() >= 3 {
                    Bandwidth::parse(function.string_param(2)?, Bandwidth::BPS)
                        .map_err(|e| SimError::scenario(e.to_string()))?
                } else {
                    Bandwidth::INFINITE
                };
                let delay =
                    if function.param_count() >= 4 { function.time_param(3)? } else { Time::ZERO };
                let id = self.network.add_connection(a, b, bandwidth, delay)?;
                Ok(Outcome::One(Target::Connection(id)))
            }
            "connection" => {
                let a = self.network.node_id(function.string_param(0)?)?;
                let b = self.network.node_id(function.string_param(1)?)?;
                let b_mac = self
                    .network
                    .node_ref(b)
                    .map(|n| n.mac)
                    .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                self.network
                    .find_connection(a, &b_mac)
                    .map(|id| Outcome::One(Target::Connection(id)))
                    .ok_or_else(|| {
                        SimError::scenario(format!(
                            "connection not found: ({}, {})",
                            function.string_param(0).unwrap_or_default(),
                            function.string_param(1).unwrap_or_default()
                        ))
                    })
            }
            "deleteConnection" => {
                let a = self.network.node_id(function.string_param(0)?)?;
                let b = self.network.node_id(function.string_param(1)?)?;
                let b_mac = self
                    .network
                    .node_ref(b)
                    .map(|n| n.mac)
                    .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                let conn = self.network.find_connection(a, &b_mac).ok_or_else(|| {
                    SimError::scenario("connection not found".to_string())
                })?;
                self.network.remove_connection(conn);
                Ok(Outcome::One(Target::Network))
            }
            "assertCompleteAddressSpace" => {
                self.network.assert_complete_address_space()?;
                Ok(Outcome::One(Target::Network))
            }
            "exportConnections" => {
                self.network.export_connections(function.string_param(0)?)?;
                Ok(Outcome::One(Target::Network))
            }
            other => Err(SimError::scenario(format!("network - bad function: {other}"))),
        }
    }

    fn node_command(&mut self, id: NodeId, function: &Function) -> Result<Outcome, SimError> {
        match function.name() {
            "query" => {
                let node = self
                    .network
                    .node_ref(id)
                    .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                let first = function.params().first().map(String::as_str);
                let qr = match first {
                    Some("neighbours") => node.query_neighbours(self),
                    Some("stats") => node.query_stats(),
                    _ => node.query_basic(),
                };
                Ok(Outcome::Query(qr))
            }
            "assertPrimaryAddress" => {
                let expected = function.string_param(0)?;
                let primary = self
                    .network
                    .node_ref(id)
                    .map(|n| n.primary_address())
                    .unwrap_or_default();
                // Accept the address with or without its mask suffix.
                let with_mask = primary.to_string();
                let plain = primary.address().to_string();
                if expected != with_mask && expected != plain {
                    return Err(SimError::scenario(format!(
                        "assertPrimaryAddress failed. Expected {expected}, got {with_mask}"
                    )));
                }
                Ok(Outcome::One(Target::Node(id)))
            }
            "assertSecondaryAddresses" => {
                let node = self
                    .network
                    .node_ref(id)
                    .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                let mut got: Vec<String> =
                    node.addresses().iter().skip(1).map(ToString::to_string).collect();
                if got.len() != function.param_count() {
                    return Err(SimError::scenario(format!(
                        "assertSecondaryAddresses failed. Expected {} addresses, got {}",
                        function.param_count(),
                        got.len()
                    )));
                }
                let mut expected: Vec<String> = function.params().to_vec();
                got.sort();
                expected.sort();
                if got != expected {
                    return Err(SimError::scenario(format!(
                        "assertSecondaryAddresses failed. Expected [{}], got [{}]",
                        expected.join(","),
                        got.join(",")
                    )));
                }
                Ok(Outcome::One(Target::Node(id)))
            }
            "allConnections" => {
                let node = self
                    .network
                    .node_ref(id)
                    .ok_or_else(|| SimError::scenario("node not found".to_string()))?;
                Ok(Outcome::Many(
                    node.phys.connections.values().map(|c| Target::Connection(*c)).collect(),
                ))
            }
            "joinNetwork" => {
                self.put_message(id, Message::JoinNetwork);
                Ok(Outcome::One(Target::Node(id)))
            }
            "leaveNetwork" => {
                self.put_message(id, Message::LeaveNetwork);
                Ok(Outcome::One(Target::Node(id)))
            }
            "shutDown" => {
                self.put_message(id, Message::LeaveNetwork);
                if let Some(node) = self.network.node_mut(id) {
                    node.marked_for_delete = true;
                }
                Ok(Outcome::One(Target::Node(id)))
            }
            "setHBEnabled" => {
                let enabled = function.bool_param(0)?;
                self.with_node(id, |node, sim| node.set_hb_enabled(sim, enabled))?;
                Ok(Outcome::One(Target::Node(id)))
            }
            "traceRoute" => Ok(Outcome::One(Target::TraceRoute(id))),
            "rendezVousServer" => Ok(Outcome::One(Target::RvServer(id))),
            "testApplication" => Ok(Outcome::One(Target::TestApp(id))),
            "routing" => Ok(Outcome::One(Target::Routing(id))),
            other => Err(SimError::scenario(format!("node - bad function: {other}"))),
        }
    }

    fn connection_command(&mut self, id: ConnId, function: &Function) -> Result<Outcome, SimError> {
        match function.name() {
            "query" => {
                let conn = self
                    .network
                    .connection(id)
                    .ok_or_else(|| SimError::scenario("connection not found".to_string()))?;
                let mut qr = QueryResult::with_id("Connection", self.target_id(Target::Connection(id)));
                let a = self.network.node_ref(conn.a).map(|n| n.mac.to_string()).unwrap_or_default();
                let b = self.network.node_ref(conn.b).map(|n| n.mac.to_string()).unwrap_or_default();
                qr.insert("endpoint", a);
                qr.insert("endpoint", b);
                qr.insert("bandwidth", conn.bandwidth.to_string());
                qr.insert("delay", conn.delay.to_string());
                Ok(Outcome::Query(qr))
            }
            "setBandwidth" => {
                let bandwidth = Bandwidth::parse(function.string_param(0)?, Bandwidth::BPS)
                    .map_err(|e| SimError::scenario(e.to_string()))?;
                if let Some(conn) = self.network.connection_mut(id) {
                    conn.bandwidth = bandwidth;
                }
                Ok(Outcome::One(Target::Connection(id)))
            }
            "setDelay" => {
                let delay = function.time_param(0)?;
                if let Some(conn) = self.network.connection_mut(id) {
                    conn.delay = delay;
                }
                Ok(Outcome::One(Target::Connection(id)))
            }
            other => Err(SimError::scenario(format!("connection - bad function: {other}"))),
        }
    }
}
