//! End-to-end scenario tests driving the full stack: join handshakes,
//! heart-bit driven adjacency, secondary addresses, graceful leaves,
//! rendez-vous resolution and trace-route asserts.

use std::io::Write;
use std::sync::{Arc, Mutex};

use cubenet_sim::{NeighbourRole, Simulator};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("buffer lock")).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn new_sim() -> (Simulator, SharedBuf) {
    let buffer = SharedBuf::default();
    let mut sim = Simulator::new();
    sim.set_output_writer(Box::new(buffer.clone()));
    (sim, buffer)
}

fn primary(sim: &Simulator, name: &str) -> String {
    let id = sim.network.node_id(name).expect("node exists");
    sim.network.node_ref(id).expect("node present").primary_address().to_string()
}

fn roles(sim: &Simulator, name: &str) -> Vec<NeighbourRole> {
    let id = sim.network.node_id(name).expect("node exists");
    sim.network.node_ref(id).expect("node present").neighbours().map(|n| n.role).collect()
}

#[test]
fn single_node_claims_the_zero_address() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         node(A).joinNetwork()\n\
         [1s] node(A).assertPrimaryAddress(00000000)\n",
    )
    .unwrap();
    sim.simulate().unwrap();
    assert_eq!(primary(&sim, "A"), "00000000/0");
}

#[test]
fn two_nodes_form_a_parent_child_pair() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1200ms] assertCompleteAddressSpace()\n",
    )
    .unwrap();
    sim.simulate().unwrap();

    assert_eq!(primary(&sim, "A"), "00000000/1");
    assert_eq!(primary(&sim, "B"), "10000000/1");
    assert_eq!(roles(&sim, "A"), vec![NeighbourRole::Child]);
    assert_eq!(roles(&sim, "B"), vec![NeighbourRole::ParentOf]);
}

#[test]
fn square_converges_to_a_complete_space_with_adjacencies() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "# A-B, B-C, C-D, D-A ring\n\
         newNode(A)\n\
         newNode(B)\n\
         newNode(C)\n\
         newNode(D)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         newConnection(B,C,10Mbps,1ms)\n\
         newConnection(C,D,10Mbps,1ms)\n\
         newConnection(D,A,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1200ms] node(C).joinNetwork()\n\
         [1800ms] node(D).joinNetwork()\n\
         [3500ms] assertCompleteAddressSpace()\n",
    )
    .unwrap();
    sim.simulate().unwrap();

    assert_eq!(primary(&sim, "A"), "00000000/2");
    assert_eq!(primary(&sim, "B"), "10000000/2");
    assert_eq!(primary(&sim, "C"), "11000000/2");
    assert_eq!(primary(&sim, "D"), "01000000/2");

    // The C-D ring edge is discovered through heart-bits.
    assert!(roles(&sim, "C").contains(&NeighbourRole::Adjacent));
    assert!(roles(&sim, "D").contains(&NeighbourRole::Adjacent));
}

#[test]
fn heard_bits_drive_a_secondary_address_offer() {
    // Triangle: C gets its primary from B's half while sitting next to A,
    // so B must claim a secondary in A's half to become adjacent to C.
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newNode(C)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         newConnection(B,C,10Mbps,1ms)\n\
         newConnection(A,C,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1200ms] node(C).joinNetwork()\n\
         [3500ms] assertCompleteAddressSpace()\n\
         [3500ms] node(B).assertSecondaryAddresses(11000000/2)\n",
    )
    .unwrap();
    sim.simulate().unwrap();

    assert_eq!(primary(&sim, "A"), "00000000/2");
    assert_eq!(primary(&sim, "C"), "01000000/2");
    assert_eq!(primary(&sim, "B"), "10000000/2");
    let b = sim.network.node_ref(sim.network.node_id("B").unwrap()).unwrap();
    assert_eq!(b.addresses().len(), 2);
    assert_eq!(b.addresses()[1].to_string(), "11000000/2");
}

#[test]
fn graceful_leave_of_a_leaf_recovers_the_space() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1500ms] node(B).leaveNetwork()\n\
         [2000ms] node(A).assertPrimaryAddress('00000000/0')\n\
         [2000ms] assertCompleteAddressSpace()\n",
    )
    .unwrap();
    sim.simulate().unwrap();
    assert_eq!(primary(&sim, "A"), "00000000/0");
    assert_eq!(primary(&sim, "B"), "/0");
}

#[test]
fn leave_with_children_does_not_recover_the_space() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newNode(C)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         newConnection(B,C,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1200ms] node(C).joinNetwork()\n\
         [2500ms] node(B).leaveNetwork()\n",
    )
    .unwrap();
    sim.simulate().unwrap();

    // B had delegated to C, so A must keep its shortened space.
    assert_eq!(primary(&sim, "A"), "00000000/1");
    // The space now has a hole where B used to be.
    assert!(sim.exec("assertCompleteAddressSpace()").is_err());
}

#[test]
fn rendezvous_queues_the_send_until_resolution() {
    // "Cz" hashes into its own half of the plane, so A's lookup crosses
    // the network and the queued send drains measurably later.
    let (mut sim, buffer) = new_sim();
    sim.load_str(
        "simulator.notifFilter.accept(node.rvclient.solved)\n\
         simulator.notifFilter.accept(node.testApplication.received)\n\
         newNode(A)\n\
         newNode(Cz)\n\
         newConnection(A,Cz,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(Cz).joinNetwork()\n\
         [800ms] node(A).testApplication.send(Cz)\n\
         [2s] assertCompleteAddressSpace()\n",
    )
    .unwrap();
    sim.simulate().unwrap();
    sim.finish().unwrap();

    let text = buffer.text();
    assert!(text.contains("node.rvclient.solved"), "missing solved notification: {text}");
    assert!(!text.contains("id=\"0 s\""), "resolution should take simulated time: {text}");
    assert!(text.contains("node.testApplication.received"), "echo never completed: {text}");

    let a = sim.network.node_ref(sim.network.node_id("A").unwrap()).unwrap();
    assert!(a.rv_client().cached("Cz").is_some());
    assert_eq!(a.rv_client().queued("Cz"), 0);
}

#[test]
fn trace_route_assert_checks_the_recorded_route() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1500ms] node(A).traceRoute.assert('10000000', B)\n",
    )
    .unwrap();
    sim.simulate().unwrap();
}

#[test]
fn trace_route_assert_fails_on_a_wrong_expectation() {
    let (mut sim, buffer) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1500ms] node(A).traceRoute.assert('10000000', X)\n",
    )
    .unwrap();
    let result = sim.simulate();
    assert!(result.is_err());
    sim.finish().unwrap();
    assert!(buffer.text().contains("route assert failed"));
}

#[test]
fn registry_moves_with_the_directory_owner() {
    // After both nodes join, A owns the directory entry for "B" (its hash
    // falls in A's half).
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1500ms] assertCompleteAddressSpace()\n",
    )
    .unwrap();
    sim.simulate().unwrap();

    let a = sim.network.node_ref(sim.network.node_id("A").unwrap()).unwrap();
    assert!(a.rv_server().lookup.contains_key("A"));
    assert!(a.rv_server().lookup.contains_key("B"));
    let b = sim.network.node_ref(sim.network.node_id("B").unwrap()).unwrap();
    assert!(b.rv_server().lookup.is_empty());
}

#[test]
fn scenario_errors_during_load_are_reported_and_skipped() {
    let (mut sim, buffer) = new_sim();
    sim.load_str(
        "bogusFunction(A)\n\
         newNode(A)\n",
    )
    .unwrap();
    sim.finish().unwrap();
    assert!(sim.network.node_id("A").is_ok());
    assert!(buffer.text().contains("Error"));
}

#[test]
fn scenario_files_load_from_disk_and_export_links() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = dir.path().join("pair.txt");
    let export = dir.path().join("links.csv");
    std::fs::write(
        &scenario,
        format!(
            "newNode(A)                 # first node\n\
             newNode(B)\n\
             newConnection(A,B,10Mbps,1ms)\n\
             node(A).joinNetwork()\n\
             [600ms] node(B).joinNetwork()\n\
             [1500ms] exportConnections({})\n",
            export.display()
        ),
    )
    .unwrap();

    let (mut sim, _) = new_sim();
    sim.load_file(&scenario).unwrap();
    sim.simulate().unwrap();

    let exported = std::fs::read_to_string(&export).unwrap();
    assert_eq!(exported.trim(), "B,A");
}

#[test]
fn shut_down_deletes_the_node_after_disconnection() {
    let (mut sim, _) = new_sim();
    sim.load_str(
        "newNode(A)\n\
         newNode(B)\n\
         newConnection(A,B,10Mbps,1ms)\n\
         node(A).joinNetwork()\n\
         [600ms] node(B).joinNetwork()\n\
         [1500ms] node(B).shutDown()\n\
         [2000ms] node(A).assertPrimaryAddress('00000000/0')\n",
    )
    .unwrap();
    sim.simulate().unwrap();
    assert!(sim.network.node_id("B").is_err());
    assert_eq!(primary(&sim, "A"), "00000000/0");
}
