use cubenet_addr::{HypercubeAddress, HypercubeMaskAddress};

/// Intra-node publish/subscribe messages.
///
/// Messages never cross nodes; anything between nodes travels as packets
/// through the layer stack. Delivery is via events scheduled at the current
/// time, so same-time events already in the queue run first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the main state machine to join the network.
    JoinNetwork,
    /// Ask the main state machine to leave gracefully.
    LeaveNetwork,
    /// The node acquired a primary address; `parent` is empty for the root.
    Connected { primary: HypercubeMaskAddress, parent: HypercubeMaskAddress },
    /// The node completed its disconnection.
    Disconnected,
    /// Joining failed for good.
    CantConnect { reason: String },
    /// The node is about to disconnect; subscribers may answer with
    /// [`Message::WaitMe`] to hold the handshake.
    WillDisconnect,
    /// A subsystem (keyed by its port) asks the leaver to wait for it.
    WaitMe { port: u16 },
    /// A subsystem that asked to be waited for is now ready.
    ReadyForDisc { port: u16 },
    /// A new neighbour became routable.
    NewRoute { route: HypercubeMaskAddress },
    /// A neighbour is no longer routable.
    LostRoute { route: HypercubeMaskAddress },
    /// A neighbour announced a different mask.
    RouteChangedMask { route: HypercubeMaskAddress },
    /// The node delegated `given` to the node at `recipient`.
    AddressGiven { given: HypercubeMaskAddress, recipient: HypercubeAddress },
}

/// Subscription key of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinNetwork,
    LeaveNetwork,
    Connected,
    Disconnected,
    CantConnect,
    WillDisconnect,
    WaitMe,
    ReadyForDisc,
    NewRoute,
    LostRoute,
    RouteChangedMask,
    AddressGiven,
}

/// The per-node components that can receive messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscriber {
    MainSm,
    ControlLayer,
    Routing,
    RvServer,
    Node,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::JoinNetwork => MessageKind::JoinNetwork,
            Message::LeaveNetwork => MessageKind::LeaveNetwork,
            Message::Connected { .. } => MessageKind::Connected,
            Message::Disconnected => MessageKind::Disconnected,
            Message::CantConnect { .. } => MessageKind::CantConnect,
            Message::WillDisconnect => MessageKind::WillDisconnect,
            Message::WaitMe { .. } => MessageKind::WaitMe,
            Message::ReadyForDisc { .. } => MessageKind::ReadyForDisc,
            Message::NewRoute { .. } => MessageKind::NewRoute,
            Message::LostRoute { .. } => MessageKind::LostRoute,
            Message::RouteChangedMask { .. } => MessageKind::RouteChangedMask,
            Message::AddressGiven { .. } => MessageKind::AddressGiven,
        }
    }
}

/// The static subscription table. The reference design registers listeners
/// at construction time and never changes them, so a fixed table per kind
/// replaces the per-node subscriber multimap.
pub fn subscribers(kind: MessageKind) -> &'static [Subscriber] {
    match kind {
        MessageKind::JoinNetwork
        | MessageKind::LeaveNetwork
        | MessageKind::WaitMe
        | MessageKind::ReadyForDisc => &[Subscriber::MainSm],
        MessageKind::Connected => &[Subscriber::ControlLayer, Subscriber::Routing, Subscriber::RvServer],
        MessageKind::Disconnected => &[Subscriber::ControlLayer, Subscriber::Node],
        MessageKind::CantConnect => &[],
        MessageKind::WillDisconnect => &[Subscriber::RvServer],
        MessageKind::NewRoute | MessageKind::LostRoute | MessageKind::RouteChangedMask => {
            &[Subscriber::Routing]
        }
        MessageKind::AddressGiven => &[Subscriber::RvServer],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(Message::JoinNetwork.kind(), MessageKind::JoinNetwork);
        assert_eq!(
            Message::WaitMe { port: 9902 }.kind(),
            MessageKind::WaitMe
        );
    }

    #[test]
    fn connected_fans_out_to_three_subscribers() {
        let subs = subscribers(MessageKind::Connected);
        assert_eq!(subs.len(), 3);
        assert!(subs.contains(&Subscriber::RvServer));
    }

    #[test]
    fn cant_connect_has_no_subscribers() {
        assert!(subscribers(MessageKind::CantConnect).is_empty());
    }
}
