use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_types::events::OutboundFrame;
use tandem_types::models::UserProfile;

use crate::registry::{FrameSender, SessionId};

/// One live connection. Owned by its connection task; the registry holds a
/// clone of the sender once the session is authenticated.
pub struct Session {
    id: SessionId,
    tx: FrameSender,
    user: Option<UserProfile>,
}

impl Session {
    /// Creates an unauthenticated session and the receiving end of its
    /// outbound queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::new_v4(),
            tx,
            user: None,
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Queues a frame for this connection only. A closed queue means the
    /// socket is already gone, so the frame is dropped.
    pub fn send(&self, frame: OutboundFrame) {
        let _ = self.tx.send(frame);
    }

    pub(crate) fn sender(&self) -> FrameSender {
        self.tx.clone()
    }

    pub(crate) fn bind(&mut self, user: UserProfile) {
        self.user = Some(user);
    }
}
