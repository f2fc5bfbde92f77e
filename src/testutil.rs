//! Fake MAVLink transport for tests.
//!
//! A `Mutex`-guarded `VecDeque` of scripted inbound messages plus a `Mutex<Vec<_>>` of
//! captured outbound ones, implementing the wire-codec crate's `MavConnection` trait.
//! Generalized with an optional responder closure so a test can script request/response
//! behavior (e.g. "reply to this `PARAM_REQUEST_READ` with this `PARAM_VALUE`") instead of
//! only a fixed inbound script.

use mavlink::common::MavMessage;
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{MavConnection, MavFrame, MavHeader, MavlinkVersion};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Responder = dyn FnMut(&MavMessage) -> Option<MavMessage> + Send;

pub struct FakeLink {
    protocol_version: Mutex<MavlinkVersion>,
    allow_any: Mutex<bool>,
    incoming: Mutex<VecDeque<MavMessage>>,
    sent: Mutex<Vec<MavMessage>>,
    responder: Mutex<Option<Box<Responder>>>,
}

impl FakeLink {
    pub fn new() -> Self {
        Self {
            protocol_version: Mutex::new(MavlinkVersion::V2),
            allow_any: Mutex::new(true),
            incoming: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    pub fn push_incoming(&self, msg: MavMessage) {
        self.incoming.lock().expect("incoming lock").push_back(msg);
    }

    /// Installs a closure invoked on every `send`: if it returns `Some(reply)`, the reply is
    /// appended to the incoming queue as though the vehicle answered.
    pub fn on_send<F>(&self, responder: F)
    where
        F: FnMut(&MavMessage) -> Option<MavMessage> + Send + 'static,
    {
        *self.responder.lock().expect("responder lock") = Some(Box::new(responder));
    }

    pub fn sent_messages(&self) -> Vec<MavMessage> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl Default for FakeLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MavConnection<MavMessage> for FakeLink {
    fn recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        self.try_recv()
    }

    fn try_recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        let mut incoming = self.incoming.lock().expect("incoming lock");
        match incoming.pop_front() {
            Some(msg) => Ok((MavHeader::default(), msg)),
            None => Err(MessageReadError::Io(std::io::ErrorKind::WouldBlock.into())),
        }
    }

    fn send(&self, _header: &MavHeader, data: &MavMessage) -> Result<usize, MessageWriteError> {
        self.sent.lock().expect("sent lock").push(data.clone());
        let reply = self
            .responder
            .lock()
            .expect("responder lock")
            .as_mut()
            .and_then(|responder| responder(data));
        if let Some(reply) = reply {
            self.push_incoming(reply);
        }
        Ok(1)
    }

    fn set_protocol_version(&mut self, version: MavlinkVersion) {
        *self.protocol_version.lock().expect("protocol lock") = version;
    }

    fn protocol_version(&self) -> MavlinkVersion {
        *self.protocol_version.lock().expect("protocol lock")
    }

    fn set_allow_recv_any_version(&mut self, allow: bool) {
        *self.allow_any.lock().expect("allow lock") = allow;
    }

    fn allow_recv_any_version(&self) -> bool {
        *self.allow_any.lock().expect("allow lock")
    }

    fn send_frame(&self, frame: &MavFrame<MavMessage>) -> Result<usize, MessageWriteError> {
        self.send(&frame.header, &frame.msg)
    }
}

pub use crate::link::param_id_bytes;

/// A local newtype wrapping `Arc<FakeLink>`, letting a test keep its own handle (to push
/// more incoming messages or inspect `sent_messages()`) after handing a `Box<dyn
/// MavConnection>` built from the other handle into a [`crate::link::LinkAdapter`]/`Session`.
/// Implementing the foreign `MavConnection` trait directly for `Arc<FakeLink>` would violate
/// the orphan rules; this local wrapper sidesteps that.
#[derive(Clone)]
pub struct SharedFakeLink(pub Arc<FakeLink>);

impl SharedFakeLink {
    pub fn new() -> Self {
        Self(Arc::new(FakeLink::new()))
    }

    pub fn boxed(&self) -> Box<dyn MavConnection<MavMessage> + Send> {
        Box::new(self.clone())
    }
}

impl Default for SharedFakeLink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for SharedFakeLink {
    type Target = FakeLink;
    fn deref(&self) -> &FakeLink {
        &self.0
    }
}

impl MavConnection<MavMessage> for SharedFakeLink {
    fn recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        self.0.recv()
    }

    fn try_recv(&self) -> Result<(MavHeader, MavMessage), MessageReadError> {
        self.0.try_recv()
    }

    fn send(&self, header: &MavHeader, data: &MavMessage) -> Result<usize, MessageWriteError> {
        self.0.send(header, data)
    }

    fn set_protocol_version(&mut self, version: MavlinkVersion) {
        *self.0.protocol_version.lock().expect("protocol lock") = version;
    }

    fn protocol_version(&self) -> MavlinkVersion {
        self.0.protocol_version()
    }

    fn set_allow_recv_any_version(&mut self, allow: bool) {
        *self.0.allow_any.lock().expect("allow lock") = allow;
    }

    fn allow_recv_any_version(&self) -> bool {
        self.0.allow_recv_any_version()
    }

    fn send_frame(&self, frame: &MavFrame<MavMessage>) -> Result<usize, MessageWriteError> {
        self.0.send_frame(frame)
    }
}
