//! Parameter Store: the cache of every parameter value retrieved from the vehicle, plus the
//! gap-filling full-retrieval algorithm run once at connect time, before the receiver loop is
//! allowed to touch the session.

use mavlink::common::{self, MavMessage};
use std::collections::{HashMap, HashSet};

use crate::error::SessionError;
use crate::link::LinkAdapter;

#[derive(Debug, Default)]
pub struct ParamStore {
    parameters: HashMap<String, f32>,
}

impl ParamStore {
    /// Only the receiver loop calls this, via [`crate::session::Session::update_info`].
    pub fn update(&mut self, msg: &MavMessage) {
        if let MavMessage::PARAM_VALUE(data) = msg {
            self.parameters.insert(param_id_string(&data.param_id), data.param_value);
        }
    }

    pub fn param_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn get(&self, id: &str) -> Result<f32, SessionError> {
        self.parameters
            .get(id)
            .copied()
            .ok_or_else(|| SessionError::KeyNotFound(id.to_string()))
    }

    pub fn get_all(&self) -> HashMap<String, f32> {
        self.parameters.clone()
    }
}

fn param_id_string(raw: &[u8; 16]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Sends `PARAM_REQUEST_LIST`, drains `PARAM_VALUE` with a per-message timeout until one
/// times out, then backfills any index gap with a per-index `PARAM_REQUEST_READ`/timeout
/// wait. Runs before the session is marked connected, so the receiver loop's
/// `count() > 0` guard can't race it.
pub fn retrieve_all_params(
    link: &LinkAdapter,
    store: &mut ParamStore,
    per_message_timeout: std::time::Duration,
) -> Result<(), SessionError> {
    link.param_request_list()?;

    let mut seen_indices: HashSet<u16> = HashSet::new();
    let mut reported_count: Option<u16> = None;

    loop {
        match link.recv_matching(per_message_timeout, |msg| matches!(msg, MavMessage::PARAM_VALUE(_))) {
            Some(MavMessage::PARAM_VALUE(data)) => {
                store.update(&MavMessage::PARAM_VALUE(data.clone()));
                seen_indices.insert(data.param_index);
                reported_count = Some(data.param_count);
            }
            _ => break,
        }
    }

    let Some(total) = reported_count else {
        return Ok(());
    };

    for index in 0..total {
        if seen_indices.contains(&index) {
            continue;
        }
        link.param_request_read(index as i16)?;
        if let Some(MavMessage::PARAM_VALUE(data)) = link.recv_matching(per_message_timeout, |msg| {
            matches!(msg, MavMessage::PARAM_VALUE(data) if data.param_index == index)
        }) {
            store.update(&MavMessage::PARAM_VALUE(data));
        }
        // Best-effort: a missing index that never answers is simply left out of the store.
    }

    Ok(())
}
