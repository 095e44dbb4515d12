//! SDK entry point: mint a token, derive the socket URL, open the channel.

use tracing::info;

use crate::channel::SignalingChannel;
use crate::error::Result;
use crate::token::{signaling_ws_url, TokenService};
use crate::ws;

/// Connects an agent's signaling channel against a directory.
///
/// Issues a fresh signaling token, derives the WebSocket URL from the
/// directory base URL, connects, and waits for the channel to become ready.
///
/// # Errors
///
/// Propagates token, connection and readiness failures.
pub async fn connect_signaling(
    base_url: &str,
    agent_id: &str,
    api_key: &str,
) -> Result<SignalingChannel> {
    let tokens = TokenService::new(base_url, api_key);
    let token = tokens.issue_signaling_token(agent_id).await?;

    let url = signaling_ws_url(base_url, token.value())?;
    let (socket, events) = ws::connect_socket(&url).await?;
    let channel = SignalingChannel::open(agent_id, socket, events, Some(token))?;
    channel.ready().await?;
    info!(agent_id, "signaling channel ready");
    Ok(channel)
}
