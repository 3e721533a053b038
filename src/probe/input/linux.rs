//! Input idle time for Linux using the X11 XScreenSaver extension.

use std::time::Duration;
use x11rb::connection::Connection;
use x11rb::protocol::screensaver::ConnectionExt as ScreensaverConnectionExt;
use x11rb::rust_connection::RustConnection;

use crate::error::ProbeError;

fn unavailable(context: &str, e: impl std::fmt::Display) -> ProbeError {
    ProbeError::Unavailable(format!("{}: {}", context, e))
}

/// Milliseconds since the last keyboard or mouse event on the default display.
pub(super) fn idle_time() -> Result<Duration, ProbeError> {
    let (conn, screen_num) = RustConnection::connect(None)
        .map_err(|e| unavailable("Failed to connect to X11 display. Is DISPLAY set?", e))?;

    let screen = conn
        .setup()
        .roots
        .get(screen_num)
        .ok_or_else(|| ProbeError::Unavailable(format!("X11 screen {} not found", screen_num)))?;

    let reply = conn
        .screensaver_query_info(screen.root)
        .map_err(|e| unavailable("XScreenSaver extension not available", e))?
        .reply()
        .map_err(|e| unavailable("Failed to query XScreenSaver info", e))?;

    Ok(Duration::from_millis(reply.ms_since_user_input as u64))
}
